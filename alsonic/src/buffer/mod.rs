//! PCM buffers and the registry that owns them.

mod registry;

pub use registry::BufferRegistry;

use crate::error::{AlSonicError, Result};
use crate::format::AudioFormat;
use crate::source::SourceId;
use std::collections::HashMap;
use std::sync::Arc;

/// Handle to a buffer owned by a context's registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(u32);

impl BufferId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BufferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BufferId({})", self.0)
    }
}

/// Immutable PCM payload of a buffer.
///
/// Queue entries hold their own `Arc` to it, so the render thread never has to look
/// the buffer up and a buffer can be deleted while a queue still drains it.
#[derive(Debug)]
pub struct PcmData {
    format: AudioFormat,
    bytes: Arc<[u8]>,
    frames: usize,
}

impl PcmData {
    fn new(format: AudioFormat, bytes: Arc<[u8]>) -> Self {
        let frames = format.frames_in(bytes.len());
        Self {
            format,
            bytes,
            frames,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn byte_len(&self) -> usize {
        self.frames * self.format.bytes_per_frame()
    }
}

/// A buffer slot: format, data and the sources it is attached to.
#[derive(Debug)]
pub struct AudioBuffer {
    id: BufferId,
    pcm: Option<Arc<PcmData>>,
    is_static: bool,
    attachments: HashMap<SourceId, u32>,
}

impl AudioBuffer {
    fn new(id: BufferId) -> Self {
        Self {
            id,
            pcm: None,
            is_static: false,
            attachments: HashMap::new(),
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.pcm.as_ref().map(|pcm| pcm.format())
    }

    pub fn frames(&self) -> usize {
        self.pcm.as_ref().map_or(0, |pcm| pcm.frames())
    }

    pub fn size_bytes(&self) -> usize {
        self.pcm.as_ref().map_or(0, |pcm| pcm.byte_len())
    }

    /// True when the bytes were supplied by the application and are only borrowed
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn attachment_count(&self) -> u32 {
        self.attachments.values().sum()
    }

    pub fn is_attached_to(&self, source: SourceId) -> bool {
        self.attachments.contains_key(&source)
    }

    pub(crate) fn pcm(&self) -> Option<&Arc<PcmData>> {
        self.pcm.as_ref()
    }

    /// True while some queue entry still holds this buffer's data
    fn in_flight(&self) -> bool {
        self.pcm.as_ref().is_some_and(|pcm| Arc::strong_count(pcm) > 1)
    }

    /// Replace the data. Returns the previous data, which queue entries may still hold.
    fn set_data(
        &mut self,
        format: AudioFormat,
        bytes: Arc<[u8]>,
        is_static: bool,
    ) -> Result<Option<Arc<PcmData>>> {
        if self.attachment_count() > 0 {
            return Err(AlSonicError::InvalidOperation(format!(
                "{} is attached to a source and cannot be refilled",
                self.id
            )));
        }
        format.validate()?;
        if bytes.len() % format.bytes_per_frame() != 0 {
            return Err(AlSonicError::InvalidValue(format!(
                "{} bytes is not a whole number of {}-byte frames",
                bytes.len(),
                format.bytes_per_frame()
            )));
        }
        let previous = self.pcm.replace(Arc::new(PcmData::new(format, bytes)));
        self.is_static = is_static;
        Ok(previous)
    }

    fn attach(&mut self, source: SourceId) {
        *self.attachments.entry(source).or_insert(0) += 1;
    }

    fn detach(&mut self, source: SourceId) -> bool {
        match self.attachments.get_mut(&source) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                self.attachments.remove(&source);
                true
            }
            None => false,
        }
    }
}
