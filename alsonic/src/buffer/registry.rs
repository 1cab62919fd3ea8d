use super::{AudioBuffer, BufferId, PcmData};
use crate::error::{AlSonicError, Result};
use crate::format::AudioFormat;
use crate::source::SourceId;
use std::collections::HashMap;
use std::sync::Arc;

/// Owns every buffer of a context.
///
/// Deleted buffers whose data is still referenced by a queue entry are parked in a
/// dead set, and data replaced by an upload while an entry still plays it is parked
/// the same way. [`reap`](Self::reap) frees both once the last reference is gone, so
/// the render thread never drops the last handle to PCM data.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    buffers: HashMap<BufferId, AudioBuffer>,
    dead: Vec<AudioBuffer>,
    replaced: Vec<Arc<PcmData>>,
    next_id: u32,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` empty buffers
    pub fn generate(&mut self, count: usize) -> Vec<BufferId> {
        self.reap();
        (0..count)
            .map(|_| {
                // 0 is never a valid buffer name
                self.next_id += 1;
                let id = BufferId::new(self.next_id);
                self.buffers.insert(id, AudioBuffer::new(id));
                id
            })
            .collect()
    }

    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.contains_key(&id)
    }

    pub fn get(&self, id: BufferId) -> Result<&AudioBuffer> {
        self.buffers
            .get(&id)
            .ok_or_else(|| AlSonicError::InvalidName(format!("{} does not exist", id)))
    }

    fn get_mut(&mut self, id: BufferId) -> Result<&mut AudioBuffer> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| AlSonicError::InvalidName(format!("{} does not exist", id)))
    }

    /// Copy `data` into the buffer
    pub fn upload(&mut self, id: BufferId, format: AudioFormat, data: &[u8]) -> Result<()> {
        let previous = self.get_mut(id)?.set_data(format, Arc::from(data), false)?;
        self.park(previous);
        log::debug!("{} filled with {} bytes ({:?})", id, data.len(), format);
        Ok(())
    }

    /// Use application-owned bytes without copying them
    pub fn upload_static(&mut self, id: BufferId, format: AudioFormat, data: Arc<[u8]>) -> Result<()> {
        let len = data.len();
        let previous = self.get_mut(id)?.set_data(format, data, true)?;
        self.park(previous);
        log::debug!("{} borrows {} static bytes ({:?})", id, len, format);
        Ok(())
    }

    /// Delete a buffer. Refused while any source has it attached.
    pub fn delete(&mut self, id: BufferId) -> Result<()> {
        let buffer = self.get(id)?;
        if buffer.attachment_count() > 0 {
            return Err(AlSonicError::InvalidOperation(format!(
                "{} is attached to {} source queue entr{}",
                id,
                buffer.attachment_count(),
                if buffer.attachment_count() == 1 { "y" } else { "ies" }
            )));
        }
        if let Some(buffer) = self.buffers.remove(&id) {
            if buffer.in_flight() {
                log::debug!("{} deleted while still draining; parked", id);
                self.dead.push(buffer);
            }
        }
        self.reap();
        Ok(())
    }

    /// Attach a buffer to `source` and hand out its data for a queue entry
    pub(crate) fn attach(&mut self, id: BufferId, source: SourceId) -> Result<Arc<PcmData>> {
        let buffer = self.get_mut(id)?;
        let pcm = buffer.pcm().cloned().ok_or_else(|| {
            AlSonicError::InvalidOperation(format!("{} has no data to queue", id))
        })?;
        buffer.attach(source);
        Ok(pcm)
    }

    /// Undo one [`attach`](Self::attach). Unknown ids are ignored.
    pub(crate) fn detach(&mut self, id: BufferId, source: SourceId) {
        if let Some(buffer) = self.buffers.get_mut(&id) {
            buffer.detach(source);
        }
    }

    /// Keep replaced data alive while a queue entry still holds it
    fn park(&mut self, previous: Option<Arc<PcmData>>) {
        self.reap();
        if let Some(pcm) = previous.filter(|pcm| Arc::strong_count(pcm) > 1) {
            log::debug!("Replaced data of {} frames still playing; parked", pcm.frames());
            self.replaced.push(pcm);
        }
    }

    /// Free parked data nothing references any more; returns how much was freed
    pub fn reap(&mut self) -> usize {
        let before = self.dead.len() + self.replaced.len();
        self.dead.retain(|buffer| buffer.in_flight());
        self.replaced.retain(|pcm| Arc::strong_count(pcm) > 1);
        before - self.dead.len() - self.replaced.len()
    }

    pub fn attachment_count(&self, id: BufferId) -> Result<u32> {
        Ok(self.get(id)?.attachment_count())
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Deleted buffers and replaced data not yet freed
    pub fn pending_deletions(&self) -> usize {
        self.dead.len() + self.replaced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_data() -> (BufferRegistry, BufferId) {
        let mut registry = BufferRegistry::new();
        let id = registry.generate(1)[0];
        registry
            .upload(id, AudioFormat::mono16(44100), &[0u8; 64])
            .unwrap();
        (registry, id)
    }

    #[test]
    fn ids_are_unique_and_non_zero() {
        let mut registry = BufferRegistry::new();
        let ids = registry.generate(3);
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.raw() != 0));
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn delete_refused_while_attached() {
        let (mut registry, id) = registry_with_data();
        let a = SourceId::new(1);
        let b = SourceId::new(2);
        let _pcm_a = registry.attach(id, a).unwrap();
        let _pcm_b = registry.attach(id, b).unwrap();

        registry.detach(id, a);
        assert!(matches!(
            registry.delete(id),
            Err(AlSonicError::InvalidOperation(_))
        ));
        registry.detach(id, b);
    }

    #[test]
    fn delete_parks_in_flight_buffers_until_reaped() {
        let (mut registry, id) = registry_with_data();
        let source = SourceId::new(1);
        let pcm = registry.attach(id, source).unwrap();
        registry.detach(id, source);

        registry.delete(id).unwrap();
        assert!(!registry.contains(id));
        assert_eq!(registry.pending_deletions(), 1);

        drop(pcm);
        assert_eq!(registry.reap(), 1);
        assert_eq!(registry.pending_deletions(), 0);
    }

    #[test]
    fn upload_rejected_while_attached() {
        let (mut registry, id) = registry_with_data();
        let _pcm = registry.attach(id, SourceId::new(9)).unwrap();
        assert!(matches!(
            registry.upload(id, AudioFormat::mono8(8000), &[1, 2, 3]),
            Err(AlSonicError::InvalidOperation(_))
        ));
    }

    #[test]
    fn refill_parks_data_an_entry_still_plays() {
        let (mut registry, id) = registry_with_data();
        let source = SourceId::new(1);
        let pcm = registry.attach(id, source).unwrap();
        registry.detach(id, source);

        registry.upload(id, AudioFormat::mono8(8000), &[1, 2, 3]).unwrap();
        assert_eq!(registry.get(id).unwrap().frames(), 3);
        assert_eq!(registry.pending_deletions(), 1);
        assert_eq!(Arc::strong_count(&pcm), 2);

        drop(pcm);
        assert_eq!(registry.reap(), 1);
        assert_eq!(registry.pending_deletions(), 0);

        // nothing else holds the current data, so replacing it frees it at once
        registry.upload(id, AudioFormat::mono8(8000), &[4]).unwrap();
        assert_eq!(registry.pending_deletions(), 0);
    }

    #[test]
    fn upload_validates_format_and_size() {
        let mut registry = BufferRegistry::new();
        let id = registry.generate(1)[0];
        assert!(matches!(
            registry.upload(id, AudioFormat::mono16(44100), &[0u8; 3]),
            Err(AlSonicError::InvalidValue(_))
        ));
        assert!(registry.get(id).unwrap().format().is_none());
    }

    #[test]
    fn static_data_is_shared_not_copied() {
        let mut registry = BufferRegistry::new();
        let id = registry.generate(1)[0];
        let data: Arc<[u8]> = Arc::from(vec![7u8; 16]);
        registry
            .upload_static(id, AudioFormat::mono8(8000), data.clone())
            .unwrap();

        let buffer = registry.get(id).unwrap();
        assert!(buffer.is_static());
        assert_eq!(buffer.pcm().unwrap().bytes().as_ptr(), data.as_ptr());

        // the application's own handle does not keep the buffer alive
        registry.delete(id).unwrap();
        assert_eq!(registry.pending_deletions(), 0);
    }

    #[test]
    fn unknown_ids_are_invalid_names() {
        let mut registry = BufferRegistry::new();
        assert!(matches!(
            registry.delete(BufferId::new(42)),
            Err(AlSonicError::InvalidName(_))
        ));
        assert!(registry.attach(BufferId::new(42), SourceId::new(1)).is_err());
    }
}
