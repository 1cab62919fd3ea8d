//! Capture side: device input lands in a [`RingBuffer`] and the application drains it.

use crate::error::{AlSonicError, Result};
use crate::format::AudioFormat;
use crate::gate::RenderGate;
use crate::ring_buffer::RingBuffer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

struct CaptureRing {
    ring: RingBuffer,
    read_cursor: u64,
}

impl CaptureRing {
    /// A reader that fell behind the window jumps forward to the oldest frame still held
    fn clamp_cursor(&mut self) -> u64 {
        let (start, end) = self.ring.time_bounds();
        self.read_cursor = self.read_cursor.clamp(start, end);
        end - self.read_cursor
    }
}

/// Capture endpoint fed by an input device callback.
///
/// The device side calls [`push_input`](Self::push_input), which never blocks. When the
/// application is reading at that moment the chunk is dropped, but the write clock still
/// advances so the next chunk lands at the right frame and the hole reads back as silence.
pub struct CaptureDevice {
    format: AudioFormat,
    state: RenderGate<CaptureRing>,
    write_clock: AtomicU64,
    running: AtomicBool,
    dropped_frames: AtomicU64,
}

impl CaptureDevice {
    pub fn new(format: AudioFormat, capacity_frames: usize) -> Result<Self> {
        format.validate()?;
        let ring = RingBuffer::new(capacity_frames, format.bytes_per_frame())?;
        log::info!(
            "Capture device created: {} Hz, {} channel(s), {} frames",
            format.sample_rate,
            format.channels,
            capacity_frames
        );
        Ok(Self {
            format,
            state: RenderGate::new(CaptureRing {
                ring,
                read_cursor: 0,
            }),
            write_clock: AtomicU64::new(0),
            running: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        })
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            log::debug!("Capture started");
        }
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::debug!("Capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Frames written by the device side since creation, including dropped ones
    pub fn write_clock(&self) -> u64 {
        self.write_clock.load(Ordering::SeqCst)
    }

    /// Frames lost to reader contention
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Device-side entry point. Returns true when the data was stored.
    pub fn push_input(&self, bytes: &[u8]) -> bool {
        if !self.is_running() {
            return false;
        }
        let frames = self.format.frames_in(bytes.len());
        if frames == 0 {
            return false;
        }
        let clock = self.write_clock.fetch_add(frames as u64, Ordering::SeqCst);

        let Some(mut state) = self.state.try_render() else {
            self.dropped_frames
                .fetch_add(frames as u64, Ordering::Relaxed);
            return false;
        };

        // Only the newest `capacity` frames of an oversized chunk can survive anyway.
        let capacity = state.ring.capacity_frames();
        let skip = frames.saturating_sub(capacity);
        let bpf = self.format.bytes_per_frame();
        let kept = frames - skip;
        state
            .ring
            .store(&bytes[skip * bpf..frames * bpf], kept, clock + skip as u64)
            .is_ok()
    }

    /// Frames ready to be read by [`capture_frames`](Self::capture_frames)
    pub fn available_frames(&self) -> Result<usize> {
        let mut state = self.state.lock()?;
        Ok(state.clamp_cursor() as usize)
    }

    /// Copy `frames` frames into `out` and advance the read cursor.
    pub fn capture_frames(&self, out: &mut [u8], frames: usize) -> Result<()> {
        let mut state = self.state.lock()?;
        let available = state.clamp_cursor();
        if frames as u64 > available {
            return Err(AlSonicError::InvalidValue(format!(
                "Requested {} frames but only {} are available",
                frames, available
            )));
        }
        let cursor = state.read_cursor;
        state.ring.fetch(out, frames, cursor)?;
        state.read_cursor += frames as u64;
        Ok(())
    }
}
