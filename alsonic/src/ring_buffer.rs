//! Fixed-capacity circular store of PCM frames addressed by absolute frame number.
//!
//! Overrun never fails: writes that jump ahead resync the window forward and old
//! data is silently overwritten. Underrun fails atomically: a fetch either returns
//! every requested frame or touches nothing.

use crate::error::{AlSonicError, Result};

pub struct RingBuffer {
    data: Vec<u8>,
    capacity_frames: usize,
    bytes_per_frame: usize,
    start_frame: u64,
    end_frame: u64,
}

impl RingBuffer {
    pub fn new(capacity_frames: usize, bytes_per_frame: usize) -> Result<Self> {
        if capacity_frames == 0 || bytes_per_frame == 0 {
            return Err(AlSonicError::InvalidValue(
                "Ring buffer capacity and frame size must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            data: vec![0; capacity_frames * bytes_per_frame],
            capacity_frames,
            bytes_per_frame,
            start_frame: 0,
            end_frame: 0,
        })
    }

    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_frame
    }

    /// `(start, end)` of the readable window; frames in `[start, end)` can be fetched
    pub fn time_bounds(&self) -> (u64, u64) {
        (self.start_frame, self.end_frame)
    }

    /// Drop everything and restart the window at `frame`
    pub fn reset_to(&mut self, frame: u64) {
        self.start_frame = frame;
        self.end_frame = frame;
    }

    /// Write `frames` frames from `data` at absolute position `start_frame`.
    pub fn store(&mut self, data: &[u8], frames: usize, start_frame: u64) -> Result<()> {
        if frames > self.capacity_frames {
            return Err(AlSonicError::InvalidValue(format!(
                "Cannot store {} frames in a ring of {} frames",
                frames, self.capacity_frames
            )));
        }
        let bytes = frames * self.bytes_per_frame;
        if data.len() < bytes {
            return Err(AlSonicError::InvalidValue(format!(
                "Store of {} frames needs {} bytes, got {}",
                frames,
                bytes,
                data.len()
            )));
        }
        if frames == 0 {
            return Ok(());
        }
        let end_frame = start_frame.checked_add(frames as u64).ok_or_else(|| {
            AlSonicError::InvalidValue(format!(
                "Store of {} frames at {} runs past the last frame number",
                frames, start_frame
            ))
        })?;

        let capacity = self.capacity_frames as u64;
        if start_frame < self.end_frame || start_frame - self.end_frame > capacity {
            // Going backwards or jumping more than a whole ring ahead: nothing in the
            // old window is contiguous with the new data.
            self.reset_to(start_frame);
        } else if start_frame > self.end_frame {
            let gap = start_frame - self.end_frame;
            self.zero_frames(self.end_frame, gap as usize);
        }

        self.copy_in(start_frame, &data[..bytes]);

        self.end_frame = end_frame;
        if self.end_frame - self.start_frame > capacity {
            self.start_frame = self.end_frame - capacity;
        }
        Ok(())
    }

    /// Read `frames` frames starting at absolute position `start_frame` into `out`.
    ///
    /// Fails with `InvalidOperation` and leaves `out` untouched unless the whole range
    /// lies within [`time_bounds`](Self::time_bounds).
    pub fn fetch(&self, out: &mut [u8], frames: usize, start_frame: u64) -> Result<()> {
        let bytes = frames * self.bytes_per_frame;
        if out.len() < bytes {
            return Err(AlSonicError::InvalidValue(format!(
                "Fetch of {} frames needs {} bytes, got {}",
                frames,
                bytes,
                out.len()
            )));
        }
        if frames == 0 {
            return Ok(());
        }
        let end = start_frame.checked_add(frames as u64);
        if start_frame < self.start_frame || end.is_none_or(|end| end > self.end_frame) {
            return Err(AlSonicError::InvalidOperation(format!(
                "{} frames from {} are outside the ring window [{}, {})",
                frames, start_frame, self.start_frame, self.end_frame
            )));
        }

        let offset = self.byte_offset(start_frame);
        let first = bytes.min(self.data.len() - offset);
        out[..first].copy_from_slice(&self.data[offset..offset + first]);
        out[first..bytes].copy_from_slice(&self.data[..bytes - first]);
        Ok(())
    }

    fn byte_offset(&self, frame: u64) -> usize {
        (frame % self.capacity_frames as u64) as usize * self.bytes_per_frame
    }

    fn copy_in(&mut self, frame: u64, src: &[u8]) {
        let offset = self.byte_offset(frame);
        let first = src.len().min(self.data.len() - offset);
        self.data[offset..offset + first].copy_from_slice(&src[..first]);
        let rest = src.len() - first;
        self.data[..rest].copy_from_slice(&src[first..]);
    }

    fn zero_frames(&mut self, frame: u64, frames: usize) {
        let bytes = frames.min(self.capacity_frames) * self.bytes_per_frame;
        let offset = self.byte_offset(frame);
        let first = bytes.min(self.data.len() - offset);
        self.data[offset..offset + first].fill(0);
        self.data[..bytes - first].fill(0);
    }
}
