//! Linear-interpolation sample-rate converter.
//!
//! Low quality, allocation-free after construction. The two input frames around the
//! read cursor are carried between calls, so rendering in several small chunks gives
//! the same output as rendering everything at once.

use super::{MAX_RATIO, MIN_RATIO, PullFn};

pub struct LinearResampler {
    channels: usize,
    /// Largest number of output frames produced by one inner pass
    max_output_frames: usize,
    /// `[cached frame 0, cached frame 1, pulled frames...]`, interleaved
    work: Vec<f32>,
    /// Fractional read cursor between cached frames 0 and 1
    position: f64,
    primed: bool,
}

impl LinearResampler {
    pub fn new(channels: usize, max_output_frames: usize) -> Self {
        let channels = channels.max(1);
        let max_output_frames = max_output_frames.max(1);
        let max_input_frames = (max_output_frames as f64 * MAX_RATIO).ceil() as usize + 2;
        Self {
            channels,
            max_output_frames,
            work: vec![0.0; max_input_frames * channels],
            position: 0.0,
            primed: false,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn reset(&mut self) {
        self.position = 0.0;
        self.primed = false;
        self.work[..2 * self.channels].fill(0.0);
    }

    /// Fill `output` (interleaved) by pulling source frames through `pull`.
    ///
    /// `ratio` is input frames per output frame. Returns the number of real
    /// (non-padding) frames `pull` reported.
    pub fn process(&mut self, output: &mut [f32], ratio: f64, pull: &mut PullFn<'_>) -> usize {
        let ratio = if ratio.is_finite() {
            ratio.clamp(MIN_RATIO, MAX_RATIO)
        } else {
            1.0
        };
        let mut pulled = 0;
        for chunk in output.chunks_mut(self.max_output_frames * self.channels) {
            pulled += self.process_chunk(chunk, ratio, pull);
        }
        pulled
    }

    fn process_chunk(&mut self, output: &mut [f32], ratio: f64, pull: &mut PullFn<'_>) -> usize {
        let ch = self.channels;
        let frames = output.len() / ch;
        let mut real = 0;

        if !self.primed {
            real += pull(&mut self.work[..2 * ch]);
            self.primed = true;
        }

        let end = self.position + frames as f64 * ratio;
        let consumed = end.floor() as usize;
        if consumed > 0 {
            real += pull(&mut self.work[2 * ch..(2 + consumed) * ch]);
        }

        for (i, out_frame) in output.chunks_exact_mut(ch).enumerate() {
            let pos = self.position + i as f64 * ratio;
            let index = pos.floor() as usize;
            let t = (pos - index as f64) as f32;
            let a = &self.work[index * ch..(index + 1) * ch];
            let b = &self.work[(index + 1) * ch..(index + 2) * ch];
            for c in 0..ch {
                out_frame[c] = a[c] + (b[c] - a[c]) * t;
            }
        }

        self.work.copy_within(consumed * ch..(consumed + 2) * ch, 0);
        self.position = end - consumed as f64;
        real
    }
}
