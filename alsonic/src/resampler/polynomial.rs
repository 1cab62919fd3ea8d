use super::{PullFn, MAX_RATIO};
use crate::error::{AlSonicError, Result};
use rubato::{FastFixedOut, PolynomialDegree, Resampler};

/// Higher-quality converter built on rubato's fixed-output polynomial resampler.
///
/// rubato works in chunks of `chunk_frames` output frames; output that does not line
/// up with a chunk boundary is served from the previous chunk first.
pub struct PolynomialResampler {
    inner: FastFixedOut<f32>,
    channels: usize,
    /// Output frames per input frame at unit pitch
    base_ratio: f64,
    input: Vec<Vec<f32>>,
    output: Vec<Vec<f32>>,
    interleaved: Vec<f32>,
    ready: usize,
    cursor: usize,
}

impl PolynomialResampler {
    pub fn new(
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: usize,
        chunk_frames: usize,
    ) -> Result<Self> {
        if source_sample_rate == 0 || target_sample_rate == 0 {
            return Err(AlSonicError::InvalidValue(
                "Sample rates must be greater than 0".to_string(),
            ));
        }
        let channels = channels.max(1);
        let base_ratio = target_sample_rate as f64 / source_sample_rate as f64;

        log::debug!(
            "Creating polynomial resampler: {} Hz -> {} Hz ({} frame chunks)",
            source_sample_rate,
            target_sample_rate,
            chunk_frames
        );

        let inner = FastFixedOut::<f32>::new(
            base_ratio,
            MAX_RATIO,
            PolynomialDegree::Cubic,
            chunk_frames.max(1),
            channels,
        )
        .map_err(|e| {
            AlSonicError::Unsupported(format!("Failed to create polynomial resampler: {}", e))
        })?;

        let max_in = inner.input_frames_max();
        let max_out = inner.output_frames_max();
        Ok(Self {
            inner,
            channels,
            base_ratio,
            input: vec![vec![0.0; max_in]; channels],
            output: vec![vec![0.0; max_out]; channels],
            interleaved: vec![0.0; max_in * channels],
            ready: 0,
            cursor: 0,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.ready = 0;
        self.cursor = 0;
    }

    /// Same contract as [`LinearResampler::process`](super::LinearResampler::process).
    pub fn process(&mut self, output: &mut [f32], ratio: f64, pull: &mut PullFn<'_>) -> usize {
        let target = if ratio.is_finite() && ratio > 0.0 {
            // stay just inside the range rubato was built for
            let slack = MAX_RATIO * 0.999;
            (1.0 / ratio).clamp(self.base_ratio / slack, self.base_ratio * slack)
        } else {
            self.base_ratio
        };
        if self.inner.set_resample_ratio(target, false).is_err()
            && self.inner.set_resample_ratio(self.base_ratio, false).is_err()
        {
            output.fill(0.0);
            return 0;
        }

        let ch = self.channels;
        let mut real = 0;
        for frame in output.chunks_exact_mut(ch) {
            if self.cursor >= self.ready {
                real += self.refill(pull);
            }
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = self.output[c][self.cursor];
            }
            self.cursor += 1;
        }
        real
    }

    fn refill(&mut self, pull: &mut PullFn<'_>) -> usize {
        let ch = self.channels;
        let needed = self.inner.input_frames_next();
        let real = pull(&mut self.interleaved[..needed * ch]);

        for (i, frame) in self.interleaved[..needed * ch].chunks_exact(ch).enumerate() {
            for (c, sample) in frame.iter().enumerate() {
                self.input[c][i] = *sample;
            }
        }

        let produced = self.inner.output_frames_next();
        if self
            .inner
            .process_into_buffer(&self.input, &mut self.output, None)
            .is_err()
        {
            for channel in self.output.iter_mut() {
                channel[..produced].fill(0.0);
            }
        }
        self.ready = produced;
        self.cursor = 0;
        real
    }
}
