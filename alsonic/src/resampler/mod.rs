//! Per-source sample-rate conversion, used when the mixer cannot convert rates itself.

mod linear;
mod polynomial;

pub use linear::LinearResampler;
pub use polynomial::PolynomialResampler;

use crate::error::Result;

/// Smallest input/output ratio a resampler will run at
pub const MIN_RATIO: f64 = 1.0 / 256.0;
/// Largest input/output ratio; bounds the scratch space allocated up front
pub const MAX_RATIO: f64 = 16.0;

/// Source of input frames for a resampler.
///
/// Fills the whole interleaved slice (zero padding past the end of the data) and
/// returns how many frames were real data.
pub type PullFn<'a> = dyn FnMut(&mut [f32]) -> usize + 'a;

/// Converter used for sources whose rate differs from the mix rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerQuality {
    /// Linear interpolation: cheap, audible aliasing
    #[default]
    Linear,
    /// Cubic polynomial interpolation via rubato
    Polynomial,
}

pub enum SourceResampler {
    Linear(LinearResampler),
    Polynomial(PolynomialResampler),
}

impl SourceResampler {
    pub fn new(
        quality: ResamplerQuality,
        source_sample_rate: u32,
        target_sample_rate: u32,
        channels: usize,
        block_frames: usize,
    ) -> Result<Self> {
        Ok(match quality {
            ResamplerQuality::Linear => Self::Linear(LinearResampler::new(channels, block_frames)),
            ResamplerQuality::Polynomial => Self::Polynomial(PolynomialResampler::new(
                source_sample_rate,
                target_sample_rate,
                channels,
                block_frames,
            )?),
        })
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Linear(r) => r.channels(),
            Self::Polynomial(r) => r.channels(),
        }
    }

    pub fn process(&mut self, output: &mut [f32], ratio: f64, pull: &mut PullFn<'_>) -> usize {
        match self {
            Self::Linear(r) => r.process(output, ratio, pull),
            Self::Polynomial(r) => r.process(output, ratio, pull),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Linear(r) => r.reset(),
            Self::Polynomial(r) => r.reset(),
        }
    }
}
