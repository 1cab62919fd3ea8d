use crate::error::{AlSonicError, Result};
use crate::resampler::ResamplerQuality;
use crate::spatial::DistanceModel;

/// Configuration descriptor for an alsonic context
#[derive(Debug, Clone)]
pub struct AlSonicContextDesc {
    /// Output sample rate of the mix
    pub sample_rate: u32,
    /// Number of output channels (1 or 2)
    pub channels: u16,
    /// Frames produced per render cycle. Every source renders exactly this many frames
    /// per cycle, and ramps span one cycle.
    pub block_size: usize,
    /// Number of mixer buses, i.e. the maximum number of simultaneously playing sources
    pub max_buses: usize,
    /// Attenuation curve applied to spatialized sources
    pub distance_model: DistanceModel,
    /// Doppler exaggeration factor (0 disables doppler)
    pub doppler_factor: f32,
    /// Speed of sound in world units per second
    pub speed_of_sound: f32,
    /// Sample-rate converter used by sources whose rate differs from the mix rate
    pub resampler_quality: ResamplerQuality,
    /// Capacity of the notification channel; events beyond it are dropped
    pub notification_capacity: usize,
    /// Deliver notifications on a dedicated thread instead of through `poll_events`
    pub dispatch_notifications: bool,
    /// Size of the output driver's ring in render blocks
    pub engine_buffer_blocks: usize,
}

impl Default for AlSonicContextDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_size: 512,
            max_buses: 64,
            distance_model: DistanceModel::InverseClamped,
            doppler_factor: 1.0,
            speed_of_sound: 343.3,
            resampler_quality: ResamplerQuality::Linear,
            notification_capacity: 256,
            dispatch_notifications: false,
            engine_buffer_blocks: 4,
        }
    }
}

impl AlSonicContextDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn max_buses(mut self, max: usize) -> Self {
        self.max_buses = max;
        self
    }

    pub fn distance_model(mut self, model: DistanceModel) -> Self {
        self.distance_model = model;
        self
    }

    pub fn doppler_factor(mut self, factor: f32) -> Self {
        self.doppler_factor = factor;
        self
    }

    pub fn speed_of_sound(mut self, speed: f32) -> Self {
        self.speed_of_sound = speed;
        self
    }

    pub fn resampler_quality(mut self, quality: ResamplerQuality) -> Self {
        self.resampler_quality = quality;
        self
    }

    pub fn dispatch_notifications(mut self, dispatch: bool) -> Self {
        self.dispatch_notifications = dispatch;
        self
    }

    /// Check the descriptor before a context is built from it
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AlSonicError::InvalidValue(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(AlSonicError::Unsupported(format!(
                "Output channel count {} (only mono and stereo mixes are supported)",
                self.channels
            )));
        }
        if self.block_size == 0 {
            return Err(AlSonicError::InvalidValue(
                "Block size must be greater than 0".to_string(),
            ));
        }
        if self.max_buses == 0 {
            return Err(AlSonicError::InvalidValue(
                "At least one mixer bus is required".to_string(),
            ));
        }
        if !(self.doppler_factor >= 0.0 && self.doppler_factor.is_finite()) {
            return Err(AlSonicError::InvalidValue(format!(
                "Doppler factor {} must be finite and non-negative",
                self.doppler_factor
            )));
        }
        if !(self.speed_of_sound > 0.0 && self.speed_of_sound.is_finite()) {
            return Err(AlSonicError::InvalidValue(format!(
                "Speed of sound {} must be finite and positive",
                self.speed_of_sound
            )));
        }
        if self.notification_capacity == 0 || self.engine_buffer_blocks < 2 {
            return Err(AlSonicError::InvalidValue(
                "Notification capacity and engine ring size must be non-trivial".to_string(),
            ));
        }
        Ok(())
    }
}
