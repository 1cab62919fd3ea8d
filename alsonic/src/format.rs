//! Linear PCM format descriptors.

use crate::error::{AlSonicError, Result};

/// How individual samples are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    /// Unsigned integer centred on the midpoint (8-bit PCM)
    UnsignedInt,
    /// Two's complement little-endian integer (16-bit PCM)
    SignedInt,
    /// IEEE float, native endian (32-bit)
    Float,
}

/// Format of the PCM data held by a buffer.
///
/// Only linear, interleaved, uncompressed PCM is accepted, so `frames_per_packet`
/// is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_channel: u16,
    pub encoding: SampleEncoding,
    pub frames_per_packet: u32,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_channel: u16, encoding: SampleEncoding) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_channel,
            encoding,
            frames_per_packet: 1,
        }
    }

    pub fn mono8(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, 8, SampleEncoding::UnsignedInt)
    }

    pub fn mono16(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, 16, SampleEncoding::SignedInt)
    }

    pub fn stereo8(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, 8, SampleEncoding::UnsignedInt)
    }

    pub fn stereo16(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, 16, SampleEncoding::SignedInt)
    }

    pub fn mono_f32(sample_rate: u32) -> Self {
        Self::new(sample_rate, 1, 32, SampleEncoding::Float)
    }

    pub fn stereo_f32(sample_rate: u32) -> Self {
        Self::new(sample_rate, 2, 32, SampleEncoding::Float)
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_channel as usize / 8
    }

    pub fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// Whole frames contained in `bytes` bytes of data
    pub fn frames_in(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            bpf => bytes / bpf,
        }
    }

    /// True when the data can be copied straight into a mixer bus
    pub fn is_mixer_format(&self) -> bool {
        self.encoding == SampleEncoding::Float && self.bits_per_channel == 32
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AlSonicError::InvalidValue(
                "Sample rate must be greater than 0".to_string(),
            ));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(AlSonicError::Unsupported(format!(
                "{} channels (only mono and stereo buffers are supported)",
                self.channels
            )));
        }
        if self.frames_per_packet != 1 {
            return Err(AlSonicError::Unsupported(
                "Packetized formats are not supported".to_string(),
            ));
        }
        let supported = matches!(
            (self.encoding, self.bits_per_channel),
            (SampleEncoding::UnsignedInt, 8)
                | (SampleEncoding::SignedInt, 16)
                | (SampleEncoding::Float, 32)
        );
        if !supported {
            return Err(AlSonicError::Unsupported(format!(
                "{:?} samples of {} bits",
                self.encoding, self.bits_per_channel
            )));
        }
        Ok(())
    }

    /// True when buffers of both formats may share one source queue
    pub fn is_queue_compatible(&self, other: &AudioFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_sizes() {
        assert_eq!(AudioFormat::mono8(8000).bytes_per_frame(), 1);
        assert_eq!(AudioFormat::stereo16(44100).bytes_per_frame(), 4);
        assert_eq!(AudioFormat::stereo_f32(48000).bytes_per_frame(), 8);
        assert_eq!(AudioFormat::mono16(44100).frames_in(8821), 4410);
    }

    #[test]
    fn validation() {
        assert!(AudioFormat::mono16(44100).validate().is_ok());
        assert!(matches!(
            AudioFormat::new(44100, 1, 24, SampleEncoding::SignedInt).validate(),
            Err(AlSonicError::Unsupported(_))
        ));
        assert!(matches!(
            AudioFormat::new(44100, 6, 16, SampleEncoding::SignedInt).validate(),
            Err(AlSonicError::Unsupported(_))
        ));
        assert!(matches!(
            AudioFormat::mono16(0).validate(),
            Err(AlSonicError::InvalidValue(_))
        ));
    }

    #[test]
    fn queue_compatibility_ignores_encoding() {
        assert!(AudioFormat::mono16(22050).is_queue_compatible(&AudioFormat::mono8(22050)));
        assert!(!AudioFormat::mono16(22050).is_queue_compatible(&AudioFormat::mono16(44100)));
        assert!(!AudioFormat::mono16(22050).is_queue_compatible(&AudioFormat::stereo16(22050)));
    }
}
