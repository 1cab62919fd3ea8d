//! Linear PCM decoding into the mixer's interleaved f32 format.

use crate::error::{AlSonicError, Result};
use crate::format::{AudioFormat, SampleEncoding};
use std::collections::HashMap;

/// Converters a single source may hold at once
pub const MAX_CONVERTERS: usize = 16;

/// Index into a source's converter cache. `MIXER` means no conversion is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConverterId(u16);

impl ConverterId {
    pub const MIXER: ConverterId = ConverterId(0);

    pub fn is_mixer(self) -> bool {
        self == Self::MIXER
    }
}

/// Decodes one buffer format into f32 with the same rate and channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatConverter {
    source: AudioFormat,
}

impl FormatConverter {
    pub fn new(source: AudioFormat, target: AudioFormat) -> Result<Self> {
        source.validate()?;
        if !target.is_mixer_format() {
            return Err(AlSonicError::Unsupported(
                "Converters only produce 32-bit float output".to_string(),
            ));
        }
        if !source.is_queue_compatible(&target) {
            return Err(AlSonicError::Unsupported(format!(
                "Cannot convert {} Hz/{} ch to {} Hz/{} ch",
                source.sample_rate, source.channels, target.sample_rate, target.channels
            )));
        }
        Ok(Self { source })
    }

    pub fn source_format(&self) -> AudioFormat {
        self.source
    }

    /// Decode as many whole frames as fit in both slices; returns frames written.
    pub fn convert(&self, input: &[u8], output: &mut [f32]) -> usize {
        decode(self.source.encoding, self.source.channels, input, output)
    }
}

/// Decode f32 data already in the mixer format
pub fn copy_mixer_format(channels: u16, input: &[u8], output: &mut [f32]) -> usize {
    decode(SampleEncoding::Float, channels, input, output)
}

fn decode(encoding: SampleEncoding, channels: u16, input: &[u8], output: &mut [f32]) -> usize {
    let channels = channels.max(1) as usize;
    let width = match encoding {
        SampleEncoding::UnsignedInt => 1,
        SampleEncoding::SignedInt => 2,
        SampleEncoding::Float => 4,
    };
    let frames = (input.len() / (width * channels)).min(output.len() / channels);
    let samples = frames * channels;
    let out = &mut output[..samples];

    match encoding {
        SampleEncoding::UnsignedInt => {
            for (o, b) in out.iter_mut().zip(input) {
                *o = (*b as f32 - 128.0) / 128.0;
            }
        }
        SampleEncoding::SignedInt => {
            for (o, b) in out.iter_mut().zip(input.chunks_exact(2)) {
                *o = i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0;
            }
        }
        SampleEncoding::Float => {
            for (o, b) in out.iter_mut().zip(input.chunks_exact(4)) {
                *o = f32::from_ne_bytes([b[0], b[1], b[2], b[3]]);
            }
        }
    }
    frames
}

/// Per-source cache of converters keyed by buffer format.
///
/// Slots freed by [`retain_used`](Self::retain_used) are handed out again, so ids
/// of converters still in use never move.
#[derive(Debug, Default)]
pub struct ConverterCache {
    slots: Vec<Option<FormatConverter>>,
    by_format: HashMap<AudioFormat, ConverterId>,
}

impl ConverterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converter for `format`, created on first use. API side only.
    pub fn converter_for(&mut self, format: AudioFormat) -> Result<ConverterId> {
        if format.is_mixer_format() {
            return Ok(ConverterId::MIXER);
        }
        if let Some(id) = self.by_format.get(&format) {
            return Ok(*id);
        }
        self.ensure_room(&[format])?;
        let target = AudioFormat::new(format.sample_rate, format.channels, 32, SampleEncoding::Float);
        let converter = FormatConverter::new(format, target)?;
        let index = match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(converter);
                index
            }
            None => {
                self.slots.push(Some(converter));
                self.slots.len() - 1
            }
        };
        let id = ConverterId(index as u16 + 1);
        self.by_format.insert(format, id);
        log::debug!("Created converter {:?} for {:?}", id, format);
        Ok(id)
    }

    /// Fail unless converters for all of `formats` fit, without creating any
    pub fn ensure_room(&self, formats: &[AudioFormat]) -> Result<()> {
        let mut missing: Vec<AudioFormat> = Vec::new();
        for format in formats {
            if !format.is_mixer_format()
                && !self.by_format.contains_key(format)
                && !missing.contains(format)
            {
                missing.push(*format);
            }
        }
        if self.len() + missing.len() > MAX_CONVERTERS {
            return Err(AlSonicError::ResourceExhausted(format!(
                "A source may hold at most {} format converters",
                MAX_CONVERTERS
            )));
        }
        Ok(())
    }

    /// Free every converter whose id is not in `used`. API side only.
    pub fn retain_used(&mut self, used: &[ConverterId]) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_some() && !used.contains(&ConverterId(index as u16 + 1)) {
                *slot = None;
            }
        }
        self.by_format.retain(|_, id| used.contains(id));
    }

    pub fn get(&self, id: ConverterId) -> Option<&FormatConverter> {
        (id.0 as usize)
            .checked_sub(1)
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    /// Converters currently held
    pub fn len(&self) -> usize {
        self.by_format.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_format.is_empty()
    }

    /// Decode with converter `id`, or copy when `id` is the mixer format
    pub fn convert(&self, id: ConverterId, channels: u16, input: &[u8], output: &mut [f32]) -> usize {
        if id.is_mixer() {
            return copy_mixer_format(channels, input, output);
        }
        match self.get(id) {
            Some(converter) => converter.convert(input, output),
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_u8() {
        let converter =
            FormatConverter::new(AudioFormat::mono8(8000), AudioFormat::mono_f32(8000)).unwrap();
        let mut out = [9.0f32; 3];
        assert_eq!(converter.convert(&[0, 128, 255], &mut out), 3);
        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!((out[2] - 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn decodes_i16_little_endian() {
        let converter = FormatConverter::new(
            AudioFormat::stereo16(44100),
            AudioFormat::stereo_f32(44100),
        )
        .unwrap();
        let bytes = [0x00, 0x80, 0xff, 0x7f, 0x00, 0x40, 0x00, 0x00];
        let mut out = [0.0f32; 4];
        assert_eq!(converter.convert(&bytes, &mut out), 2);
        assert_eq!(out[0], -1.0);
        assert!((out[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(out[2], 0.5);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn copies_f32_and_stops_at_shorter_slice() {
        let data: Vec<u8> = [0.25f32, -0.5, 1.0]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let mut out = [0.0f32; 2];
        assert_eq!(copy_mixer_format(1, &data, &mut out), 2);
        assert_eq!(out, [0.25, -0.5]);
    }

    #[test]
    fn cache_reuses_and_bounds_converters() {
        let mut cache = ConverterCache::new();
        assert_eq!(
            cache.converter_for(AudioFormat::mono_f32(44100)).unwrap(),
            ConverterId::MIXER
        );
        let a = cache.converter_for(AudioFormat::mono16(44100)).unwrap();
        assert_eq!(cache.converter_for(AudioFormat::mono16(44100)).unwrap(), a);
        assert_eq!(cache.len(), 1);

        for rate in 1..MAX_CONVERTERS as u32 {
            cache.converter_for(AudioFormat::mono8(rate * 1000)).unwrap();
        }
        assert!(matches!(
            cache.converter_for(AudioFormat::stereo8(96000)),
            Err(AlSonicError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn room_check_counts_only_new_formats() {
        let mut cache = ConverterCache::new();
        for rate in 0..MAX_CONVERTERS as u32 - 1 {
            cache.converter_for(AudioFormat::mono8(8000 + rate)).unwrap();
        }
        let known = AudioFormat::mono8(8000);
        let fresh = AudioFormat::mono16(8000);
        let extra = AudioFormat::stereo16(8000);
        cache
            .ensure_room(&[known, fresh, fresh, AudioFormat::mono_f32(8000)])
            .unwrap();
        assert!(matches!(
            cache.ensure_room(&[fresh, extra]),
            Err(AlSonicError::ResourceExhausted(_))
        ));
        assert_eq!(cache.len(), MAX_CONVERTERS - 1);
    }

    #[test]
    fn unused_converters_free_their_slots() {
        let mut cache = ConverterCache::new();
        let a = cache.converter_for(AudioFormat::mono8(8000)).unwrap();
        let b = cache.converter_for(AudioFormat::mono16(8000)).unwrap();
        let c = cache.converter_for(AudioFormat::stereo8(8000)).unwrap();

        cache.retain_used(&[ConverterId::MIXER, c]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(a).is_none() && cache.get(b).is_none());
        assert!(cache.get(c).is_some());

        // freed slots are reused and the survivor keeps its id
        let d = cache.converter_for(AudioFormat::stereo16(8000)).unwrap();
        assert_eq!(d, a);
        assert_eq!(cache.converter_for(AudioFormat::stereo8(8000)).unwrap(), c);

        for rate in 0..MAX_CONVERTERS as u32 - 2 {
            cache.converter_for(AudioFormat::mono8(9000 + rate)).unwrap();
        }
        assert_eq!(cache.len(), MAX_CONVERTERS);
        cache.retain_used(&[]);
        assert!(cache.is_empty());
        cache.converter_for(AudioFormat::mono8(8000)).unwrap();
    }

    #[test]
    fn rejects_rate_change() {
        assert!(matches!(
            FormatConverter::new(AudioFormat::mono16(22050), AudioFormat::mono_f32(44100)),
            Err(AlSonicError::Unsupported(_))
        ));
    }
}
