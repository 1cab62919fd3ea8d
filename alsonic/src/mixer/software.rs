use super::{BusHandle, BusMixer, BusParameters, db_to_gain};
use crate::error::{AlSonicError, Result};
use crate::spatial::{DistanceModel, distance_gain};
use std::f32::consts::FRAC_PI_4;

struct Bus {
    allocated: bool,
    channels: u16,
    params: BusParameters,
    input: Vec<f32>,
    written: bool,
}

/// Summing mixer with equal-power panning for mono buses.
///
/// Applies gain, occlusion, obstruction and (for inverse-clamped sources) the
/// distance curve. No rate conversion and no other DSP.
pub struct SoftwareMixer {
    buses: Vec<Bus>,
    free: Vec<u32>,
    block_size: usize,
    output_channels: u16,
}

impl SoftwareMixer {
    pub fn new(max_buses: usize, block_size: usize, output_channels: u16) -> Self {
        let buses = (0..max_buses)
            .map(|_| Bus {
                allocated: false,
                channels: 1,
                params: BusParameters::default(),
                input: vec![0.0; block_size * 2],
                written: false,
            })
            .collect();
        // pop() hands out the lowest index first
        let free = (0..max_buses as u32).rev().collect();
        Self {
            buses,
            free,
            block_size,
            output_channels,
        }
    }

    pub fn active_buses(&self) -> usize {
        self.buses.len() - self.free.len()
    }

    fn bus_mut(&mut self, bus: BusHandle) -> Option<&mut Bus> {
        self.buses
            .get_mut(bus.index() as usize)
            .filter(|b| b.allocated)
    }

    fn effective_gain(params: &BusParameters) -> f32 {
        let mut gain = params.gain;
        if let Some((model, distance)) = params.distance_params {
            gain *= distance_gain(model, params.distance, &distance);
            gain = gain.clamp(params.min_gain, params.max_gain.max(params.min_gain));
        }
        gain * params.listener_gain * db_to_gain(params.occlusion) * db_to_gain(params.obstruction)
    }
}

/// Left/right weights for a mono bus at `azimuth` degrees
fn pan_weights(azimuth: f32) -> (f32, f32) {
    let pan = azimuth.to_radians().sin().clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

impl BusMixer for SoftwareMixer {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn output_channels(&self) -> u16 {
        self.output_channels
    }

    fn allocate_bus(&mut self, channels: u16) -> Result<BusHandle> {
        if !(1..=2).contains(&channels) {
            return Err(AlSonicError::Unsupported(format!(
                "{} channel bus",
                channels
            )));
        }
        let index = self.free.pop().ok_or_else(|| {
            AlSonicError::ResourceExhausted(format!(
                "All {} mixer buses are in use",
                self.buses.len()
            ))
        })?;
        let bus = &mut self.buses[index as usize];
        bus.allocated = true;
        bus.channels = channels;
        bus.params = BusParameters::default();
        bus.written = false;
        Ok(BusHandle::new(index))
    }

    fn release_bus(&mut self, bus: BusHandle) {
        if let Some(b) = self.bus_mut(bus) {
            b.allocated = false;
            b.written = false;
            self.free.push(bus.index());
        }
    }

    // Buses always run at the mix rate; sources resample before writing.
    fn set_bus_format(&mut self, bus: BusHandle, _sample_rate: u32, channels: u16) -> Result<()> {
        if !(1..=2).contains(&channels) {
            return Err(AlSonicError::Unsupported(format!(
                "{} channel bus",
                channels
            )));
        }
        let b = self
            .bus_mut(bus)
            .ok_or_else(|| AlSonicError::InvalidOperation(format!("{} is not allocated", bus)))?;
        b.channels = channels;
        Ok(())
    }

    fn set_bus_parameters(&mut self, bus: BusHandle, params: &BusParameters) {
        if let Some(b) = self.bus_mut(bus) {
            b.params = *params;
        }
    }

    fn bus_input(&mut self, bus: BusHandle) -> Option<&mut [f32]> {
        let block = self.block_size;
        let b = self.bus_mut(bus)?;
        b.written = true;
        let len = block * b.channels as usize;
        Some(&mut b.input[..len])
    }

    fn mix_into(&mut self, output: &mut [f32]) {
        let out_channels = self.output_channels as usize;
        let frames = (output.len() / out_channels).min(self.block_size);

        for bus in self.buses.iter_mut().filter(|b| b.allocated && b.written) {
            bus.written = false;
            let gain = Self::effective_gain(&bus.params);
            if gain <= 0.0 {
                continue;
            }
            let input = &bus.input;
            let out = &mut output[..frames * out_channels];

            match (bus.channels, out_channels) {
                (1, 2) => {
                    let (left, right) = pan_weights(bus.params.azimuth);
                    for (frame, s) in out.chunks_exact_mut(2).zip(input.iter()) {
                        frame[0] += s * gain * left;
                        frame[1] += s * gain * right;
                    }
                }
                (2, 2) => {
                    for (o, s) in out.iter_mut().zip(input.iter()) {
                        *o += s * gain;
                    }
                }
                (1, _) => {
                    for (o, s) in out.iter_mut().zip(input.iter()) {
                        *o += s * gain;
                    }
                }
                _ => {
                    for (o, pair) in out.iter_mut().zip(input.chunks_exact(2)) {
                        *o += (pair[0] + pair[1]) * 0.5 * gain;
                    }
                }
            }
        }
    }

    fn supports_rate_conversion(&self) -> bool {
        false
    }

    fn supports_native_distance(&self, model: DistanceModel) -> bool {
        model == DistanceModel::InverseClamped
    }
}
