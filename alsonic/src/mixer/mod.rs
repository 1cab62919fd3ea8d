//! Contract with the downstream bus-based mixing engine.
//!
//! A playing source owns one bus. Every render cycle it writes a block of f32 PCM
//! into the bus input and updates the bus parameters; the context then asks the
//! mixer to sum all buses into the output block.

mod software;

pub use software::SoftwareMixer;

use crate::error::Result;
use crate::spatial::{DistanceModel, DistanceParams};

/// Opaque handle to a mixer input bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusHandle(u32);

impl BusHandle {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bus({})", self.0)
    }
}

/// Per-cycle parameters of a bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BusParameters {
    /// Linear source gain, already including cone attenuation and, unless
    /// `distance_params` is set, the distance curve and min/max clamp
    pub gain: f32,
    /// Listener gain, applied after the min/max clamp
    pub listener_gain: f32,
    pub distance: f32,
    /// Degrees, positive to the right of the listener
    pub azimuth: f32,
    /// Degrees, positive above the listener
    pub elevation: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub reverb_send: f32,
    /// Attenuation in dB (<= 0)
    pub occlusion: f32,
    /// Attenuation in dB (<= 0)
    pub obstruction: f32,
    /// Pitch times doppler, for mixers that convert rates themselves
    pub playback_rate: f32,
    /// Present when the mixer applies the distance curve itself
    pub distance_params: Option<(DistanceModel, DistanceParams)>,
}

impl Default for BusParameters {
    fn default() -> Self {
        Self {
            gain: 1.0,
            listener_gain: 1.0,
            distance: 0.0,
            azimuth: 0.0,
            elevation: 0.0,
            min_gain: 0.0,
            max_gain: 1.0,
            reverb_send: 0.0,
            occlusion: 0.0,
            obstruction: 0.0,
            playback_rate: 1.0,
            distance_params: None,
        }
    }
}

/// Bus-based mixing engine fed by the sources of one context.
///
/// Allocation happens on API threads under the context's mixer gate, never on the
/// render thread. `set_bus_parameters`, `bus_input`, `mix_into` and `release_bus` run
/// on the render thread and must neither block nor allocate. `set_bus_format` also
/// runs there when a source restarts on its bus with a differently shaped queue; it
/// may allocate only when it fails.
pub trait BusMixer: Send {
    /// Frames per render block
    fn block_size(&self) -> usize;

    fn output_channels(&self) -> u16;

    fn allocate_bus(&mut self, channels: u16) -> Result<BusHandle>;

    fn release_bus(&mut self, bus: BusHandle);

    fn set_bus_format(&mut self, bus: BusHandle, sample_rate: u32, channels: u16) -> Result<()>;

    fn set_bus_parameters(&mut self, bus: BusHandle, params: &BusParameters);

    /// Destination for one block of interleaved PCM in the bus format.
    ///
    /// Returns `None` for a released or unknown bus.
    fn bus_input(&mut self, bus: BusHandle) -> Option<&mut [f32]>;

    /// Add every bus written since the last call into `output` (interleaved)
    fn mix_into(&mut self, output: &mut [f32]);

    /// True when buses accept any sample rate and `playback_rate`
    fn supports_rate_conversion(&self) -> bool;

    /// True when `distance_params` for `model` are honoured
    fn supports_native_distance(&self, model: DistanceModel) -> bool;
}

/// Convert an attenuation in dB to a linear gain
pub fn db_to_gain(db: f32) -> f32 {
    if db.is_finite() {
        10f32.powf(db / 20.0)
    } else if db < 0.0 {
        0.0
    } else {
        1.0
    }
}
