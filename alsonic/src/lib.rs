//! # alsonic
//!
//! The runtime core of an OpenAL-style 3D audio engine: buffers, sources with the
//! classic Initial/Playing/Paused/Stopped state machine, a listener, distance and cone
//! attenuation, doppler, and a render loop that feeds a bus-based mixer without ever
//! blocking on API threads.
//!
//! ## Quick Start
//!
//! ```no_run
//! use alsonic::*;
//! use std::sync::Arc;
//!
//! let context = Arc::new(AlSonicContext::new(AlSonicContextDesc::default())?);
//!
//! // Upload one second of 16-bit mono silence
//! let buffer = context.generate_buffers(1)?[0];
//! context.buffer_data(buffer, AudioFormat::mono16(44100), &vec![0u8; 88200])?;
//!
//! // Queue it on a source placed to the right of the listener
//! let source = context.generate_sources(1)?[0];
//! context.queue_buffers(source, &[buffer])?;
//! context.set_source_vec3(source, SourceVector::Position, Vec3::new(2.0, 0.0, 0.0))?;
//! context.play(source)?;
//!
//! // Drive the context from the default output device
//! let mut engine = AlSonicEngine::new(context.clone());
//! engine.start()?;
//!
//! for event in context.poll_events() {
//!     if let AlSonicEvent::QueueDrained { source_id } = event {
//!         println!("{} finished", source_id);
//!     }
//! }
//! # Ok::<(), AlSonicError>(())
//! ```
//!
//! ## Key Components
//!
//! - **[`AlSonicContext`]**: buffers, sources, listener and the render entry point
//! - **[`AlSonicEngine`]**: real-time driver that renders into a cpal output stream
//! - **[`BusMixer`]**: the mixing engine a context renders into; [`SoftwareMixer`] is built in
//! - **[`CaptureDevice`]**: capture ring fed by a device thread and read by the API
//! - **[`AlSonicEvent`]**: notifications produced in post-render
//!
//! ## Threading
//!
//! Any thread may call the context API. The render thread only ever *tries* to lock
//! the state it needs; when an API call is editing a source, that source is skipped
//! for the cycle. State changes that would click (stop, pause, rewind of a playing
//! source) are reported to the caller immediately, ramp the audio down over one
//! block, and are applied after the block is rendered.

pub mod buffer;
pub mod capture;
pub mod config;
pub mod context;
pub mod convert;
pub mod engine;
pub mod error;
pub mod events;
pub mod format;
pub mod gate;
pub mod math;
pub mod mixer;
pub mod resampler;
pub mod ring_buffer;
pub mod source;
pub mod spatial;

pub use buffer::BufferId;
pub use capture::CaptureDevice;
pub use config::AlSonicContextDesc;
pub use context::AlSonicContext;
pub use engine::AlSonicEngine;
pub use error::{AlSonicError, Result};
pub use events::AlSonicEvent;
pub use format::{AudioFormat, SampleEncoding};
pub use math::{Pose, Quat, Vec3};
pub use mixer::{BusHandle, BusMixer, BusParameters, SoftwareMixer};
pub use resampler::ResamplerQuality;
pub use source::{OffsetUnit, SourceFloat, SourceId, SourceOffset, SourceState, SourceType, SourceVector};
pub use spatial::{DistanceModel, Listener};
