//! Render-thread half of a source: filling the bus and settling transitions.
//!
//! Nothing here blocks, logs or allocates. The only locks involved were taken
//! with `try_render` by the context before calling in. Buses are never allocated
//! here: a source restarted by a posted `Play` keeps the bus it was stopping on.

use super::{PlaybackState, Ramp, RenderNotes, SourceCore, SourceMessage, SourceQueues};
use super::queue::{PullOutcome, QueueEntry};
use crate::context::SceneSnapshot;
use crate::convert::ConverterCache;
use crate::events::{AlSonicEvent, EventSink};
use crate::math::Vec3;
use crate::mixer::{BusMixer, BusParameters};
use crate::spatial::{cone_angle, cone_gain, distance_gain, doppler_shift};

/// What one render cycle hands to every source
pub(crate) struct RenderContext<'a> {
    pub(crate) mixer: &'a mut dyn BusMixer,
    pub(crate) scene: &'a SceneSnapshot,
    pub(crate) events: &'a EventSink,
}

impl SourceCore {
    /// Render one block into the source's bus.
    pub(crate) fn render(&mut self, cx: &mut RenderContext<'_>) {
        self.notes = RenderNotes::default();
        let Some(bus) = self.bus else { return };
        if !self.state.is_rendering() {
            return;
        }
        // Ramp-down finished; hold silence until post-render applies what it was for.
        if self.ramp == Ramp::Complete {
            return;
        }

        let (params, doppler) = self.bus_parameters(cx.scene, &*cx.mixer);
        let pitch = self.params.pitch * doppler;
        cx.mixer.set_bus_parameters(
            bus,
            &BusParameters {
                playback_rate: pitch,
                ..params
            },
        );

        let channels = self.bus_channels as usize;
        let mix_rate = self.setup.mix_rate;
        let Self {
            queues,
            converters,
            resampler,
            notes,
            params: source_params,
            ramp,
            ..
        } = self;
        let Some(input) = cx.mixer.bus_input(bus) else {
            notes.starved = true;
            return;
        };
        let looping = source_params.looping;

        let queue_channels = queues.current_format().map(|f| f.channels as usize);
        if queue_channels != Some(channels) {
            input.fill(0.0);
            notes.starved = true;
            return;
        }

        if resampler.as_ref().is_some_and(|(_, r)| r.channels() != channels) {
            input.fill(0.0);
            notes.starved = true;
            return;
        }

        let mut pull = |out: &mut [f32]| fill_from_queue(queues, converters, notes, looping, channels, out);
        match resampler {
            Some((shape, resampler)) => {
                let ratio = shape.sample_rate as f64 / mix_rate as f64 * pitch as f64;
                resampler.process(&mut *input, ratio, &mut pull);
            }
            None => {
                pull(&mut *input);
            }
        }

        apply_ramp(input, channels, ramp);
    }

    /// Spatial parameters for this cycle and the doppler pitch factor
    fn bus_parameters(&mut self, scene: &SceneSnapshot, mixer: &dyn BusMixer) -> (BusParameters, f32) {
        let p = &self.params;
        let listener = &scene.listener;
        let mut params = BusParameters {
            min_gain: p.min_gain,
            max_gain: p.max_gain,
            reverb_send: p.reverb_send,
            occlusion: p.occlusion,
            obstruction: p.obstruction,
            ..BusParameters::default()
        };

        // Multichannel sources play as-is, unspatialized.
        if self.bus_channels != 1 {
            params.gain = p.gain.clamp(p.min_gain, p.max_gain);
            params.listener_gain = listener.gain;
            return (params, 1.0);
        }

        let placement = listener.place(p.position, p.source_relative);

        if self.cone.scene_generation != scene.generation {
            self.cone.scene_generation = scene.generation;
            self.cone.dirty = true;
        }
        if self.cone.dirty {
            self.cone.gain = cone_angle(p.direction, placement.offset).map_or(1.0, |angle| {
                cone_gain(angle, p.cone_inner_angle, p.cone_outer_angle, p.cone_outer_gain)
            });
            self.cone.dirty = false;
        }

        let mut gain = p.gain * self.cone.gain;
        if mixer.supports_native_distance(scene.distance_model) {
            params.distance_params = Some((scene.distance_model, p.distance));
        } else {
            gain *= distance_gain(scene.distance_model, placement.distance, &p.distance);
            gain = gain.clamp(p.min_gain, p.max_gain);
        }
        params.gain = gain;
        params.listener_gain = listener.gain;
        params.distance = placement.distance;
        params.azimuth = placement.azimuth;
        params.elevation = placement.elevation;

        // The listener's motion does not apply to sources that move with it.
        let listener_velocity = if p.source_relative {
            Vec3::ZERO
        } else {
            listener.velocity
        };
        let doppler = doppler_shift(
            placement.offset,
            p.velocity,
            listener_velocity,
            scene.doppler_factor,
            scene.speed_of_sound,
        );
        (params, doppler)
    }

    /// Apply posted messages and settle drain or failure after a render cycle.
    ///
    /// Returns true when the source finished a deferred destruction.
    pub(crate) fn post_render(&mut self, mixer: &mut dyn BusMixer, events: &EventSink) -> bool {
        let notes = self.notes;
        if notes.processed > 0 {
            events.emit(AlSonicEvent::BuffersProcessed {
                source_id: self.id,
                count: notes.processed,
            });
        }
        if notes.looped {
            events.emit(AlSonicEvent::SourceLooped { source_id: self.id });
        }

        let mut retired = false;
        while let Ok(message) = self.messages.try_recv() {
            retired |= self.apply(message, mixer);
        }
        // Stop and rewind keep the bus until every message is in, so that a `Play`
        // posted behind them restarts on it.
        if matches!(self.state, PlaybackState::Initial | PlaybackState::Stopped) {
            self.release_bus(mixer);
        }

        if self.notes.drained && self.state == PlaybackState::Playing {
            self.stop_immediately(Some(mixer));
            events.emit(AlSonicEvent::QueueDrained { source_id: self.id });
        } else if self.notes.starved && self.state.is_rendering() {
            self.stop_immediately(Some(mixer));
        }

        self.adopt_staged_resampler();
        self.settle(events);
        self.notes = RenderNotes::default();
        retired
    }

    fn apply(&mut self, message: SourceMessage, mixer: &mut dyn BusMixer) -> bool {
        match message {
            SourceMessage::Stop => self.stop_immediately(None),
            SourceMessage::Pause => {
                if self.bus.is_some() {
                    self.ramp = Ramp::None;
                    self.state = PlaybackState::Paused;
                }
            }
            SourceMessage::Resume => {
                if self.bus.is_some() {
                    self.ramp = Ramp::RampUp;
                    self.state = PlaybackState::Playing;
                }
            }
            SourceMessage::Play | SourceMessage::Retrigger => {
                if !self.restart_on_bus(mixer) {
                    self.stop_immediately(None);
                }
            }
            SourceMessage::Rewind => self.rewind_immediately(None),
            SourceMessage::SetBuffer { staged } => self.queues.replace_with_staged(staged),
            SourceMessage::ClearBuffers(count) => {
                let removed = self.queues.remove_front(count);
                self.queues.pending_clear = self.queues.pending_clear.saturating_sub(removed);
            }
            SourceMessage::AddBuffers(count) => self.queues.promote_staged(count),
            SourceMessage::SetFramePosition(frame) => match self.state {
                PlaybackState::Initial | PlaybackState::Stopped => self.pending_seek = Some(frame),
                PlaybackState::Paused => self.seek(frame),
                _ => {
                    self.seek(frame);
                    self.notes.drained = false;
                    self.ramp = Ramp::RampUp;
                }
            },
            SourceMessage::DeconstructionStop => {
                self.stop_immediately(None);
                return true;
            }
        }
        false
    }

    /// Back to the start of the queue on the bus the source already holds.
    ///
    /// Returns false when there is no bus or nothing to play.
    fn restart_on_bus(&mut self, mixer: &mut dyn BusMixer) -> bool {
        if self.bus.is_none() || self.queues.is_empty() || self.conform_bus(mixer).is_err() {
            return false;
        }
        self.queues.rewind();
        if let Some(frame) = self.pending_seek.take() {
            self.queues.seek(frame as usize);
        }
        self.reset_resampler();
        self.notes.drained = false;
        self.notes.starved = false;
        self.ramp = Ramp::RampUp;
        self.state = PlaybackState::Playing;
        true
    }
}

/// Pull `out.len() / channels` frames from the queue, padding with silence.
///
/// Returns the number of frames that were real data.
fn fill_from_queue(
    queues: &mut SourceQueues,
    converters: &ConverterCache,
    notes: &mut RenderNotes,
    looping: bool,
    channels: usize,
    out: &mut [f32],
) -> usize {
    let total = out.len() / channels;
    let mut written = 0;
    let can_loop = |queues: &SourceQueues| {
        // A queue of empty buffers would loop forever.
        looping && !queues.inactive.is_empty() && queues.total_frames() > 0
    };
    while written < total {
        let Some(entry) = queues.active.front_mut() else {
            if can_loop(queues) {
                queues.swap_for_loop();
                notes.looped = true;
                continue;
            }
            notes.drained = true;
            break;
        };
        match entry.pull(converters, &mut out[written * channels..total * channels]) {
            PullOutcome::Frames(frames) => written += frames,
            PullOutcome::EndOfBuffer => {
                queues.advance();
                notes.processed += 1;
            }
            PullOutcome::Starved => {
                notes.starved = true;
                break;
            }
        }
    }
    out[written * channels..].fill(0.0);

    // An entry that ended exactly on the block boundary is done now, not next block.
    if written == total && !notes.starved {
        while queues.active.front().is_some_and(QueueEntry::is_exhausted) {
            queues.advance();
            notes.processed += 1;
        }
        if queues.active.is_empty() && !can_loop(queues) {
            notes.drained = true;
        }
    }
    written
}

/// Fade the block in or out
fn apply_ramp(block: &mut [f32], channels: usize, ramp: &mut Ramp) {
    let frames = block.len() / channels;
    if frames == 0 {
        return;
    }
    match *ramp {
        Ramp::RampUp => {
            for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
                let gain = i as f32 / frames as f32;
                frame.iter_mut().for_each(|s| *s *= gain);
            }
            *ramp = Ramp::None;
        }
        Ramp::RampDown => {
            for (i, frame) in block.chunks_exact_mut(channels).enumerate() {
                let gain = 1.0 - (i + 1) as f32 / frames as f32;
                frame.iter_mut().for_each(|s| *s *= gain);
            }
            *ramp = Ramp::Complete;
        }
        _ => {}
    }
}
