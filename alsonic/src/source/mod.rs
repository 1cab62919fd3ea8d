//! Sources: the playback state machine, queue orchestration and bus lifecycle.
//!
//! Every API call takes the source's [`RenderGate`] exclusively. Calls made while
//! the source is being rendered (Playing, or one of the `To*` transition states)
//! either mutate directly, which is safe because the render thread is locked out, or,
//! when the change must wait for the current ramp-down to finish, post a
//! [`SourceMessage`] that post-render applies.

mod message;
mod params;
mod queue;
mod render;

pub use message::SourceMessage;
pub use params::{SourceFloat, SourceParams, SourceVector};
pub use queue::{BufferQueue, ProcessedState, PullOutcome, QueueEntry, SourceQueues};
pub(crate) use render::RenderContext;

use crate::buffer::{BufferId, BufferRegistry};
use crate::context::MixerState;
use crate::convert::ConverterCache;
use crate::error::{AlSonicError, Result};
use crate::events::{AlSonicEvent, EventSink};
use crate::format::AudioFormat;
use crate::gate::{RenderGate, RenderLocker};
use crate::math::Vec3;
use crate::mixer::{BusHandle, BusMixer};
use crate::resampler::{ResamplerQuality, SourceResampler};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Lightweight, type-safe handle for sources.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u32);

impl SourceId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceId({})", self.0)
    }
}

/// Playback state as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceState {
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// How the queue of a source has been filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Undetermined,
    /// One buffer set with `set_buffer`
    Static,
    /// Buffers appended with `queue_buffers`
    Streaming,
}

/// Playback position, in the units of the source's queue
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceOffset {
    Seconds(f32),
    Samples(u64),
    Bytes(u64),
}

/// Internal state including the transitions that wait for post-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaybackState {
    Initial,
    Playing,
    Paused,
    Stopped,
    ToPlay,
    ToPause,
    ToResume,
    ToStop,
    ToRewind,
    ToRetrigger,
}

impl PlaybackState {
    /// The state this one settles into once pending messages are applied
    pub(crate) fn resolved(self) -> SourceState {
        match self {
            Self::Initial | Self::ToRewind => SourceState::Initial,
            Self::Playing | Self::ToPlay | Self::ToResume | Self::ToRetrigger => {
                SourceState::Playing
            }
            Self::Paused | Self::ToPause => SourceState::Paused,
            Self::Stopped | Self::ToStop => SourceState::Stopped,
        }
    }

    pub(crate) fn is_transition(self) -> bool {
        !matches!(
            self,
            Self::Initial | Self::Playing | Self::Paused | Self::Stopped
        )
    }

    /// True while the render thread pulls from the queue
    pub(crate) fn is_rendering(self) -> bool {
        self == Self::Playing || self.is_transition()
    }
}

/// Gain ramp applied over one render block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ramp {
    None,
    RampUp,
    RampDown,
    /// The ramp-down block has been rendered; render silence until post-render
    Complete,
}

/// Rate and channel count a resampler was built for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueShape {
    sample_rate: u32,
    channels: u16,
}

impl From<AudioFormat> for QueueShape {
    fn from(format: AudioFormat) -> Self {
        Self {
            sample_rate: format.sample_rate,
            channels: format.channels,
        }
    }
}

/// Render-side cache of the cone gain
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConeCache {
    gain: f32,
    dirty: bool,
    scene_generation: u64,
}

/// What happened during the last render pass, consumed by post-render
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct RenderNotes {
    processed: usize,
    drained: bool,
    starved: bool,
    looped: bool,
}

/// Context services a source needs on API threads
pub(crate) struct SourceEnv<'a> {
    pub(crate) buffers: &'a Mutex<BufferRegistry>,
    pub(crate) mixer: &'a RenderGate<MixerState>,
    pub(crate) events: &'a EventSink,
}

impl<'a> SourceEnv<'a> {
    fn registry(&self) -> Result<MutexGuard<'a, BufferRegistry>> {
        self.buffers
            .lock()
            .map_err(|_| AlSonicError::poisoned("buffer registry"))
    }

    fn with_mixer<R>(&self, f: impl FnOnce(&mut dyn BusMixer) -> Result<R>) -> Result<R> {
        let mut slot = self.mixer.lock()?;
        f(slot.mixer.as_mut())
    }
}

/// Fixed facts about the context a source lives in
#[derive(Debug, Clone, Copy)]
pub(crate) struct SourceSetup {
    pub(crate) mix_rate: u32,
    pub(crate) block_size: usize,
    pub(crate) quality: ResamplerQuality,
    pub(crate) mixer_converts_rate: bool,
}

/// Everything of a source the render thread touches
pub(crate) struct SourceCore {
    id: SourceId,
    setup: SourceSetup,
    state: PlaybackState,
    settled: SourceState,
    ramp: Ramp,
    source_type: SourceType,
    queues: SourceQueues,
    params: SourceParams,
    bus: Option<BusHandle>,
    bus_rate: u32,
    bus_channels: u16,
    messages: Receiver<SourceMessage>,
    converters: ConverterCache,
    resampler: Option<(QueueShape, SourceResampler)>,
    staged_resampler: Option<(QueueShape, SourceResampler)>,
    cone: ConeCache,
    pending_seek: Option<u64>,
    notes: RenderNotes,
    retiring: bool,
}

/// A source as stored by the context
pub(crate) struct AudioSource {
    id: SourceId,
    core: RenderGate<SourceCore>,
    messages: Sender<SourceMessage>,
    retired: AtomicBool,
}

impl AudioSource {
    pub(crate) fn new(id: SourceId, setup: SourceSetup) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let core = SourceCore {
            id,
            setup,
            state: PlaybackState::Initial,
            settled: SourceState::Initial,
            ramp: Ramp::None,
            source_type: SourceType::Undetermined,
            queues: SourceQueues::default(),
            params: SourceParams::default(),
            bus: None,
            bus_rate: 0,
            bus_channels: 1,
            messages: receiver,
            converters: ConverterCache::new(),
            resampler: None,
            staged_resampler: None,
            cone: ConeCache {
                gain: 1.0,
                dirty: true,
                scene_generation: 0,
            },
            pending_seek: None,
            notes: RenderNotes::default(),
            retiring: false,
        };
        Self {
            id,
            core: RenderGate::new(core),
            messages: sender,
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> SourceId {
        self.id
    }

    /// True once the source may be dropped from the render list
    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    pub(crate) fn core(&self) -> &RenderGate<SourceCore> {
        &self.core
    }

    pub(crate) fn mark_retired(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    /// Lock the core of a source that has not been deleted
    fn lock_live(&self) -> Result<RenderLocker<'_, SourceCore>> {
        let core = self.core.lock()?;
        if core.retiring {
            return Err(AlSonicError::InvalidName(format!("{} has been deleted", self.id)));
        }
        Ok(core)
    }

    /// Queue a message for post-render. Called with the gate held.
    fn send(&self, message: SourceMessage) -> Result<()> {
        self.messages.send(message).map_err(|_| {
            AlSonicError::InvalidOperation(format!("{} message queue is closed", self.id))
        })
    }

    /// Post a message and enter the transition state `next`
    fn post(&self, core: &mut SourceCore, message: SourceMessage, next: PlaybackState) -> Result<()> {
        self.send(message)?;
        if !core.state.is_transition() && core.ramp != Ramp::Complete {
            core.ramp = Ramp::RampDown;
        }
        log::debug!("{} {:?} -> {:?} (posted {:?})", self.id, core.state, next, message);
        core.state = next;
        Ok(())
    }

    pub(crate) fn state(&self) -> Result<SourceState> {
        Ok(self.lock_live()?.state.resolved())
    }

    pub(crate) fn playback_state(&self) -> Result<PlaybackState> {
        Ok(self.lock_live()?.state)
    }

    pub(crate) fn play(&self, env: &SourceEnv<'_>) -> Result<()> {
        let mut core = self.lock_live()?;
        let state = core.state;
        match state {
            PlaybackState::Initial | PlaybackState::Stopped => {
                if core.queues.is_empty() {
                    log::debug!("{} has nothing queued; play leaves it stopped", self.id);
                    core.stop_immediately(None);
                } else {
                    let bus = core.start(env)?;
                    log::debug!("{} playing on {}", self.id, bus);
                }
            }
            PlaybackState::Playing
            | PlaybackState::ToPlay
            | PlaybackState::ToResume
            | PlaybackState::ToRetrigger => {
                self.post(&mut core, SourceMessage::Retrigger, PlaybackState::ToRetrigger)?
            }
            PlaybackState::Paused => env.with_mixer(|mixer| core.resume(mixer))?,
            PlaybackState::ToStop | PlaybackState::ToRewind => {
                self.post(&mut core, SourceMessage::Play, PlaybackState::ToPlay)?
            }
            PlaybackState::ToPause => {
                self.post(&mut core, SourceMessage::Resume, PlaybackState::ToResume)?
            }
        }
        core.settle(env.events);
        Ok(())
    }

    pub(crate) fn stop(&self, env: &SourceEnv<'_>) -> Result<()> {
        let mut core = self.lock_live()?;
        let state = core.state;
        match state {
            PlaybackState::Playing
            | PlaybackState::ToPlay
            | PlaybackState::ToResume
            | PlaybackState::ToRetrigger
            | PlaybackState::ToPause
            | PlaybackState::ToRewind => {
                self.post(&mut core, SourceMessage::Stop, PlaybackState::ToStop)?
            }
            PlaybackState::Paused => {
                env.with_mixer(|mixer| {
                    core.stop_immediately(Some(mixer));
                    Ok(())
                })?;
            }
            PlaybackState::Initial => core.stop_immediately(None),
            PlaybackState::Stopped | PlaybackState::ToStop => {}
        }
        core.settle(env.events);
        Ok(())
    }

    pub(crate) fn pause(&self, env: &SourceEnv<'_>) -> Result<()> {
        let mut core = self.lock_live()?;
        if matches!(
            core.state,
            PlaybackState::Playing
                | PlaybackState::ToPlay
                | PlaybackState::ToResume
                | PlaybackState::ToRetrigger
        ) {
            self.post(&mut core, SourceMessage::Pause, PlaybackState::ToPause)?;
        }
        core.settle(env.events);
        Ok(())
    }

    pub(crate) fn rewind(&self, env: &SourceEnv<'_>) -> Result<()> {
        let mut core = self.lock_live()?;
        let state = core.state;
        match state {
            PlaybackState::Paused => {
                env.with_mixer(|mixer| {
                    core.rewind_immediately(Some(mixer));
                    Ok(())
                })?;
            }
            PlaybackState::Stopped | PlaybackState::Initial => core.rewind_immediately(None),
            _ => self.post(&mut core, SourceMessage::Rewind, PlaybackState::ToRewind)?,
        }
        core.settle(env.events);
        Ok(())
    }

    /// Replace the whole queue with `buffer`, or clear it with `None`
    pub(crate) fn set_buffer(&self, env: &SourceEnv<'_>, buffer: Option<BufferId>) -> Result<()> {
        let mut core = self.lock_live()?;
        let resolved = core.state.resolved();
        if !matches!(resolved, SourceState::Initial | SourceState::Stopped) {
            return Err(AlSonicError::InvalidOperation(format!(
                "Cannot set the buffer of {} while it is {:?}",
                self.id, resolved
            )));
        }

        let deferred = core.state.is_transition();
        let mut registry = env.registry()?;
        let staged = match buffer {
            Some(id) => {
                let format = registry.get(id)?.format().ok_or_else(|| {
                    AlSonicError::InvalidOperation(format!("{} has no data", id))
                })?;
                core.prune_converters();
                core.converters.ensure_room(&[format])?;
                let resampler = core.prepare_resampler(format)?;
                Some((id, format, resampler))
            }
            None => None,
        };

        for id in core.queues.attached_ids() {
            registry.detach(id, self.id);
        }
        if deferred {
            core.queues.begin_replacement();
        } else {
            core.queues.clear();
            core.prune_converters();
        }

        let mut count = 0;
        if let Some((id, format, resampler)) = staged {
            let converter = core.converters.converter_for(format)?;
            let pcm = registry.attach(id, self.id)?;
            let entry = QueueEntry::new(id, pcm, converter);
            if deferred {
                core.queues.temp.push_back(entry);
            } else {
                core.queues.active.push_back(entry);
            }
            core.install_resampler(resampler, deferred);
            count = 1;
        }
        core.queues.reserve_all();
        core.source_type = if count == 1 {
            SourceType::Static
        } else {
            SourceType::Undetermined
        };
        drop(registry);

        if deferred {
            self.send(SourceMessage::SetBuffer { staged: count })?;
        }
        log::debug!("{} buffer set to {:?}", self.id, buffer);
        Ok(())
    }

    /// Append buffers to the queue
    pub(crate) fn queue_buffers(&self, env: &SourceEnv<'_>, buffers: &[BufferId]) -> Result<()> {
        if buffers.is_empty() {
            return Ok(());
        }
        let mut core = self.lock_live()?;
        if core.source_type == SourceType::Static {
            return Err(AlSonicError::InvalidOperation(format!(
                "{} plays a static buffer; clear it before queueing",
                self.id
            )));
        }

        let mut registry = env.registry()?;
        let mut expected = core.queues.future_format();
        let mut formats = Vec::with_capacity(buffers.len());
        for id in buffers {
            let format = registry.get(*id)?.format().ok_or_else(|| {
                AlSonicError::InvalidOperation(format!("{} has no data", id))
            })?;
            match expected {
                Some(queue_format) if !queue_format.is_queue_compatible(&format) => {
                    return Err(AlSonicError::InvalidOperation(format!(
                        "{} is {} Hz/{} ch but the queue of {} is {} Hz/{} ch",
                        id,
                        format.sample_rate,
                        format.channels,
                        self.id,
                        queue_format.sample_rate,
                        queue_format.channels
                    )));
                }
                _ => expected = Some(format),
            }
            formats.push(format);
        }

        let resampler = match (core.queues.future_format(), expected) {
            (None, Some(format)) => core.prepare_resampler(format)?,
            _ => None,
        };

        let deferred = core.state.is_transition();
        core.prune_converters();
        core.converters.ensure_room(&formats)?;
        let mut converters = Vec::with_capacity(formats.len());
        for format in &formats {
            converters.push(core.converters.converter_for(*format)?);
        }

        for (id, converter) in buffers.iter().zip(converters) {
            let pcm = registry.attach(*id, self.id)?;
            let entry = QueueEntry::new(*id, pcm, converter);
            if deferred {
                core.queues.temp.push_back(entry);
            } else {
                core.queues.active.push_back(entry);
            }
        }
        drop(registry);

        core.install_resampler(resampler, deferred);
        core.queues.reserve_all();
        core.source_type = SourceType::Streaming;

        if deferred {
            self.send(SourceMessage::AddBuffers(buffers.len()))?;
        }
        log::debug!("{} queued {} buffer(s)", self.id, buffers.len());
        Ok(())
    }

    /// Remove `count` processed buffers from the front of the queue
    pub(crate) fn unqueue_buffers(&self, env: &SourceEnv<'_>, count: usize) -> Result<Vec<BufferId>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut core = self.lock_live()?;
        let available = core.future_processed();
        if count > available {
            return Err(AlSonicError::InvalidOperation(format!(
                "Cannot unqueue {} buffer(s) from {}: only {} processed",
                count, self.id, available
            )));
        }

        let removed: Vec<BufferId>;
        if core.state.is_transition() {
            removed = core
                .queues
                .combined_ids()
                .skip(core.queues.pending_clear)
                .take(count)
                .collect();
            core.queues.pending_clear += count;
            self.send(SourceMessage::ClearBuffers(count))?;
        } else {
            removed = (0..count)
                .filter_map(|_| core.queues.inactive.pop_front())
                .map(|entry| entry.buffer())
                .collect();
        }

        {
            let mut registry = env.registry()?;
            for id in &removed {
                registry.detach(*id, self.id);
            }
        }

        if core.queues.reported_len() == 0 {
            core.source_type = SourceType::Undetermined;
            if core.state == PlaybackState::Paused {
                env.with_mixer(|mixer| {
                    core.stop_immediately(Some(mixer));
                    Ok(())
                })?;
            }
        }
        core.prune_converters();
        core.settle(env.events);
        log::debug!("{} unqueued {} buffer(s)", self.id, removed.len());
        Ok(removed)
    }

    #[cfg(test)]
    pub(crate) fn converter_count(&self) -> Result<usize> {
        Ok(self.lock_live()?.converters.len())
    }

    pub(crate) fn buffers_queued(&self) -> Result<usize> {
        Ok(self.lock_live()?.queues.reported_len())
    }

    pub(crate) fn buffers_processed(&self) -> Result<usize> {
        Ok(self.lock_live()?.future_processed())
    }

    pub(crate) fn source_type(&self) -> Result<SourceType> {
        Ok(self.lock_live()?.source_type)
    }

    pub(crate) fn get_f32(&self, param: SourceFloat) -> Result<f32> {
        Ok(self.lock_live()?.params.get(param))
    }

    pub(crate) fn set_f32(&self, param: SourceFloat, value: f32) -> Result<()> {
        let mut core = self.lock_live()?;
        if core.params.set(param, value)? {
            core.cone.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn get_vec3(&self, param: SourceVector) -> Result<Vec3> {
        Ok(self.lock_live()?.params.get_vector(param))
    }

    pub(crate) fn set_vec3(&self, param: SourceVector, value: Vec3) -> Result<()> {
        let mut core = self.lock_live()?;
        if core.params.set_vector(param, value)? {
            core.cone.dirty = true;
        }
        Ok(())
    }

    pub(crate) fn looping(&self) -> Result<bool> {
        Ok(self.lock_live()?.params.looping)
    }

    pub(crate) fn set_looping(&self, looping: bool) -> Result<()> {
        self.lock_live()?.params.looping = looping;
        Ok(())
    }

    pub(crate) fn source_relative(&self) -> Result<bool> {
        Ok(self.lock_live()?.params.source_relative)
    }

    pub(crate) fn set_source_relative(&self, relative: bool) -> Result<()> {
        let mut core = self.lock_live()?;
        core.params.source_relative = relative;
        core.cone.dirty = true;
        Ok(())
    }

    pub(crate) fn params(&self) -> Result<SourceParams> {
        Ok(self.lock_live()?.params)
    }

    /// Current position within the queue in sample frames
    pub(crate) fn offset_frames(&self) -> Result<u64> {
        Ok(self.lock_live()?.offset_frames())
    }

    pub(crate) fn offset(&self, unit: OffsetUnit) -> Result<SourceOffset> {
        let core = self.lock_live()?;
        let frames = core.offset_frames();
        Ok(match (unit, core.queues.future_format()) {
            (OffsetUnit::Samples, _) | (_, None) => SourceOffset::Samples(frames),
            (OffsetUnit::Seconds, Some(format)) => {
                SourceOffset::Seconds((frames as f64 / format.sample_rate as f64) as f32)
            }
            (OffsetUnit::Bytes, Some(format)) => {
                SourceOffset::Bytes(frames * format.bytes_per_frame() as u64)
            }
        })
    }

    pub(crate) fn set_offset(&self, env: &SourceEnv<'_>, offset: SourceOffset) -> Result<()> {
        let mut core = self.lock_live()?;
        let format = core.queues.current_format().ok_or_else(|| {
            AlSonicError::InvalidOperation(format!("{} has no queued data to seek in", self.id))
        })?;
        let frame = match offset {
            SourceOffset::Samples(frames) => frames,
            SourceOffset::Seconds(seconds) if seconds.is_finite() && seconds >= 0.0 => {
                (seconds as f64 * format.sample_rate as f64) as u64
            }
            SourceOffset::Bytes(bytes) => bytes / format.bytes_per_frame() as u64,
            SourceOffset::Seconds(seconds) => {
                return Err(AlSonicError::InvalidValue(format!(
                    "Offset of {} seconds",
                    seconds
                )));
            }
        };
        let total = core.queues.total_frames() as u64;
        if frame >= total {
            return Err(AlSonicError::InvalidValue(format!(
                "Offset {} is past the {} frames queued on {}",
                frame, total, self.id
            )));
        }

        let state = core.state;
        match state {
            PlaybackState::Initial | PlaybackState::Stopped => core.pending_seek = Some(frame),
            PlaybackState::Paused => core.seek(frame),
            // Nothing of the new start has been heard yet.
            PlaybackState::Playing if core.ramp == Ramp::RampUp => core.seek(frame),
            _ => {
                // Fade out at the old position; post-render seeks and fades back in.
                self.send(SourceMessage::SetFramePosition(frame))?;
                if state == PlaybackState::Playing && core.ramp == Ramp::None {
                    core.ramp = Ramp::RampDown;
                }
            }
        }
        core.settle(env.events);
        Ok(())
    }

    /// Detach everything and stop. Returns true when teardown waits for post-render.
    pub(crate) fn destroy(&self, env: &SourceEnv<'_>) -> Result<bool> {
        let mut core = self.lock_live()?;
        {
            let mut registry = env.registry()?;
            for id in core.queues.attached_ids() {
                registry.detach(id, self.id);
            }
        }

        core.retiring = true;
        if core.state.is_transition() {
            self.send(SourceMessage::DeconstructionStop)?;
            log::debug!("{} destruction deferred to post-render", self.id);
            return Ok(true);
        }

        if core.bus.is_some() {
            env.with_mixer(|mixer| {
                core.release_bus(mixer);
                Ok(())
            })?;
        }
        core.state = PlaybackState::Stopped;
        core.queues.clear();
        self.mark_retired();
        Ok(false)
    }
}

/// Unit for reading a playback offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Seconds,
    Samples,
    Bytes,
}

impl SourceCore {
    /// Emit `StateChanged` when a stable state differs from the last one reported
    fn settle(&mut self, events: &EventSink) {
        if self.state.is_transition() {
            return;
        }
        let resolved = self.state.resolved();
        if resolved != self.settled {
            self.settled = resolved;
            events.emit(AlSonicEvent::StateChanged {
                source_id: self.id,
                state: resolved,
            });
        }
    }

    fn offset_frames(&self) -> u64 {
        match self.state.resolved() {
            SourceState::Initial | SourceState::Stopped => self.pending_seek.unwrap_or(0),
            SourceState::Playing | SourceState::Paused => self.queues.position_frames() as u64,
        }
    }

    /// Processed entries that can be unqueued once pending messages are applied
    fn future_processed(&self) -> usize {
        if self.queues.is_replacing() {
            return 0;
        }
        match self.state {
            PlaybackState::ToStop => (self.queues.active.len() + self.queues.inactive.len())
                .saturating_sub(self.queues.pending_clear),
            PlaybackState::ToPlay | PlaybackState::ToRetrigger | PlaybackState::ToRewind => 0,
            _ => self.queues.processed_len(),
        }
    }

    /// Build a resampler for a queue of `format` if the mixer cannot convert rates
    fn prepare_resampler(&self, format: AudioFormat) -> Result<Option<(QueueShape, SourceResampler)>> {
        if self.setup.mixer_converts_rate {
            return Ok(None);
        }
        let shape = QueueShape::from(format);
        let current = self.resampler.as_ref().map(|(s, _)| *s);
        let staged = self.staged_resampler.as_ref().map(|(s, _)| *s);
        if current == Some(shape) || staged == Some(shape) {
            return Ok(None);
        }
        let resampler = SourceResampler::new(
            self.setup.quality,
            format.sample_rate,
            self.setup.mix_rate,
            format.channels as usize,
            self.setup.block_size,
        )?;
        Ok(Some((shape, resampler)))
    }

    fn install_resampler(&mut self, resampler: Option<(QueueShape, SourceResampler)>, deferred: bool) {
        let Some(resampler) = resampler else { return };
        if deferred {
            self.staged_resampler = Some(resampler);
        } else {
            self.resampler = Some(resampler);
        }
    }

    /// Swap in a staged resampler once the queue it was built for is current
    fn adopt_staged_resampler(&mut self) {
        let current = self.queues.current_format().map(QueueShape::from);
        let staged = self.staged_resampler.as_ref().map(|(s, _)| *s);
        if current.is_some() && current == staged {
            self.resampler = self.staged_resampler.take();
        }
    }

    fn reset_resampler(&mut self) {
        if let Some((_, resampler)) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    /// Rate the bus of a queue in `format` runs at
    fn bus_rate_for(&self, format: AudioFormat) -> u32 {
        if self.setup.mixer_converts_rate {
            format.sample_rate
        } else {
            self.setup.mix_rate
        }
    }

    /// Initial/Stopped -> Playing on a newly claimed bus.
    ///
    /// The mixer gate is held only while the bus is claimed. Nothing changes when no
    /// bus can be had.
    fn start(&mut self, env: &SourceEnv<'_>) -> Result<BusHandle> {
        let format = self.queues.current_format().ok_or_else(|| {
            AlSonicError::InvalidOperation(format!("{} has nothing queued", self.id))
        })?;
        let rate = self.bus_rate_for(format);
        let bus = env.with_mixer(|mixer| {
            let bus = mixer.allocate_bus(format.channels)?;
            if let Err(e) = mixer.set_bus_format(bus, rate, format.channels) {
                mixer.release_bus(bus);
                return Err(e);
            }
            Ok(bus)
        })?;

        self.bus = Some(bus);
        self.bus_rate = rate;
        self.bus_channels = format.channels;
        if self.state == PlaybackState::Stopped || self.pending_seek.is_some() {
            self.queues.rewind();
        }
        if let Some(frame) = self.pending_seek.take() {
            self.queues.seek(frame as usize);
        }
        self.reset_resampler();
        self.cone.dirty = true;
        self.notes = RenderNotes::default();
        self.ramp = Ramp::RampUp;
        self.state = PlaybackState::Playing;
        Ok(bus)
    }

    /// Reformat the held bus when the queue changed rate or channel count.
    ///
    /// Also runs in post-render, where it allocates only if the mixer refuses.
    fn conform_bus(&mut self, mixer: &mut dyn BusMixer) -> Result<()> {
        let (Some(bus), Some(format)) = (self.bus, self.queues.current_format()) else {
            return Ok(());
        };
        let rate = self.bus_rate_for(format);
        if (rate, format.channels) != (self.bus_rate, self.bus_channels) {
            mixer.set_bus_format(bus, rate, format.channels)?;
            self.bus_rate = rate;
            self.bus_channels = format.channels;
        }
        Ok(())
    }

    /// Paused -> Playing
    fn resume(&mut self, mixer: &mut dyn BusMixer) -> Result<()> {
        self.conform_bus(mixer)?;
        self.ramp = Ramp::RampUp;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Free converters no queued or staged entry refers to. API side only.
    fn prune_converters(&mut self) {
        let used = self.queues.converters_in_use();
        self.converters.retain_used(&used);
    }

    fn release_bus(&mut self, mixer: &mut dyn BusMixer) {
        if let Some(bus) = self.bus.take() {
            mixer.release_bus(bus);
        }
    }

    /// Stop now and mark every entry processed. The bus goes only if `mixer` is given.
    fn stop_immediately(&mut self, mixer: Option<&mut dyn BusMixer>) {
        if let Some(mixer) = mixer {
            self.release_bus(mixer);
        }
        self.queues.mark_all_processed();
        self.pending_seek = None;
        self.ramp = Ramp::None;
        self.state = PlaybackState::Stopped;
    }

    /// Rewind now and return to Initial. The bus goes only if `mixer` is given.
    fn rewind_immediately(&mut self, mixer: Option<&mut dyn BusMixer>) {
        if let Some(mixer) = mixer {
            self.release_bus(mixer);
        }
        self.queues.rewind();
        self.reset_resampler();
        self.pending_seek = None;
        self.ramp = Ramp::None;
        self.state = PlaybackState::Initial;
    }

    fn seek(&mut self, frame: u64) {
        if self.queues.seek(frame as usize) {
            self.reset_resampler();
        }
    }
}
