use crate::buffer::{BufferId, BufferRegistry};
use crate::config::AlSonicContextDesc;
use crate::error::{AlSonicError, Result};
use crate::events::{AlSonicEvent, EventCallback, EventHub};
use crate::format::AudioFormat;
use crate::gate::{RenderGate, RenderThreadScope};
use crate::math::{Pose, Vec3};
use crate::mixer::{BusMixer, SoftwareMixer};
use crate::source::{
    AudioSource, OffsetUnit, PlaybackState, RenderContext, SourceEnv, SourceFloat, SourceId,
    SourceOffset, SourceParams, SourceSetup, SourceState, SourceType, SourceVector,
};
use crate::spatial::{DistanceModel, Listener, ListenerFrame};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Scene values the render thread reads once per cycle
#[derive(Debug, Clone, Copy)]
pub(crate) struct SceneSnapshot {
    pub(crate) listener: ListenerFrame,
    /// Bumped whenever the listener moves or turns
    pub(crate) generation: u64,
    pub(crate) distance_model: DistanceModel,
    pub(crate) doppler_factor: f32,
    pub(crate) speed_of_sound: f32,
}

/// Listener and context-wide spatial settings as edited by the API
#[derive(Debug, Clone)]
struct SceneState {
    listener: Listener,
    generation: u64,
    distance_model: DistanceModel,
    doppler_factor: f32,
    speed_of_sound: f32,
}

impl SceneState {
    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            listener: self.listener.frame(),
            generation: self.generation,
            distance_model: self.distance_model,
            doppler_factor: self.doppler_factor,
            speed_of_sound: self.speed_of_sound,
        }
    }
}

/// The mixer plus the last scene the render thread managed to read
pub(crate) struct MixerState {
    pub(crate) mixer: Box<dyn BusMixer>,
    pub(crate) scene: SceneSnapshot,
}

/// Shared state of one audio context: buffers, sources, listener and mixer.
///
/// `AlSonicContext` is the central API. Every method may be called from any thread;
/// wrap the context in an `Arc` to share it with an [`AlSonicEngine`] or other
/// threads. Rendering happens in [`AlSonicContext::render`], which never blocks: a
/// piece of state that an API call is editing is skipped for that cycle.
///
/// # Locking
///
/// API calls take locks in a fixed order: source list, live table, source,
/// buffer registry, mixer. The render thread only ever tries.
///
/// [`AlSonicEngine`]: crate::AlSonicEngine
pub struct AlSonicContext {
    desc: AlSonicContextDesc,
    setup: SourceSetup,
    /// Everything the render thread iterates, including sources awaiting teardown
    sources: RenderGate<Vec<Arc<AudioSource>>>,
    /// Sources addressable through the API
    live: Mutex<HashMap<SourceId, Arc<AudioSource>>>,
    next_source: AtomicU32,
    buffers: Mutex<BufferRegistry>,
    mixer: RenderGate<MixerState>,
    scene: RenderGate<SceneState>,
    events: EventHub,
    frames_rendered: AtomicU64,
    skipped_cycles: AtomicU64,
}

impl AlSonicContext {
    /// Create a context mixing through the built-in [`SoftwareMixer`].
    pub fn new(desc: AlSonicContextDesc) -> Result<Self> {
        desc.validate()?;
        let mixer = SoftwareMixer::new(desc.max_buses, desc.block_size, desc.channels);
        Self::with_mixer(desc, Box::new(mixer))
    }

    /// Create a context on top of a custom mixer.
    ///
    /// The mixer's block size and channel count must match the descriptor.
    pub fn with_mixer(desc: AlSonicContextDesc, mixer: Box<dyn BusMixer>) -> Result<Self> {
        desc.validate()?;
        if mixer.block_size() != desc.block_size || mixer.output_channels() != desc.channels {
            return Err(AlSonicError::InvalidValue(format!(
                "Mixer renders {} frames x {} channels but the context expects {} x {}",
                mixer.block_size(),
                mixer.output_channels(),
                desc.block_size,
                desc.channels
            )));
        }

        let scene = SceneState {
            listener: Listener::default(),
            generation: 0,
            distance_model: desc.distance_model,
            doppler_factor: desc.doppler_factor,
            speed_of_sound: desc.speed_of_sound,
        };
        let setup = SourceSetup {
            mix_rate: desc.sample_rate,
            block_size: desc.block_size,
            quality: desc.resampler_quality,
            mixer_converts_rate: mixer.supports_rate_conversion(),
        };
        let events = EventHub::new(desc.notification_capacity, desc.dispatch_notifications)?;

        log::info!(
            "Created context: {} Hz, {} channel(s), {} frames per block, {} buses",
            desc.sample_rate,
            desc.channels,
            desc.block_size,
            desc.max_buses
        );

        Ok(Self {
            setup,
            sources: RenderGate::new(Vec::new()),
            live: Mutex::new(HashMap::new()),
            next_source: AtomicU32::new(1),
            buffers: Mutex::new(BufferRegistry::new()),
            mixer: RenderGate::new(MixerState {
                mixer,
                scene: scene.snapshot(),
            }),
            scene: RenderGate::new(scene),
            events,
            frames_rendered: AtomicU64::new(0),
            skipped_cycles: AtomicU64::new(0),
            desc,
        })
    }

    pub fn desc(&self) -> &AlSonicContextDesc {
        &self.desc
    }

    pub fn sample_rate(&self) -> u32 {
        self.desc.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.desc.channels
    }

    pub fn block_size(&self) -> usize {
        self.desc.block_size
    }

    fn registry(&self) -> Result<MutexGuard<'_, BufferRegistry>> {
        self.buffers
            .lock()
            .map_err(|_| AlSonicError::poisoned("buffer registry"))
    }

    fn live(&self) -> Result<MutexGuard<'_, HashMap<SourceId, Arc<AudioSource>>>> {
        self.live
            .lock()
            .map_err(|_| AlSonicError::poisoned("source table"))
    }

    fn env(&self) -> SourceEnv<'_> {
        SourceEnv {
            buffers: &self.buffers,
            mixer: &self.mixer,
            events: self.events.sink(),
        }
    }

    fn source(&self, id: SourceId) -> Result<Arc<AudioSource>> {
        self.live()?
            .get(&id)
            .cloned()
            .ok_or_else(|| AlSonicError::InvalidName(format!("{} does not exist", id)))
    }

    // ----- buffers -----

    pub fn generate_buffers(&self, count: usize) -> Result<Vec<BufferId>> {
        Ok(self.registry()?.generate(count))
    }

    /// Delete a buffer. Fails while any source still has it queued.
    pub fn delete_buffer(&self, id: BufferId) -> Result<()> {
        let mut registry = self.registry()?;
        registry.delete(id)?;
        registry.reap();
        Ok(())
    }

    pub fn is_buffer(&self, id: BufferId) -> bool {
        self.registry().map(|r| r.contains(id)).unwrap_or(false)
    }

    /// Copy PCM data into a buffer. Fails while the buffer is queued anywhere.
    pub fn buffer_data(&self, id: BufferId, format: AudioFormat, data: &[u8]) -> Result<()> {
        self.registry()?.upload(id, format, data)
    }

    /// Hand PCM data to a buffer without copying it.
    pub fn buffer_data_static(&self, id: BufferId, format: AudioFormat, data: Arc<[u8]>) -> Result<()> {
        self.registry()?.upload_static(id, format, data)
    }

    pub fn buffer_format(&self, id: BufferId) -> Result<Option<AudioFormat>> {
        Ok(self.registry()?.get(id)?.format())
    }

    pub fn buffer_frames(&self, id: BufferId) -> Result<usize> {
        Ok(self.registry()?.get(id)?.frames())
    }

    pub fn buffer_size_bytes(&self, id: BufferId) -> Result<usize> {
        Ok(self.registry()?.get(id)?.size_bytes())
    }

    /// Number of buffers deleted by the API whose memory the render thread still holds
    pub fn pending_buffer_deletions(&self) -> usize {
        self.registry().map(|r| r.pending_deletions()).unwrap_or(0)
    }

    // ----- sources -----

    pub fn generate_sources(&self, count: usize) -> Result<Vec<SourceId>> {
        let created: Vec<Arc<AudioSource>> = (0..count)
            .map(|_| {
                let id = SourceId::new(self.next_source.fetch_add(1, Ordering::Relaxed));
                Arc::new(AudioSource::new(id, self.setup))
            })
            .collect();

        let retired = {
            let mut list = self.sources.lock()?;
            let retired = take_retired(&mut list);
            list.extend(created.iter().cloned());
            retired
        };
        drop(retired);

        let mut live = self.live()?;
        let ids: Vec<SourceId> = created.iter().map(|source| source.id()).collect();
        for source in created {
            live.insert(source.id(), source);
        }
        log::debug!("Generated {} source(s)", count);
        Ok(ids)
    }

    /// Delete a source, releasing its buffers and bus.
    ///
    /// A source caught mid-transition finishes its ramp-down first; its buffers are
    /// detached immediately either way.
    pub fn delete_source(&self, id: SourceId) -> Result<()> {
        let source = self
            .live()?
            .remove(&id)
            .ok_or_else(|| AlSonicError::InvalidName(format!("{} does not exist", id)))?;
        let deferred = source.destroy(&self.env())?;

        // The render list is only held to unlink; the sources go once it is free.
        let retired = {
            let mut list = self.sources.lock()?;
            if !deferred {
                list.retain(|s| s.id() != id);
            }
            take_retired(&mut list)
        };
        drop(retired);
        drop(source);
        self.registry()?.reap();
        log::debug!("Deleted {}{}", id, if deferred { " (deferred)" } else { "" });
        Ok(())
    }

    pub fn is_source(&self, id: SourceId) -> bool {
        self.live().map(|live| live.contains_key(&id)).unwrap_or(false)
    }

    pub fn source_count(&self) -> usize {
        self.live().map(|live| live.len()).unwrap_or(0)
    }

    pub fn play(&self, id: SourceId) -> Result<()> {
        self.source(id)?.play(&self.env())
    }

    pub fn pause(&self, id: SourceId) -> Result<()> {
        self.source(id)?.pause(&self.env())
    }

    pub fn stop(&self, id: SourceId) -> Result<()> {
        self.source(id)?.stop(&self.env())
    }

    pub fn rewind(&self, id: SourceId) -> Result<()> {
        self.source(id)?.rewind(&self.env())
    }

    /// Resolved playback state; transitions report the state they lead to.
    pub fn state(&self, id: SourceId) -> Result<SourceState> {
        self.source(id)?.state()
    }

    pub(crate) fn playback_state(&self, id: SourceId) -> Result<PlaybackState> {
        self.source(id)?.playback_state()
    }

    pub fn set_buffer(&self, id: SourceId, buffer: Option<BufferId>) -> Result<()> {
        self.source(id)?.set_buffer(&self.env(), buffer)
    }

    pub fn queue_buffers(&self, id: SourceId, buffers: &[BufferId]) -> Result<()> {
        self.source(id)?.queue_buffers(&self.env(), buffers)
    }

    /// Remove `count` processed buffers from the front of the queue and return them.
    pub fn unqueue_buffers(&self, id: SourceId, count: usize) -> Result<Vec<BufferId>> {
        self.source(id)?.unqueue_buffers(&self.env(), count)
    }

    pub fn buffers_queued(&self, id: SourceId) -> Result<usize> {
        self.source(id)?.buffers_queued()
    }

    pub fn buffers_processed(&self, id: SourceId) -> Result<usize> {
        self.source(id)?.buffers_processed()
    }

    pub fn source_type(&self, id: SourceId) -> Result<SourceType> {
        self.source(id)?.source_type()
    }

    pub fn set_source_f32(&self, id: SourceId, param: SourceFloat, value: f32) -> Result<()> {
        self.source(id)?.set_f32(param, value)
    }

    pub fn source_f32(&self, id: SourceId, param: SourceFloat) -> Result<f32> {
        self.source(id)?.get_f32(param)
    }

    pub fn set_source_vec3(&self, id: SourceId, param: SourceVector, value: Vec3) -> Result<()> {
        self.source(id)?.set_vec3(param, value)
    }

    pub fn source_vec3(&self, id: SourceId, param: SourceVector) -> Result<Vec3> {
        self.source(id)?.get_vec3(param)
    }

    pub fn set_looping(&self, id: SourceId, looping: bool) -> Result<()> {
        self.source(id)?.set_looping(looping)
    }

    pub fn looping(&self, id: SourceId) -> Result<bool> {
        self.source(id)?.looping()
    }

    pub fn set_source_relative(&self, id: SourceId, relative: bool) -> Result<()> {
        self.source(id)?.set_source_relative(relative)
    }

    pub fn source_relative(&self, id: SourceId) -> Result<bool> {
        self.source(id)?.source_relative()
    }

    /// Snapshot of every parameter of a source
    pub fn source_params(&self, id: SourceId) -> Result<SourceParams> {
        self.source(id)?.params()
    }

    pub fn set_offset(&self, id: SourceId, offset: SourceOffset) -> Result<()> {
        self.source(id)?.set_offset(&self.env(), offset)
    }

    pub fn offset(&self, id: SourceId, unit: OffsetUnit) -> Result<SourceOffset> {
        self.source(id)?.offset(unit)
    }

    /// Playback position in sample frames
    pub fn offset_frames(&self, id: SourceId) -> Result<u64> {
        self.source(id)?.offset_frames()
    }

    // ----- listener and scene -----

    fn edit_scene<R>(&self, moved: bool, f: impl FnOnce(&mut SceneState) -> Result<R>) -> Result<R> {
        let mut scene = self.scene.lock()?;
        let result = f(&mut scene)?;
        if moved {
            scene.generation = scene.generation.wrapping_add(1);
        }
        Ok(result)
    }

    pub fn listener(&self) -> Result<Listener> {
        Ok(self.scene.lock()?.listener)
    }

    pub fn set_listener_position(&self, position: Vec3) -> Result<()> {
        self.edit_scene(true, |s| s.listener.set_position(position))
    }

    pub fn set_listener_velocity(&self, velocity: Vec3) -> Result<()> {
        self.edit_scene(false, |s| s.listener.set_velocity(velocity))
    }

    /// Set the listener's facing (`at`) and up vectors
    pub fn set_listener_orientation(&self, at: Vec3, up: Vec3) -> Result<()> {
        self.edit_scene(true, |s| s.listener.set_orientation(at, up))
    }

    pub fn set_listener_pose(&self, pose: Pose) -> Result<()> {
        self.edit_scene(true, |s| s.listener.set_pose(pose))
    }

    pub fn set_listener_gain(&self, gain: f32) -> Result<()> {
        self.edit_scene(false, |s| s.listener.set_gain(gain))
    }

    pub fn distance_model(&self) -> Result<DistanceModel> {
        Ok(self.scene.lock()?.distance_model)
    }

    pub fn set_distance_model(&self, model: DistanceModel) -> Result<()> {
        self.edit_scene(false, |s| {
            s.distance_model = model;
            Ok(())
        })
    }

    pub fn doppler_factor(&self) -> Result<f32> {
        Ok(self.scene.lock()?.doppler_factor)
    }

    pub fn set_doppler_factor(&self, factor: f32) -> Result<()> {
        if !(factor >= 0.0 && factor.is_finite()) {
            return Err(AlSonicError::InvalidValue(format!(
                "Doppler factor {} must be finite and non-negative",
                factor
            )));
        }
        self.edit_scene(false, |s| {
            s.doppler_factor = factor;
            Ok(())
        })
    }

    pub fn speed_of_sound(&self) -> Result<f32> {
        Ok(self.scene.lock()?.speed_of_sound)
    }

    pub fn set_speed_of_sound(&self, speed: f32) -> Result<()> {
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(AlSonicError::InvalidValue(format!(
                "Speed of sound {} must be finite and positive",
                speed
            )));
        }
        self.edit_scene(false, |s| {
            s.speed_of_sound = speed;
            Ok(())
        })
    }

    // ----- notifications -----

    /// Drain pending notifications and run registered callbacks for each.
    ///
    /// Also finishes the teardown of sources deleted mid-transition.
    pub fn poll_events(&self) -> Vec<AlSonicEvent> {
        let retired = match self.sources.lock() {
            Ok(mut list) => take_retired(&mut list),
            Err(_) => Vec::new(),
        };
        drop(retired);
        if let Ok(mut registry) = self.registry() {
            registry.reap();
        }
        self.events.poll()
    }

    /// Register a callback for every notification
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&AlSonicEvent) + Send + Sync + 'static,
    {
        let callback: Arc<EventCallback> = Arc::new(callback);
        self.events.subscribe(callback);
    }

    // ----- rendering -----

    /// Render as many whole blocks as fit in `output` (interleaved, `channels` wide).
    ///
    /// Samples past the last whole block are zeroed. Returns the number of frames
    /// rendered. Never blocks.
    pub fn render(&self, output: &mut [f32]) -> usize {
        let _scope = RenderThreadScope::enter();
        let block_len = self.desc.block_size * self.desc.channels as usize;
        let mut frames = 0;
        let mut blocks = output.chunks_exact_mut(block_len);
        for block in &mut blocks {
            self.render_block(block);
            frames += self.desc.block_size;
        }
        blocks.into_remainder().fill(0.0);
        self.frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
        frames
    }

    fn render_block(&self, output: &mut [f32]) {
        output.fill(0.0);
        let Some(mut mixer_state) = self.mixer.try_render() else {
            self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if let Some(scene) = self.scene.try_render() {
            mixer_state.scene = scene.snapshot();
        }
        let MixerState { mixer, scene } = &mut *mixer_state;
        let events = self.events.sink();

        if let Some(sources) = self.sources.try_render() {
            for source in sources.iter() {
                let Some(mut core) = source.core().try_render() else {
                    continue;
                };
                let mut cx = RenderContext {
                    mixer: mixer.as_mut(),
                    scene,
                    events,
                };
                core.render(&mut cx);
                if core.post_render(cx.mixer, cx.events) {
                    source.mark_retired();
                }
            }
        } else {
            self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
        }

        mixer.mix_into(output);
    }

    /// Frames produced by [`render`](Self::render) since creation
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    /// Render cycles that found the mixer or source list busy
    pub fn skipped_cycles(&self) -> u64 {
        self.skipped_cycles.load(Ordering::Relaxed)
    }
}

/// Unlink sources whose teardown has finished. The caller drops them after
/// releasing the list.
fn take_retired(list: &mut Vec<Arc<AudioSource>>) -> Vec<Arc<AudioSource>> {
    let mut retired = Vec::new();
    list.retain(|source| {
        if source.is_retired() {
            retired.push(source.clone());
            false
        } else {
            true
        }
    });
    retired
}
