use alsonic::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const RATE: u32 = 44100;

fn context(block_size: usize) -> AlSonicContext {
    AlSonicContext::new(
        AlSonicContextDesc::new()
            .sample_rate(RATE)
            .channels(2)
            .block_size(block_size)
            .max_buses(8),
    )
    .unwrap()
}

/// 16-bit mono sine at 441 Hz
fn sine_buffer(ctx: &AlSonicContext, frames: usize) -> BufferId {
    let id = ctx.generate_buffers(1).unwrap()[0];
    let data: Vec<u8> = (0..frames)
        .flat_map(|i| {
            let phase = i as f32 * 441.0 / RATE as f32 * std::f32::consts::TAU;
            ((phase.sin() * 16000.0) as i16).to_le_bytes()
        })
        .collect();
    ctx.buffer_data(id, AudioFormat::mono16(RATE), &data).unwrap();
    id
}

fn render_blocks(ctx: &AlSonicContext, blocks: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; ctx.block_size() * ctx.channels() as usize * blocks];
    assert_eq!(ctx.render(&mut out), ctx.block_size() * blocks);
    out
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}

#[test]
fn hundred_ms_buffer_stops_after_hundred_ms() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 4410);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();

    let out = render_blocks(&ctx, 9);
    assert!(peak(&out) > 0.1);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 0);

    render_blocks(&ctx, 1);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 1);

    let events = ctx.poll_events();
    assert!(events.contains(&AlSonicEvent::QueueDrained { source_id: source }));
    assert!(events.contains(&AlSonicEvent::BuffersProcessed {
        source_id: source,
        count: 1
    }));
    assert_eq!(
        events.last(),
        Some(&AlSonicEvent::StateChanged {
            source_id: source,
            state: SourceState::Stopped
        })
    );

    assert_eq!(peak(&render_blocks(&ctx, 1)), 0.0);
}

#[test]
fn stop_reports_stopped_before_the_ramp_finishes() {
    let ctx = context(256);
    let buffer = sine_buffer(&ctx, RATE as usize);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 2);
    ctx.poll_events();

    ctx.stop(source).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
    // nothing has been rendered since, so no notification yet
    assert!(ctx.poll_events().is_empty());

    let ramp = render_blocks(&ctx, 1);
    assert!(peak(&ramp) > 0.0);
    let tail = &ramp[ramp.len() - 2..];
    assert_eq!(tail, &[0.0, 0.0]);
    assert_eq!(
        ctx.poll_events(),
        vec![AlSonicEvent::StateChanged {
            source_id: source,
            state: SourceState::Stopped
        }]
    );

    assert_eq!(peak(&render_blocks(&ctx, 1)), 0.0);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 1);
}

#[test]
fn shared_buffer_outlives_one_of_its_sources() {
    let ctx = context(128);
    let buffer = sine_buffer(&ctx, 1024);
    let sources = ctx.generate_sources(2).unwrap();
    for s in &sources {
        ctx.queue_buffers(*s, &[buffer]).unwrap();
    }
    assert!(matches!(
        ctx.delete_buffer(buffer),
        Err(AlSonicError::InvalidOperation(_))
    ));

    ctx.delete_source(sources[0]).unwrap();
    assert!(ctx.delete_buffer(buffer).is_err());

    ctx.play(sources[1]).unwrap();
    render_blocks(&ctx, 2);
    ctx.delete_source(sources[1]).unwrap();
    ctx.delete_buffer(buffer).unwrap();
    assert!(!ctx.is_buffer(buffer));
    assert_eq!(ctx.pending_buffer_deletions(), 0);
}

#[test]
fn drained_buffer_can_be_unqueued_and_deleted() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 441);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 2);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);

    assert!(ctx.delete_buffer(buffer).is_err());
    assert_eq!(ctx.unqueue_buffers(source, 1).unwrap(), vec![buffer]);
    assert_eq!(ctx.buffers_queued(source).unwrap(), 0);
    assert_eq!(ctx.source_type(source).unwrap(), SourceType::Undetermined);
    ctx.delete_buffer(buffer).unwrap();
    assert!(matches!(
        ctx.buffer_frames(buffer),
        Err(AlSonicError::InvalidName(_))
    ));
}

#[test]
fn looping_source_wraps_and_keeps_playing() {
    let ctx = context(256);
    let buffer = sine_buffer(&ctx, 300);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.set_buffer(source, Some(buffer)).unwrap();
    ctx.set_looping(source, true).unwrap();
    ctx.play(source).unwrap();

    let out = render_blocks(&ctx, 8);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    let last_block = &out[out.len() - 512..];
    assert!(peak(last_block) > 0.1);

    let looped = ctx
        .poll_events()
        .iter()
        .filter(|e| matches!(e, AlSonicEvent::SourceLooped { .. }))
        .count();
    assert!(looped >= 5);

    ctx.set_looping(source, false).unwrap();
    render_blocks(&ctx, 4);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
}

#[test]
fn streaming_queue_reports_processed_buffers() {
    let ctx = context(100);
    let buffers: Vec<_> = (0..4).map(|_| sine_buffer(&ctx, 150)).collect();
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &buffers).unwrap();
    assert_eq!(ctx.source_type(source).unwrap(), SourceType::Streaming);
    ctx.play(source).unwrap();

    render_blocks(&ctx, 2);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 1);
    assert_eq!(ctx.unqueue_buffers(source, 1).unwrap(), vec![buffers[0]]);
    assert!(ctx.unqueue_buffers(source, 1).is_err());

    // stop marks the rest processed as far as the caller can tell
    ctx.stop(source).unwrap();
    assert_eq!(ctx.buffers_processed(source).unwrap(), 3);
    assert_eq!(ctx.unqueue_buffers(source, 3).unwrap(), buffers[1..].to_vec());
    assert_eq!(ctx.buffers_queued(source).unwrap(), 0);

    render_blocks(&ctx, 1);
    assert_eq!(ctx.buffers_queued(source).unwrap(), 0);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
    for b in buffers {
        ctx.delete_buffer(b).unwrap();
    }
}

#[test]
fn queue_rejects_incompatible_buffers() {
    let ctx = context(128);
    let mono = sine_buffer(&ctx, 128);
    let ids = ctx.generate_buffers(3).unwrap();
    ctx.buffer_data(ids[0], AudioFormat::stereo16(RATE), &[0u8; 512])
        .unwrap();
    ctx.buffer_data(ids[1], AudioFormat::mono16(22050), &[0u8; 256])
        .unwrap();

    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[mono]).unwrap();
    for bad in [ids[0], ids[1], ids[2]] {
        assert!(matches!(
            ctx.queue_buffers(source, &[bad]),
            Err(AlSonicError::InvalidOperation(_))
        ));
    }
    assert_eq!(ctx.buffers_queued(source).unwrap(), 1);

    let static_source = ctx.generate_sources(1).unwrap()[0];
    ctx.set_buffer(static_source, Some(mono)).unwrap();
    assert!(ctx.queue_buffers(static_source, &[mono]).is_err());
    ctx.play(static_source).unwrap();
    assert!(ctx.set_buffer(static_source, None).is_err());
}

#[test]
fn offsets_apply_on_play_and_survive_pause() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 4410);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();

    ctx.set_offset(source, SourceOffset::Bytes(4410)).unwrap();
    assert_eq!(ctx.offset_frames(source).unwrap(), 2205);
    match ctx.offset(source, OffsetUnit::Seconds).unwrap() {
        SourceOffset::Seconds(s) => assert!((s - 0.05).abs() < 1e-4),
        other => panic!("unexpected offset {:?}", other),
    }
    assert!(matches!(
        ctx.set_offset(source, SourceOffset::Samples(4410)),
        Err(AlSonicError::InvalidValue(_))
    ));

    ctx.play(source).unwrap();
    assert_eq!(ctx.offset_frames(source).unwrap(), 2205);
    render_blocks(&ctx, 2);
    ctx.pause(source).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Paused);
    render_blocks(&ctx, 1);
    let paused_at = ctx.offset_frames(source).unwrap();
    assert!(paused_at > 2205 + 441 * 2);
    render_blocks(&ctx, 3);
    assert_eq!(ctx.offset_frames(source).unwrap(), paused_at);

    ctx.set_offset(source, SourceOffset::Samples(100)).unwrap();
    assert_eq!(ctx.offset_frames(source).unwrap(), 100);
    ctx.play(source).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);

    ctx.stop(source).unwrap();
    render_blocks(&ctx, 1);
    assert_eq!(ctx.offset_frames(source).unwrap(), 0);
}

#[test]
fn distance_attenuates_spatialized_sources() {
    let ctx = context(512);
    let buffer = sine_buffer(&ctx, RATE as usize);
    let near = ctx.generate_sources(1).unwrap()[0];
    ctx.set_buffer(near, Some(buffer)).unwrap();
    ctx.set_source_vec3(near, SourceVector::Position, Vec3::new(0.0, 0.0, -1.0))
        .unwrap();
    ctx.play(near).unwrap();
    render_blocks(&ctx, 1);
    let near_peak = peak(&render_blocks(&ctx, 2));

    ctx.set_source_vec3(near, SourceVector::Position, Vec3::new(0.0, 0.0, -8.0))
        .unwrap();
    render_blocks(&ctx, 1);
    let far_peak = peak(&render_blocks(&ctx, 2));
    assert!(far_peak < near_peak * 0.2, "{} vs {}", far_peak, near_peak);

    ctx.set_distance_model(DistanceModel::None).unwrap();
    render_blocks(&ctx, 1);
    let flat_peak = peak(&render_blocks(&ctx, 2));
    assert!((flat_peak - near_peak).abs() < near_peak * 0.1);

    assert!(ctx.set_source_f32(near, SourceFloat::Gain, -1.0).is_err());
    assert!(ctx.set_doppler_factor(f32::NAN).is_err());
}

#[test]
fn callbacks_see_every_notification() {
    let ctx = context(441);
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    ctx.on_event(move |event: &AlSonicEvent| {
        if matches!(event, AlSonicEvent::QueueDrained { .. }) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let buffer = sine_buffer(&ctx, 441);
    let sources = ctx.generate_sources(3).unwrap();
    for s in &sources {
        ctx.queue_buffers(*s, &[buffer]).unwrap();
        ctx.play(*s).unwrap();
    }
    render_blocks(&ctx, 2);
    ctx.poll_events();
    assert_eq!(seen.load(Ordering::SeqCst), 3);
}

#[test]
fn api_threads_never_stall_the_render_thread() {
    let ctx = Arc::new(context(64));
    let buffer = sine_buffer(&ctx, 4096);
    let sources = ctx.generate_sources(4).unwrap();
    for s in &sources {
        ctx.set_buffer(*s, Some(buffer)).unwrap();
        ctx.set_looping(*s, true).unwrap();
    }

    let render_ctx = ctx.clone();
    let renderer = std::thread::spawn(move || {
        let mut out = vec![0.0f32; 128];
        for _ in 0..2000 {
            render_ctx.render(&mut out);
        }
    });

    let api_ctx = ctx.clone();
    let api_sources = sources.clone();
    let editor = std::thread::spawn(move || {
        for i in 0..300 {
            let s = api_sources[i % api_sources.len()];
            api_ctx.play(s).unwrap();
            api_ctx
                .set_source_f32(s, SourceFloat::Gain, (i % 10) as f32 / 10.0)
                .unwrap();
            api_ctx
                .set_source_vec3(s, SourceVector::Position, Vec3::new(i as f32, 0.0, 0.0))
                .unwrap();
            if i % 3 == 0 {
                api_ctx.pause(s).unwrap();
            }
            if i % 5 == 0 {
                api_ctx.stop(s).unwrap();
            }
            api_ctx.set_listener_position(Vec3::new(0.0, i as f32, 0.0)).unwrap();
            std::thread::sleep(Duration::from_micros(50));
        }
    });

    editor.join().unwrap();
    renderer.join().unwrap();
    assert_eq!(ctx.frames_rendered(), 2000 * 64);

    for s in &sources {
        ctx.stop(*s).unwrap();
    }
    render_blocks(&ctx, 1);
    for s in &sources {
        assert_eq!(ctx.state(*s).unwrap(), SourceState::Stopped);
        ctx.delete_source(*s).unwrap();
    }
    ctx.poll_events();
    ctx.delete_buffer(buffer).unwrap();
    assert_eq!(ctx.pending_buffer_deletions(), 0);
}

#[test]
fn play_while_playing_restarts_from_the_top() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 4410);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 3);
    assert!(ctx.offset_frames(source).unwrap() > 441 * 3);
    ctx.poll_events();

    ctx.play(source).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    let fade = render_blocks(&ctx, 1);
    assert_eq!(&fade[fade.len() - 2..], &[0.0, 0.0]);
    assert_eq!(ctx.offset_frames(source).unwrap(), 0);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 0);

    let out = render_blocks(&ctx, 2);
    assert!(peak(&out) > 0.1);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    let offset = ctx.offset_frames(source).unwrap();
    assert!(offset > 441 && offset < 441 * 3, "{}", offset);
    // the restart is invisible to listeners of state changes
    assert!(ctx.poll_events().is_empty());
}

#[test]
fn rewind_while_playing_fades_out_and_returns_to_initial() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 4410);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.set_buffer(source, Some(buffer)).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 2);

    ctx.rewind(source).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Initial);
    let fade = render_blocks(&ctx, 1);
    assert!(peak(&fade) > 0.0);
    assert_eq!(&fade[fade.len() - 2..], &[0.0, 0.0]);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Initial);
    assert_eq!(ctx.offset_frames(source).unwrap(), 0);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 0);
    assert_eq!(peak(&render_blocks(&ctx, 1)), 0.0);

    ctx.play(source).unwrap();
    render_blocks(&ctx, 1);
    assert!(peak(&render_blocks(&ctx, 1)) > 0.1);
}

#[test]
fn seeking_a_playing_source_fades_out_before_jumping() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 4410);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 2);

    ctx.set_offset(source, SourceOffset::Samples(3000)).unwrap();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    let fade = render_blocks(&ctx, 1);
    assert!(peak(&fade) > 0.0);
    assert_eq!(&fade[fade.len() - 2..], &[0.0, 0.0]);
    assert_eq!(ctx.offset_frames(source).unwrap(), 3000);

    let out = render_blocks(&ctx, 1);
    assert_eq!(out[0], 0.0);
    assert!(peak(&out) > 0.1);
    // one block plus the two frames the linear resampler reads ahead
    assert_eq!(ctx.offset_frames(source).unwrap(), 3000 + 441 + 2);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
}

#[test]
fn seeking_back_in_the_block_that_drains_keeps_playing() {
    let ctx = context(441);
    let buffer = sine_buffer(&ctx, 882);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 1);

    // the next block runs off the end of the buffer while the seek waits
    ctx.set_offset(source, SourceOffset::Samples(0)).unwrap();
    render_blocks(&ctx, 1);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Playing);
    assert_eq!(ctx.offset_frames(source).unwrap(), 0);
    assert!(peak(&render_blocks(&ctx, 1)) > 0.1);
}

/// The built-in mixer, claiming to convert rates so sources skip resampling
struct RateConvertingMixer(SoftwareMixer);

impl BusMixer for RateConvertingMixer {
    fn block_size(&self) -> usize {
        self.0.block_size()
    }

    fn output_channels(&self) -> u16 {
        self.0.output_channels()
    }

    fn allocate_bus(&mut self, channels: u16) -> Result<BusHandle> {
        self.0.allocate_bus(channels)
    }

    fn release_bus(&mut self, bus: BusHandle) {
        self.0.release_bus(bus)
    }

    fn set_bus_format(&mut self, bus: BusHandle, sample_rate: u32, channels: u16) -> Result<()> {
        self.0.set_bus_format(bus, sample_rate, channels)
    }

    fn set_bus_parameters(&mut self, bus: BusHandle, params: &BusParameters) {
        self.0.set_bus_parameters(bus, params)
    }

    fn bus_input(&mut self, bus: BusHandle) -> Option<&mut [f32]> {
        self.0.bus_input(bus)
    }

    fn mix_into(&mut self, output: &mut [f32]) {
        self.0.mix_into(output)
    }

    fn supports_rate_conversion(&self) -> bool {
        true
    }

    fn supports_native_distance(&self, model: DistanceModel) -> bool {
        self.0.supports_native_distance(model)
    }
}

#[test]
fn buffer_ending_on_a_block_boundary_is_processed_in_that_block() {
    let desc = AlSonicContextDesc::new()
        .sample_rate(RATE)
        .channels(2)
        .block_size(441)
        .max_buses(8);
    let mixer = RateConvertingMixer(SoftwareMixer::new(8, 441, 2));
    let ctx = AlSonicContext::with_mixer(desc, Box::new(mixer)).unwrap();
    let buffer = sine_buffer(&ctx, 441 * 10);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.queue_buffers(source, &[buffer]).unwrap();
    ctx.play(source).unwrap();

    for block in 1..10 {
        render_blocks(&ctx, 1);
        assert_eq!(ctx.state(source).unwrap(), SourceState::Playing, "block {}", block);
        assert_eq!(ctx.buffers_processed(source).unwrap(), 0, "block {}", block);
        assert_eq!(ctx.offset_frames(source).unwrap(), 441 * block as u64);
    }

    let last = render_blocks(&ctx, 1);
    assert!(peak(&last) > 0.1);
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
    assert_eq!(ctx.buffers_processed(source).unwrap(), 1);
    assert!(ctx
        .poll_events()
        .contains(&AlSonicEvent::QueueDrained { source_id: source }));
}

#[test]
fn a_source_can_cycle_through_many_buffer_formats() {
    let ctx = context(128);
    let source = ctx.generate_sources(1).unwrap()[0];
    for round in 0..40u32 {
        let id = ctx.generate_buffers(1).unwrap()[0];
        let format = if round % 2 == 0 {
            AudioFormat::mono16(8000 + round)
        } else {
            AudioFormat::mono8(8000 + round)
        };
        ctx.buffer_data(id, format, &vec![0u8; format.bytes_per_frame() * 64])
            .unwrap();
        ctx.set_buffer(source, Some(id)).unwrap();
        ctx.play(source).unwrap();
        render_blocks(&ctx, 1);
        ctx.stop(source).unwrap();
        ctx.set_buffer(source, None).unwrap();
        ctx.delete_buffer(id).unwrap();
    }
    // the last buffer stays parked until the render thread lets go of it
    render_blocks(&ctx, 2);
    ctx.poll_events();
    assert_eq!(ctx.state(source).unwrap(), SourceState::Stopped);
    assert_eq!(ctx.pending_buffer_deletions(), 0);
}

#[test]
fn refilling_a_buffer_a_fading_source_still_plays() {
    let ctx = context(256);
    let old = sine_buffer(&ctx, RATE as usize);
    let new = sine_buffer(&ctx, 512);
    let source = ctx.generate_sources(1).unwrap()[0];
    ctx.set_buffer(source, Some(old)).unwrap();
    ctx.play(source).unwrap();
    render_blocks(&ctx, 1);

    ctx.stop(source).unwrap();
    ctx.set_buffer(source, Some(new)).unwrap();
    // detached, so it may be refilled while the fade still reads the old data
    ctx.buffer_data(old, AudioFormat::mono16(RATE), &[0u8; 64])
        .unwrap();
    assert_eq!(ctx.pending_buffer_deletions(), 1);

    let fade = render_blocks(&ctx, 1);
    assert!(peak(&fade) > 0.0);
    ctx.poll_events();
    assert_eq!(ctx.pending_buffer_deletions(), 0);
    assert_eq!(ctx.buffer_frames(old).unwrap(), 32);
}
