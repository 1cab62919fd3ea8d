use alsonic::{
    AlSonicContext, AlSonicContextDesc, AlSonicEngine, AlSonicEvent, AudioFormat, BufferId,
    SourceFloat, SourceState, SourceVector, Vec3,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

const TONE_RATE: u32 = 22050;

/// One second of a 16-bit mono sine
fn upload_tone(context: &AlSonicContext, frequency: f32) -> Result<BufferId> {
    let buffer = context.generate_buffers(1)?[0];
    let data: Vec<u8> = (0..TONE_RATE)
        .flat_map(|i| {
            let phase = i as f32 / TONE_RATE as f32 * frequency * std::f32::consts::TAU;
            ((phase.sin() * 12000.0) as i16).to_le_bytes()
        })
        .collect();
    context.buffer_data(buffer, AudioFormat::mono16(TONE_RATE), &data)?;
    Ok(buffer)
}

fn log_events(context: &AlSonicContext) {
    for event in context.poll_events() {
        match event {
            AlSonicEvent::StateChanged { source_id, state } => {
                log::info!("{} is now {:?}", source_id, state)
            }
            AlSonicEvent::QueueDrained { source_id } => log::info!("{} drained", source_id),
            other => log::debug!("{:?}", other),
        }
    }
}

/// A looping tone circling the listener, played on the default device
pub fn run_orbit() -> Result<()> {
    let context = Arc::new(AlSonicContext::new(AlSonicContextDesc::default())?);
    let tone = upload_tone(&context, 440.0)?;
    let source = context.generate_sources(1)?[0];
    context.set_buffer(source, Some(tone))?;
    context.set_looping(source, true)?;
    context.set_source_f32(source, SourceFloat::ReferenceDistance, 2.0)?;

    let mut engine = AlSonicEngine::new(context.clone());
    engine.start().context("starting the output device")?;
    context.play(source)?;
    log::info!("Orbiting {} around the listener for 8 seconds", source);

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(8) {
        let t = start.elapsed().as_secs_f32();
        let (sin, cos) = (t * 1.2).sin_cos();
        context.set_source_vec3(source, SourceVector::Position, Vec3::new(4.0 * sin, 0.0, -4.0 * cos))?;
        context.set_source_vec3(source, SourceVector::Velocity, Vec3::new(4.8 * cos, 0.0, 4.8 * sin))?;
        log_events(&context);
        std::thread::sleep(Duration::from_millis(20));
    }

    context.stop(source)?;
    std::thread::sleep(Duration::from_millis(100));
    log_events(&context);
    engine.stop()?;
    log::info!(
        "Done: {} frames played, {} underruns",
        engine.frames_processed(),
        engine.underruns()
    );
    Ok(())
}

/// Feed a source a queue of short buffers, recycling them as they are processed
pub fn run_streaming() -> Result<()> {
    let context = Arc::new(AlSonicContext::new(AlSonicContextDesc::default())?);
    let notes = [261.6, 329.6, 392.0, 523.3];
    let buffers = notes
        .iter()
        .map(|f| upload_tone(&context, *f))
        .collect::<Result<Vec<_>>>()?;
    let source = context.generate_sources(1)?[0];
    context.queue_buffers(source, &buffers)?;

    let mut engine = AlSonicEngine::new(context.clone());
    engine.start().context("starting the output device")?;
    context.play(source)?;

    let mut requeued = 0;
    while requeued < 8 {
        let processed = context.buffers_processed(source)?;
        if processed > 0 {
            let done = context.unqueue_buffers(source, processed)?;
            requeued += done.len();
            context.queue_buffers(source, &done)?;
            if context.state(source)? == SourceState::Stopped {
                context.play(source)?;
            }
        }
        log_events(&context);
        std::thread::sleep(Duration::from_millis(50));
    }

    context.stop(source)?;
    std::thread::sleep(Duration::from_millis(100));
    engine.stop()?;
    Ok(())
}

/// Render without a device and report levels, handy on headless machines
pub fn run_offline() -> Result<()> {
    let desc = AlSonicContextDesc::default();
    let context = AlSonicContext::new(desc.clone())?;
    let tone = upload_tone(&context, 440.0)?;
    let sources = context.generate_sources(2)?;
    for (i, source) in sources.iter().enumerate() {
        context.set_buffer(*source, Some(tone))?;
        let x = if i == 0 { -3.0 } else { 3.0 };
        context.set_source_vec3(*source, SourceVector::Position, Vec3::new(x, 0.0, -1.0))?;
        context.play(*source)?;
    }

    let mut block = vec![0.0f32; desc.block_size * desc.channels as usize];
    let mut rendered = 0;
    while sources
        .iter()
        .any(|s| matches!(context.state(*s), Ok(SourceState::Playing)))
    {
        context.render(&mut block);
        rendered += desc.block_size;
        let (left, right) = block.chunks_exact(2).fold((0.0f32, 0.0f32), |(l, r), f| {
            (l.max(f[0].abs()), r.max(f[1].abs()))
        });
        log::debug!("{:>7} frames  L {:.3}  R {:.3}", rendered, left, right);
        log_events(&context);
    }
    log::info!(
        "Rendered {:.2}s of audio offline",
        rendered as f32 / desc.sample_rate as f32
    );
    Ok(())
}
