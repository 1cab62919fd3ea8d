use crate::context::AlSonicContext;
use crate::error::{AlSonicError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Drives a context in real time and plays the mix on the default output device.
///
/// A dedicated render thread calls [`AlSonicContext::render`] one block at a time and
/// pushes the result into a lock-free ring; the device callback only pops from it.
/// When the ring runs dry the device plays silence.
pub struct AlSonicEngine {
    context: Arc<AlSonicContext>,
    stream: Option<cpal::Stream>,
    render_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
    frames_processed: Arc<AtomicUsize>,
    underruns: Arc<AtomicUsize>,
}

impl AlSonicEngine {
    pub fn new(context: Arc<AlSonicContext>) -> Self {
        Self {
            context,
            stream: None,
            render_thread: None,
            is_running: Arc::new(AtomicBool::new(false)),
            frames_processed: Arc::new(AtomicUsize::new(0)),
            underruns: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn context(&self) -> &Arc<AlSonicContext> {
        &self.context
    }

    /// Open the default output device and start rendering
    pub fn start(&mut self) -> Result<()> {
        if self.is_running.load(Ordering::Relaxed) {
            return Ok(());
        }

        let desc = self.context.desc().clone();
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or_else(|| {
            AlSonicError::AudioDevice("No default output device available".into())
        })?;

        let config = cpal::StreamConfig {
            channels: desc.channels,
            sample_rate: cpal::SampleRate(desc.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let default_config = device.default_output_config().map_err(|e| {
            AlSonicError::AudioDevice(format!("Failed to get default config: {}", e))
        })?;

        let block_len = desc.block_size * desc.channels as usize;
        let ring = HeapRb::<f32>::new(block_len * desc.engine_buffer_blocks.max(2));
        let (producer, consumer) = ring.split();

        let stream = match default_config.sample_format() {
            cpal::SampleFormat::F32 => self.create_stream::<f32>(&device, &config, consumer)?,
            cpal::SampleFormat::I16 => self.create_stream::<i16>(&device, &config, consumer)?,
            cpal::SampleFormat::U16 => self.create_stream::<u16>(&device, &config, consumer)?,
            other => {
                return Err(AlSonicError::Unsupported(format!(
                    "Device sample format {:?}",
                    other
                )));
            }
        };

        self.is_running.store(true, Ordering::Release);
        let context = self.context.clone();
        let is_running = self.is_running.clone();
        let render_thread = std::thread::Builder::new()
            .name("alsonic-render".to_string())
            .spawn(move || render_loop(context, producer, is_running))
            .map_err(|e| {
                self.is_running.store(false, Ordering::Release);
                AlSonicError::ResourceExhausted(format!("Failed to spawn render thread: {}", e))
            })?;
        self.render_thread = Some(render_thread);

        if let Err(e) = stream.play() {
            self.stop()?;
            return Err(AlSonicError::AudioDevice(format!(
                "Failed to start stream: {}",
                e
            )));
        }
        self.stream = Some(stream);

        log::info!(
            "Audio engine started: {} Hz, {} channel(s), {:?} device samples",
            desc.sample_rate,
            desc.channels,
            default_config.sample_format()
        );
        Ok(())
    }

    /// Stop the device stream and join the render thread
    pub fn stop(&mut self) -> Result<()> {
        self.is_running.store(false, Ordering::Release);
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        if let Some(thread) = self.render_thread.take() {
            if thread.join().is_err() {
                log::error!("Render thread panicked");
            }
            log::info!("Audio engine stopped");
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames handed to the device since start
    pub fn frames_processed(&self) -> usize {
        self.frames_processed.load(Ordering::Relaxed)
    }

    /// Device callbacks that found the ring short of data
    pub fn underruns(&self) -> usize {
        self.underruns.load(Ordering::Relaxed)
    }

    fn create_stream<T>(
        &self,
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut consumer: HeapCons<f32>,
    ) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels as usize;
        let is_running = self.is_running.clone();
        let frames_processed = self.frames_processed.clone();
        let underruns = self.underruns.clone();
        let mut scratch: Vec<f32> = vec![0.0; 4096];

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    if scratch.len() < data.len() {
                        scratch.resize(data.len(), 0.0);
                    }
                    let scratch = &mut scratch[..data.len()];
                    let popped = if is_running.load(Ordering::Relaxed) {
                        consumer.pop_slice(scratch)
                    } else {
                        0
                    };
                    if popped < scratch.len() {
                        scratch[popped..].fill(0.0);
                        if is_running.load(Ordering::Relaxed) {
                            underruns.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                        *out = T::from_sample(*sample);
                    }
                    frames_processed.fetch_add(popped / channels.max(1), Ordering::Relaxed);
                },
                move |err| {
                    log::error!("Audio stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AlSonicError::AudioDevice(format!("Failed to build stream: {}", e)))
    }
}

/// Keep the ring topped up with whole blocks until told to stop
fn render_loop(context: Arc<AlSonicContext>, mut producer: HeapProd<f32>, is_running: Arc<AtomicBool>) {
    let block_len = context.block_size() * context.channels() as usize;
    let mut block = vec![0.0f32; block_len];
    let block_time =
        Duration::from_secs_f64(context.block_size() as f64 / context.sample_rate() as f64);

    while is_running.load(Ordering::Acquire) {
        if producer.vacant_len() < block_len {
            std::thread::sleep(block_time / 4);
            continue;
        }
        context.render(&mut block);
        producer.push_slice(&block);
    }
    log::debug!("Render thread exiting");
}

impl Drop for AlSonicEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
