use super::{DriverContext, SoundDriver, VoiceControl, voice_channel};
use crate::error::{Result, SoundManError};
use crate::sound::{SoundHandle, SoundId};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SizedSample};
use ringbuf::{
    HeapCons, HeapRb,
    traits::{Consumer, Observer, Producer, Split},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the render thread waits for ring space before checking again
const RENDER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Driver playing through the default cpal output device.
///
/// A dedicated render thread owns the cpal stream. It mixes slices with a
/// [`VoiceMixer`](super::VoiceMixer) into a lock-free ring buffer, and the
/// device callback only copies samples out of that ring.
pub struct CpalDriver {
    voices: VoiceControl,
    running: Arc<AtomicBool>,
    frames_played: Arc<AtomicI64>,
    render_thread: Option<JoinHandle<()>>,
    sample_rate: u32,
    latency: f32,
}

struct OutputSetup {
    voices: VoiceControl,
    sample_rate: u32,
    latency: f32,
}

impl CpalDriver {
    /// Open the default output device and start rendering
    pub fn new(ctx: DriverContext) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let frames_played = Arc::new(AtomicI64::new(0));
        let (ready_sender, ready_receiver) = crossbeam_channel::bounded::<Result<OutputSetup>>(1);

        let thread_running = running.clone();
        let thread_frames = frames_played.clone();
        let render_thread = thread::Builder::new()
            .name("soundman-render".into())
            .spawn(move || render_loop(ctx, thread_running, thread_frames, ready_sender))
            .map_err(|e| {
                SoundManError::AudioDevice(format!("Failed to spawn render thread: {}", e))
            })?;

        let setup = match ready_receiver.recv() {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => {
                let _ = render_thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = render_thread.join();
                return Err(SoundManError::AudioDevice(
                    "Render thread exited during startup".into(),
                ));
            }
        };

        log::info!(
            "cpal output started at {} Hz, {:.1} ms buffered",
            setup.sample_rate,
            setup.latency * 1000.0
        );

        Ok(Self {
            voices: setup.voices,
            running,
            frames_played,
            render_thread: Some(render_thread),
            sample_rate: setup.sample_rate,
            latency: setup.latency,
        })
    }
}

impl SoundDriver for CpalDriver {
    fn name(&self) -> &str {
        "cpal"
    }

    fn start_mixing(&mut self, sound: &SoundHandle) {
        self.voices.start(sound);
    }

    fn stop_mixing(&mut self, id: SoundId) {
        self.voices.stop(id);
    }

    fn position(&self, _id: SoundId) -> i64 {
        self.frames_played.load(Ordering::Relaxed)
    }

    fn update(&mut self, _delta: f32) {
        self.voices.collect_released();
    }

    fn sample_rate(&self, _requested: Option<u32>) -> u32 {
        self.sample_rate
    }

    fn play_latency(&self) -> f32 {
        self.latency
    }

    fn volume_changed(&mut self) {
        log::debug!("cpal driver: mix volume now applies from the next slice");
    }
}

impl Drop for CpalDriver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.render_thread.take() {
            if thread.join().is_err() {
                log::error!("Render thread panicked");
            }
        }
        self.voices.collect_released();
        log::info!("cpal output stopped");
    }
}

/// Body of the render thread: open the device, report back, then keep the
/// ring buffer topped up until told to stop.
fn render_loop(
    ctx: DriverContext,
    running: Arc<AtomicBool>,
    frames_played: Arc<AtomicI64>,
    ready: crossbeam_channel::Sender<Result<OutputSetup>>,
) {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        let _ = ready.send(Err(SoundManError::AudioDevice(
            "No default output device available".into(),
        )));
        return;
    };

    let default_config = match device.default_output_config() {
        Ok(config) => config,
        Err(e) => {
            let _ = ready.send(Err(SoundManError::AudioDevice(format!(
                "Failed to get default config: {}",
                e
            ))));
            return;
        }
    };

    let sample_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    if sample_rate != ctx.desc.sample_rate {
        log::warn!(
            "Device runs at {} Hz instead of the requested {} Hz",
            sample_rate,
            ctx.desc.sample_rate
        );
    }

    let block_samples = ctx.desc.block_size * channels as usize;
    let ring_samples = ((ctx.desc.buffer_duration.as_secs_f64() * sample_rate as f64) as usize
        * channels as usize)
        .max(block_samples * 2);
    let (mut producer, consumer) = HeapRb::<f32>::new(ring_samples).split();

    let stream = match default_config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_stream::<f32>(&device, &config, consumer, frames_played, channels)
        }
        cpal::SampleFormat::I16 => {
            build_stream::<i16>(&device, &config, consumer, frames_played, channels)
        }
        cpal::SampleFormat::U16 => {
            build_stream::<u16>(&device, &config, consumer, frames_played, channels)
        }
        other => Err(SoundManError::AudioFormat(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    };
    let stream = match stream.and_then(|stream| {
        stream.play().map_err(|e| {
            SoundManError::AudioDevice(format!("Failed to start stream: {}", e))
        })?;
        Ok(stream)
    }) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let (voices, mut mixer) = voice_channel(&ctx, channels);
    let latency = ring_samples as f32 / channels as f32 / sample_rate as f32;
    if ready
        .send(Ok(OutputSetup {
            voices,
            sample_rate,
            latency,
        }))
        .is_err()
    {
        return;
    }

    let mut block = vec![0.0f32; block_samples];
    while running.load(Ordering::Acquire) {
        if producer.vacant_len() < block_samples {
            thread::sleep(RENDER_POLL_INTERVAL);
            continue;
        }
        mixer.render(&mut block);
        producer.push_slice(&block);
    }

    drop(stream);
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<f32>,
    frames_played: Arc<AtomicI64>,
    channels: u16,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = channels as usize;
    // Resized only if the device asks for more than this in one callback
    let mut temp_buffer = vec![0.0f32; 4096];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if temp_buffer.len() < data.len() {
                    temp_buffer.resize(data.len(), 0.0);
                }
                let popped = consumer.pop_slice(&mut temp_buffer[..data.len()]);
                for (sample, &value) in data.iter_mut().zip(&temp_buffer[..popped]) {
                    *sample = T::from_sample(value);
                }
                for sample in &mut data[popped..] {
                    *sample = T::from_sample(0.0f32);
                }
                frames_played.fetch_add((popped / channels) as i64, Ordering::Relaxed);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| SoundManError::AudioDevice(format!("Failed to build stream: {}", e)))
}
