use super::{DriverContext, SoundDriver, VoiceControl, VoiceMixer, voice_channel};
use crate::sound::{SoundHandle, SoundId};

/// Driver without an output device.
///
/// Sounds are rendered and discarded at the pace of `update`, so playback,
/// position reports and completion behave as they would with real output.
/// Useful headless and in tests.
pub struct NullDriver {
    voices: VoiceControl,
    mixer: VoiceMixer,
    block: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
    elapsed: f64,
}

impl NullDriver {
    pub fn new(ctx: DriverContext) -> Self {
        let channels = ctx.desc.channels;
        let (voices, mixer) = voice_channel(&ctx, channels);
        Self {
            voices,
            mixer,
            block: vec![0.0; ctx.desc.block_samples()],
            block_size: ctx.desc.block_size,
            sample_rate: ctx.desc.sample_rate,
            elapsed: 0.0,
        }
    }

    /// Render exactly `frames` frames, in slices of at most one block
    pub fn render_frames(&mut self, frames: usize) {
        let channels = self.mixer.channels() as usize;
        let mut remaining = frames;
        while remaining > 0 {
            let slice = remaining.min(self.block_size);
            self.mixer.render(&mut self.block[..slice * channels]);
            remaining -= slice;
        }
        self.voices.collect_released();
    }

    /// Frames rendered so far
    pub fn frames_rendered(&self) -> i64 {
        self.mixer.frame()
    }
}

impl SoundDriver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn start_mixing(&mut self, sound: &SoundHandle) {
        self.voices.start(sound);
    }

    fn stop_mixing(&mut self, id: SoundId) {
        self.voices.stop(id);
    }

    fn position(&self, _id: SoundId) -> i64 {
        self.mixer.frame()
    }

    fn update(&mut self, delta: f32) {
        // Track total time so f32 deltas do not drift the frame count
        self.elapsed += delta.max(0.0) as f64;
        let target = (self.elapsed * self.sample_rate as f64).round() as i64;
        let frames = (target - self.mixer.frame()).max(0);
        self.render_frames(frames as usize);
    }

    fn sample_rate(&self, _requested: Option<u32>) -> u32 {
        self.sample_rate
    }

    fn play_latency(&self) -> f32 {
        0.0
    }

    fn volume_changed(&mut self) {
        log::debug!("Null driver: mix volume now applies from the next slice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SoundManagerDesc;
    use crate::driver::MixVolume;
    use crate::report::report_channel;
    use crate::sound::{PcmSound, Sound};

    #[test]
    fn test_update_renders_elapsed_time() {
        let (reports, queue) = report_channel(64);
        let ctx = DriverContext {
            desc: SoundManagerDesc::default().sample_rate(1000).block_size(100),
            reports,
            mix_volume: MixVolume::new(1.0),
        };
        let mut driver = NullDriver::new(ctx);

        let mut sound = PcmSound::new(vec![0i16; 1000], 1, 1000).unwrap();
        sound.start();
        let handle = SoundHandle::new(SoundId::from_raw(1), SoundId::from_raw(1), Box::new(sound));
        driver.start_mixing(&handle);

        driver.update(0.25);
        assert_eq!(driver.position(handle.id()), 250);
        assert_eq!(queue.len(), 3);

        driver.update(0.0005);
        driver.update(0.0005);
        assert_eq!(driver.frames_rendered(), 251);
        assert_eq!(driver.sample_rate(Some(44100)), 1000);
        assert_eq!(driver.play_latency(), 0.0);
    }
}
