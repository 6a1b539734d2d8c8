// Voice mixer - the render loop shared by the bundled drivers.
// Runs on the realtime side: it never takes the manager's lock, only
// try-locks individual sounds, and never allocates at steady state.

use super::{DriverContext, MixVolume};
use crate::mixing::MixBuffer;
use crate::report::{PositionReport, ReportSink};
use crate::sound::{SoundHandle, SoundId};
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Start/stop requests from the driver object to its render loop
#[derive(Debug)]
enum VoiceCommand {
    Start(SoundHandle),
    Stop(SoundId),
}

/// Handles travelling back from the render loop
#[derive(Debug)]
enum Released {
    /// Finished or stopped voice
    Done(SoundHandle),
    /// Start request the render loop could not honour
    Rejected(SoundHandle),
}

/// Create the control and render halves for a driver producing
/// `channels`-wide output.
pub fn voice_channel(ctx: &DriverContext, channels: u16) -> (VoiceControl, VoiceMixer) {
    let max_voices = ctx.desc.max_voices;
    let command_capacity = max_voices * 2;
    let (command_sender, command_receiver) = crossbeam_channel::bounded(command_capacity);
    // Room for every handle in flight as long as the control side keeps collecting
    let (released_sender, released_receiver) =
        crossbeam_channel::bounded(max_voices + command_capacity);

    let block_samples = ctx.desc.block_size * channels as usize;
    let control = VoiceControl {
        commands: command_sender,
        released: released_receiver,
    };
    let mixer = VoiceMixer {
        commands: command_receiver,
        released: released_sender,
        voices: Vec::with_capacity(max_voices),
        max_voices,
        scratch: vec![0; block_samples],
        mix: MixBuffer::with_capacity(block_samples, ctx.mix_volume.get()),
        reports: ctx.reports.clone(),
        mix_volume: ctx.mix_volume.clone(),
        channels,
        frame: 0,
    };
    (control, mixer)
}

/// Control half, owned by the driver object on the manager's side
pub struct VoiceControl {
    commands: Sender<VoiceCommand>,
    released: Receiver<Released>,
}

impl VoiceControl {
    /// Queue `sound` for mixing. A request that cannot be queued stops the
    /// sound, so the manager sees it as finished.
    pub fn start(&self, sound: &SoundHandle) {
        if let Err(e) = self.commands.try_send(VoiceCommand::Start(sound.clone())) {
            log::warn!("Dropped start request for {}: {}", sound.id(), e);
            sound.lock().stop();
        }
    }

    pub fn stop(&self, id: SoundId) {
        if let Err(e) = self.commands.try_send(VoiceCommand::Stop(id)) {
            log::warn!("Dropped stop request for {}: {}", id, e);
        }
    }

    /// Drop the handles the render loop is done with. Call from the control
    /// thread so the last reference to a sound never goes away on the
    /// realtime side.
    ///
    /// Sounds the render loop rejected are stopped here if it could not stop
    /// them itself.
    pub fn collect_released(&self) -> usize {
        let mut count = 0;
        for released in self.released.try_iter() {
            if let Released::Rejected(sound) = &released {
                sound.lock().stop();
            }
            count += 1;
        }
        count
    }
}

/// Render half: mixes every active voice into output slices
pub struct VoiceMixer {
    commands: Receiver<VoiceCommand>,
    released: Sender<Released>,
    voices: Vec<SoundHandle>,
    max_voices: usize,
    scratch: Vec<i16>,
    mix: MixBuffer,
    reports: ReportSink,
    mix_volume: MixVolume,
    channels: u16,
    frame: i64,
}

impl VoiceMixer {
    /// Frames rendered so far; the driver frame of the next slice
    pub fn frame(&self) -> i64 {
        self.frame
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Render one slice into `out` (interleaved `f32`), overwriting it.
    ///
    /// Every voice delivers its frames and commits one position report for
    /// the slice. Voices that come up short have finished and are released.
    /// Returns the number of frames rendered.
    pub fn render(&mut self, out: &mut [f32]) -> usize {
        self.apply_commands();

        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let samples = frames * channels;
        if self.scratch.len() < samples {
            self.scratch.resize(samples, 0);
        }
        self.mix.set_volume(self.mix_volume.get());

        let frame = self.frame;
        let mut index = 0;
        while index < self.voices.len() {
            let voice = &self.voices[index];
            let finished = match voice.try_lock() {
                Some(mut sound) => {
                    let scratch = &mut self.scratch[..samples];
                    let (position, got_frames) = sound.read_frames(scratch, self.channels);
                    self.reports.commit(PositionReport {
                        id: voice.id(),
                        frame,
                        position,
                        got_frames,
                    });
                    self.mix.write(&scratch[..got_frames * channels], None, 0);
                    got_frames < frames || !sound.is_playing()
                }
                None => {
                    log::trace!("{} is busy, skipping slice at frame {}", voice.id(), frame);
                    false
                }
            };

            if finished {
                let voice = self.voices.swap_remove(index);
                self.release(Released::Done(voice));
            } else {
                index += 1;
            }
        }

        let mixed = self.mix.read_f32(&mut out[..samples]);
        out[mixed..].fill(0.0);
        self.frame += frames as i64;
        frames
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                VoiceCommand::Start(sound) => {
                    if self.voices.iter().any(|v| v.id() == sound.id()) {
                        self.release(Released::Done(sound));
                    } else if self.voices.len() >= self.max_voices {
                        log::warn!("Voice limit reached, not mixing {}", sound.id());
                        if let Some(mut rejected) = sound.try_lock() {
                            rejected.stop();
                        }
                        self.release(Released::Rejected(sound));
                    } else {
                        self.voices.push(sound);
                    }
                }
                VoiceCommand::Stop(id) => {
                    if let Some(index) = self.voices.iter().position(|v| v.id() == id) {
                        let voice = self.voices.swap_remove(index);
                        self.release(Released::Done(voice));
                    }
                }
            }
        }
    }

    fn release(&self, released: Released) {
        match self.released.try_send(released) {
            Ok(()) => {}
            Err(TrySendError::Full(released)) | Err(TrySendError::Disconnected(released)) => {
                let (Released::Done(voice) | Released::Rejected(voice)) = &released;
                log::warn!(
                    "Release queue unavailable, dropping {} on the render thread",
                    voice.id()
                );
            }
        }
    }
}
