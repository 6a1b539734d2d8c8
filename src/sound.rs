//! Sound objects and the handles the manager issues for them.
//!
//! - [`Sound`]: the playable object contract (start/stop, params, seeking,
//!   sample delivery, position bookkeeping)
//! - [`SoundHandle`]: shared, cloneable reference to a registered sound,
//!   carrying its [`SoundId`] and the id of the sound it was copied from
//! - [`PcmSound`]: in-memory interleaved 16-bit implementation of [`Sound`]

use crate::error::{Result, SoundManError};
use crate::mixing::attenuate;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

/// Identity of a registered sound.
///
/// Assigned by [`SoundManager::register`](crate::SoundManager::register),
/// starting at 1 and never reused by the same manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SoundId(u64);

impl SoundId {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SoundId({})", self.0)
    }
}

/// Per-playback parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SoundParams {
    /// Position, in seconds, that `play` seeks to before starting
    pub start_second: f32,
    /// Linear gain applied to this sound only (1.0 = unchanged)
    pub volume: f32,
}

impl Default for SoundParams {
    fn default() -> Self {
        Self {
            start_second: 0.0,
            volume: 1.0,
        }
    }
}

impl SoundParams {
    pub fn start_second(mut self, seconds: f32) -> Self {
        self.start_second = seconds;
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }
}

/// A playable sound.
///
/// Control methods are called by the manager under its lock. `read_frames`
/// is called from the driver's render thread and must not block or
/// allocate.
pub trait Sound: Send {
    fn is_playing(&self) -> bool;

    /// Begin playback from the current position
    fn start(&mut self);

    /// Stop playback, keeping the current position
    fn stop(&mut self);

    fn params(&self) -> &SoundParams;

    fn set_params(&mut self, params: SoundParams);

    fn set_position_seconds(&mut self, seconds: f32);

    /// Per-frame tick from the manager's update thread
    fn update(&mut self, _delta: f32) {}

    /// Record that `got_frames` frames starting at sound position `position`
    /// will be heard from driver frame `frame` onwards
    fn commit_playing_position(&mut self, frame: i64, position: i64, got_frames: usize);

    /// Sound position heard at driver frame `frame`, from committed positions
    fn position_at(&self, frame: i64) -> Option<i64>;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Create an idle copy of this sound that can play independently
    fn duplicate(&self) -> Box<dyn Sound>;

    /// Fill `out` (interleaved, `channels` wide) with the next frames.
    ///
    /// Returns the sound position of the first frame and the number of
    /// frames delivered. Fewer frames than requested means the sound ended.
    fn read_frames(&mut self, out: &mut [i16], channels: u16) -> (i64, usize);
}

/// Shared reference to a registered sound
#[derive(Clone)]
pub struct SoundHandle {
    id: SoundId,
    original: SoundId,
    sound: Arc<Mutex<Box<dyn Sound>>>,
}

impl SoundHandle {
    pub(crate) fn new(id: SoundId, original: SoundId, sound: Box<dyn Sound>) -> Self {
        Self {
            id,
            original,
            sound: Arc::new(Mutex::new(sound)),
        }
    }

    pub fn id(&self) -> SoundId {
        self.id
    }

    /// Id of the sound this one was copied from, or its own id
    pub fn original(&self) -> SoundId {
        self.original
    }

    pub fn is_copy(&self) -> bool {
        self.original != self.id
    }

    /// Lock the sound for control-side access
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Sound>> {
        self.sound.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock the sound without waiting; `None` if someone else holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Box<dyn Sound>>> {
        match self.sound.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Number of live references to the underlying sound
    pub(crate) fn ref_count(&self) -> usize {
        Arc::strong_count(&self.sound)
    }
}

impl PartialEq for SoundHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SoundHandle {}

impl std::fmt::Debug for SoundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundHandle")
            .field("id", &self.id)
            .field("original", &self.original)
            .finish()
    }
}

/// Committed positions kept per sound
const POSITION_MAP_LEN: usize = 64;

#[derive(Debug, Clone, Copy)]
struct PositionMapEntry {
    frame: i64,
    position: i64,
    frames: usize,
}

/// In-memory sound holding interleaved 16-bit samples.
///
/// Copies made with [`Sound::duplicate`] share the sample data.
#[derive(Debug)]
pub struct PcmSound {
    samples: Arc<[i16]>,
    channels: u16,
    sample_rate: u32,
    total_frames: usize,
    cursor: usize,
    playing: bool,
    params: SoundParams,
    position_map: VecDeque<PositionMapEntry>,
}

impl PcmSound {
    pub fn new(samples: impl Into<Arc<[i16]>>, channels: u16, sample_rate: u32) -> Result<Self> {
        let samples = samples.into();
        if channels == 0 {
            return Err(SoundManError::AudioFormat("sound has no channels".into()));
        }
        if sample_rate == 0 {
            return Err(SoundManError::AudioFormat("sound has no sample rate".into()));
        }
        if samples.len() % channels as usize != 0 {
            return Err(SoundManError::AudioFormat(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }

        let total_frames = samples.len() / channels as usize;
        Ok(Self {
            samples,
            channels,
            sample_rate,
            total_frames,
            cursor: 0,
            playing: false,
            params: SoundParams::default(),
            position_map: VecDeque::with_capacity(POSITION_MAP_LEN),
        })
    }

    pub fn with_params(mut self, params: SoundParams) -> Self {
        self.params = params;
        self
    }

    pub fn total_frames(&self) -> usize {
        self.total_frames
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.total_frames as f64 / self.sample_rate as f64)
    }

    /// Current read position in frames
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Sound for PcmSound {
    fn is_playing(&self) -> bool {
        self.playing
    }

    fn start(&mut self) {
        self.position_map.clear();
        self.playing = self.cursor < self.total_frames;
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn params(&self) -> &SoundParams {
        &self.params
    }

    fn set_params(&mut self, params: SoundParams) {
        self.params = params;
    }

    fn set_position_seconds(&mut self, seconds: f32) {
        let frame = (seconds.max(0.0) as f64 * self.sample_rate as f64).round() as usize;
        self.cursor = frame.min(self.total_frames);
    }

    fn commit_playing_position(&mut self, frame: i64, position: i64, got_frames: usize) {
        if self.position_map.len() == POSITION_MAP_LEN {
            self.position_map.pop_front();
        }
        self.position_map.push_back(PositionMapEntry {
            frame,
            position,
            frames: got_frames,
        });
    }

    fn position_at(&self, frame: i64) -> Option<i64> {
        let entry = self
            .position_map
            .iter()
            .rev()
            .find(|entry| entry.frame <= frame)
            .or_else(|| self.position_map.front())?;

        let offset = (frame - entry.frame).max(0);
        Some((entry.position + offset).min(self.total_frames as i64))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn duplicate(&self) -> Box<dyn Sound> {
        Box::new(Self {
            samples: self.samples.clone(),
            channels: self.channels,
            sample_rate: self.sample_rate,
            total_frames: self.total_frames,
            cursor: 0,
            playing: false,
            params: self.params.clone(),
            position_map: VecDeque::with_capacity(POSITION_MAP_LEN),
        })
    }

    fn read_frames(&mut self, out: &mut [i16], channels: u16) -> (i64, usize) {
        let start = self.cursor as i64;
        if !self.playing || channels == 0 {
            return (start, 0);
        }

        let out_channels = channels as usize;
        let src_channels = self.channels as usize;
        let wanted = out.len() / out_channels;
        let frames = wanted.min(self.total_frames - self.cursor);

        for (frame_idx, frame) in out.chunks_exact_mut(out_channels).take(frames).enumerate() {
            let src = (self.cursor + frame_idx) * src_channels;
            for (channel, sample) in frame.iter_mut().enumerate() {
                *sample = self.samples[src + channel.min(src_channels - 1)];
            }
        }

        let written = &mut out[..frames * out_channels];
        if self.params.volume != 1.0 {
            attenuate(written, self.params.volume);
        }

        self.cursor += frames;
        if self.cursor >= self.total_frames {
            self.playing = false;
        }
        (start, frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> PcmSound {
        let samples: Vec<i16> = (0..frames as i16).collect();
        PcmSound::new(samples, 1, 1000).unwrap()
    }

    #[test]
    fn test_rejects_bad_layout() {
        assert!(PcmSound::new(vec![0i16; 3], 2, 44100).is_err());
        assert!(PcmSound::new(vec![0i16; 4], 0, 44100).is_err());
        assert!(PcmSound::new(vec![0i16; 4], 2, 0).is_err());
    }

    #[test]
    fn test_read_frames_upmixes_mono() {
        let mut sound = ramp(8);
        sound.start();

        let mut out = [0i16; 6];
        assert_eq!(sound.read_frames(&mut out, 2), (0, 3));
        assert_eq!(out, [0, 0, 1, 1, 2, 2]);
        assert_eq!(sound.read_frames(&mut out, 2), (3, 3));
        assert_eq!(out, [3, 3, 4, 4, 5, 5]);
    }

    #[test]
    fn test_read_frames_stops_at_end() {
        let mut sound = ramp(4);
        sound.start();

        let mut out = [0i16; 6];
        assert_eq!(sound.read_frames(&mut out, 1), (0, 4));
        assert!(!sound.is_playing());
        assert_eq!(sound.read_frames(&mut out, 1), (4, 0));
    }

    #[test]
    fn test_idle_sound_delivers_nothing() {
        let mut sound = ramp(4);
        let mut out = [7i16; 4];
        assert_eq!(sound.read_frames(&mut out, 1), (0, 0));
        assert_eq!(out, [7; 4]);
    }

    #[test]
    fn test_volume_param_attenuates() {
        let samples = vec![1000i16, -1000];
        let mut sound = PcmSound::new(samples, 2, 1000)
            .unwrap()
            .with_params(SoundParams::default().volume(0.5));
        sound.start();

        let mut out = [0i16; 2];
        sound.read_frames(&mut out, 2);
        assert_eq!(out, [500, -500]);
    }

    #[test]
    fn test_seek_and_duplicate() {
        let mut sound = ramp(1000);
        sound.set_position_seconds(0.25);
        assert_eq!(sound.cursor(), 250);
        sound.set_position_seconds(5.0);
        assert_eq!(sound.cursor(), 1000);
        sound.set_position_seconds(-1.0);
        assert_eq!(sound.cursor(), 0);

        sound.start();
        let copy = sound.duplicate();
        assert!(!copy.is_playing());
        assert_eq!(copy.sample_rate(), 1000);
        assert_eq!(copy.params(), sound.params());
    }

    #[test]
    fn test_position_map_lookup() {
        let mut sound = ramp(1000);
        assert_eq!(sound.position_at(10), None);

        sound.commit_playing_position(100, 0, 64);
        sound.commit_playing_position(164, 64, 64);
        assert_eq!(sound.position_at(100), Some(0));
        assert_eq!(sound.position_at(170), Some(70));
        assert_eq!(sound.position_at(50), Some(0));
        assert_eq!(sound.position_at(5000), Some(1000));
    }

    #[test]
    fn test_handle_identity() {
        let original = SoundHandle::new(SoundId(1), SoundId(1), Box::new(ramp(4)));
        let copy = SoundHandle::new(SoundId(2), SoundId(1), Box::new(ramp(4)));
        assert!(!original.is_copy());
        assert!(copy.is_copy());
        assert_eq!(copy.original(), original.id());
        assert_ne!(original, copy);
        assert_eq!(original.clone(), original);

        let guard = original.lock();
        assert!(original.try_lock().is_none());
        drop(guard);
        assert!(original.try_lock().is_some());
    }
}
