//! Loading sounds from files for [`SoundManager::play_once`](crate::SoundManager::play_once).

use crate::error::{Result, SoundManError};
use crate::sound::{PcmSound, Sound};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::{
    core::{
        audio::SampleBuffer, codecs::DecoderOptions, errors::Error, formats::FormatOptions,
        io::MediaSourceStream, meta::MetadataOptions, probe::Hint,
    },
    default::{get_codecs, get_probe},
};

#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Fill read-ahead before returning. One-shot sounds skip this so they
    /// start as soon as possible.
    pub prebuffer: bool,
    /// Maximum duration to load (None = load entire file)
    pub max_duration: Option<Duration>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            prebuffer: true,
            max_duration: None,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prebuffer(mut self, prebuffer: bool) -> Self {
        self.prebuffer = prebuffer;
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }
}

/// Creates sound objects from paths
pub trait SoundLoader: Send + Sync {
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Box<dyn Sound>>;
}

/// Loads any format symphonia can probe into a [`PcmSound`].
///
/// The whole file is decoded up front, so there is no read-ahead stage and
/// `prebuffer` has no effect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymphoniaLoader;

impl SoundLoader for SymphoniaLoader {
    fn load(&self, path: &Path, options: &LoadOptions) -> Result<Box<dyn Sound>> {
        Ok(Box::new(load_pcm(path, options)?))
    }
}

/// Decode a file into interleaved 16-bit samples
pub fn load_pcm(path: &Path, options: &LoadOptions) -> Result<PcmSound> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SoundManError::AudioLoading(format!("Failed to probe audio format: {:?}", e)))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| SoundManError::AudioLoading("No default audio track found".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| SoundManError::AudioLoading("Sample rate not found".to_string()))?;

    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| SoundManError::AudioLoading("Channel count not found".to_string()))?
        .count() as u16;

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SoundManError::AudioLoading(format!("Failed to create decoder: {:?}", e)))?;

    let max_frames = options
        .max_duration
        .map(|d| (d.as_secs_f64() * sample_rate as f64) as usize)
        .unwrap_or(usize::MAX);

    let mut samples: Vec<i16> = Vec::new();
    let mut frames_decoded = 0;

    while frames_decoded < max_frames {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(Error::IoError(_)) => break, // end-of-file
            Err(e) => {
                return Err(SoundManError::AudioLoading(format!(
                    "Error reading packet: {:?}",
                    e
                )));
            }
        };

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(Error::IoError(_)) => break,
            Err(Error::DecodeError(e)) => {
                log::debug!("Skipping corrupt packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => {
                return Err(SoundManError::AudioLoading(format!(
                    "Error decoding packet: {:?}",
                    e
                )));
            }
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        let mut tmp = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        tmp.copy_interleaved_ref(decoded);

        let keep = frames.min(max_frames - frames_decoded);
        samples.extend_from_slice(&tmp.samples()[..keep * channels as usize]);
        frames_decoded += keep;
    }

    log::debug!(
        "Loaded {} ({} frames, {} Hz, {} channels)",
        path.display(),
        frames_decoded,
        sample_rate,
        channels
    );

    PcmSound::new(samples, channels, sample_rate)
}
