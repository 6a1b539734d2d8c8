//! Configuration for the sound manager and its drivers

use crate::error::{Result, SoundManError};
use crate::report::DEFAULT_REPORT_CAPACITY;
use std::time::Duration;

/// Configuration descriptor for a [`SoundManager`](crate::SoundManager)
#[derive(Debug, Clone)]
pub struct SoundManagerDesc {
    /// Output sample rate requested from the driver
    pub sample_rate: u32,
    /// Number of output channels (typically 2 for stereo)
    pub channels: u16,
    /// Frames rendered per mixing slice. Each mixing sound commits one
    /// position report per slice.
    pub block_size: usize,
    /// Depth of the output ring buffer between the render thread and the device
    pub buffer_duration: Duration,
    /// Maximum number of sounds the driver mixes at once
    pub max_voices: usize,
    /// Capacity of the position report channel
    pub report_capacity: usize,
    /// Initial global mix volume (0.0 to 1.0)
    pub mix_volume: f32,
}

impl Default for SoundManagerDesc {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            block_size: 512,
            buffer_duration: Duration::from_millis(50),
            max_voices: 64,
            report_capacity: DEFAULT_REPORT_CAPACITY,
            mix_volume: 1.0,
        }
    }
}

impl SoundManagerDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    pub fn buffer_duration(mut self, duration: Duration) -> Self {
        self.buffer_duration = duration;
        self
    }

    pub fn max_voices(mut self, max: usize) -> Self {
        self.max_voices = max;
        self
    }

    pub fn report_capacity(mut self, capacity: usize) -> Self {
        self.report_capacity = capacity;
        self
    }

    pub fn mix_volume(mut self, volume: f32) -> Self {
        self.mix_volume = volume;
        self
    }

    /// Number of interleaved samples in one render slice
    pub fn block_samples(&self) -> usize {
        self.block_size * self.channels as usize
    }

    /// Reject configurations no driver can run with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(SoundManError::Configuration(
                "sample rate must be non-zero".into(),
            ));
        }
        if self.channels == 0 {
            return Err(SoundManError::Configuration(
                "channel count must be non-zero".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(SoundManError::Configuration(
                "block size must be non-zero".into(),
            ));
        }
        if self.max_voices == 0 || self.report_capacity == 0 {
            return Err(SoundManError::Configuration(
                "voice and report capacities must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_desc_is_valid() {
        let desc = SoundManagerDesc::default();
        assert!(desc.validate().is_ok());
        assert_eq!(desc.report_capacity, 1024);
        assert_eq!(desc.block_samples(), 1024);
    }

    #[test]
    fn test_invalid_desc() {
        assert!(SoundManagerDesc::new().sample_rate(0).validate().is_err());
        assert!(SoundManagerDesc::new().channels(0).validate().is_err());
        assert!(SoundManagerDesc::new().block_size(0).validate().is_err());
        assert!(SoundManagerDesc::new().report_capacity(0).validate().is_err());
    }
}
