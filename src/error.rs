//! Error types for soundman

use crate::sound::SoundId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoundManError {
    #[error("No usable sound driver: {0}")]
    NoDriver(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audio loading error: {0}")]
    AudioLoading(String),

    #[error("Sound {0} is not registered")]
    UnknownSound(SoundId),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, SoundManError>;
