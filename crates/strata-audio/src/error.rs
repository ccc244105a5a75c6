//! Device/stream error kinds, mirroring `rf_audio::error::AudioError`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("no audio device available")]
    NoDevice,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("unsupported sample rate: {0}")]
    UnsupportedSampleRate(u32),
}

pub type AudioResult<T> = Result<T, AudioError>;
