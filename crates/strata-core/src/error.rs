//! Engine-wide error kinds (spec §7).

use thiserror::Error;

/// Error kinds surfaced by the engine façade and its subsystems.
///
/// Realtime-path failures (decoder underrun, ring buffer drain) never
/// construct one of these synchronously — they degrade to silence per
/// spec §7. This type is for control-plane operations and for the
/// completion callbacks of recording/extraction jobs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("track not found: {0}")]
    TrackNotFound(String),

    #[error("track limit reached ({0} loaded)")]
    TrackLimitReached(usize),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to open decoder: {0}")]
    DecoderOpenFailed(String),

    #[error("seek failed: {0}")]
    SeekFailed(String),

    #[error("audio stream error: {0}")]
    StreamError(String),

    #[error("recording failed: {0}")]
    RecordingFailed(String),

    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;
