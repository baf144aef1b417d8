//! Common error types for oscillate

use thiserror::Error;

/// Result type for oscillate operations
pub type OscillateResult<T> = Result<T, OscillateError>;

/// Errors raised by the audio engine
#[derive(Debug, Error)]
pub enum OscillateError {
    /// Playback failed
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid filter parameters or unknown filter
    #[error("Filter error: {0}")]
    Filter(String),

    /// Queue is full or an index is out of range
    #[error("Queue error: {0}")]
    Queue(String),

    /// Persistence failure
    #[error("Database error: {0}")]
    Db(String),

    /// ffmpeg missing or failed to spawn
    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    /// Opus library missing
    #[error("Opus error: {0}")]
    Opus(String),

    /// Voice connect/move failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid track data
    #[error("Track error: {0}")]
    Track(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),
}

impl OscillateError {
    /// Whether this error belongs to the audio family (playback, ffmpeg, opus, voice)
    pub fn is_audio_error(&self) -> bool {
        matches!(
            self,
            OscillateError::Audio(_)
                | OscillateError::Ffmpeg(_)
                | OscillateError::Opus(_)
                | OscillateError::Connection(_)
        )
    }

    /// Short label used as the error type in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            OscillateError::Audio(_) => "audio",
            OscillateError::Filter(_) => "filter",
            OscillateError::Queue(_) => "queue",
            OscillateError::Db(_) => "db",
            OscillateError::Ffmpeg(_) => "ffmpeg",
            OscillateError::Opus(_) => "opus",
            OscillateError::Connection(_) => "connection",
            OscillateError::Track(_) => "track",
            OscillateError::Configuration(_) => "configuration",
            OscillateError::ResourceLimit(_) => "resource_limit",
        }
    }
}

impl From<rusqlite::Error> for OscillateError {
    fn from(err: rusqlite::Error) -> Self {
        OscillateError::Db(err.to_string())
    }
}

impl From<serde_json::Error> for OscillateError {
    fn from(err: serde_json::Error) -> Self {
        OscillateError::Db(format!("Serialization error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_family() {
        assert!(OscillateError::Ffmpeg("missing".into()).is_audio_error());
        assert!(OscillateError::Connection("refused".into()).is_audio_error());
        assert!(!OscillateError::Queue("full".into()).is_audio_error());
    }

    #[test]
    fn test_display_includes_message() {
        let err = OscillateError::Queue("Queue is full (max 3 tracks)".into());
        assert_eq!(err.to_string(), "Queue error: Queue is full (max 3 tracks)");
        assert_eq!(err.kind(), "queue");
    }
}
