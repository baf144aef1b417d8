//! Error types for the player runtime

use oscillate_core::OscillateError;
use thiserror::Error;

/// Result type for player operations
pub type PlayerResult<T> = Result<T, PlayerError>;

/// Errors raised by players and the audio manager
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Error from the core engine (queue, filters, ffmpeg, store)
    #[error(transparent)]
    Core(#[from] OscillateError),

    /// No voice connection for the guild
    #[error("Not connected to a voice channel")]
    NotConnected,

    /// Voice connect, move or send failed
    #[error("Voice connection error: {0}")]
    Voice(String),

    /// PCM source failed to open or read
    #[error("Audio source error: {0}")]
    Source(String),

    /// Invalid manager configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Persisted player state could not be applied
    #[error("Invalid player state: {0}")]
    State(String),

    /// The player was stopped and no longer accepts work
    #[error("Player has been stopped")]
    Stopped,

    /// The manager is shutting down
    #[error("Audio manager is shut down")]
    Shutdown,
}

impl PlayerError {
    /// Short label used as the error type in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerError::Core(e) => e.kind(),
            PlayerError::NotConnected | PlayerError::Voice(_) => "connection",
            PlayerError::Source(_) => "audio",
            PlayerError::Config(_) => "configuration",
            PlayerError::State(_) => "state",
            PlayerError::Stopped | PlayerError::Shutdown => "shutdown",
        }
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(err: serde_json::Error) -> Self {
        PlayerError::State(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_passes_through_core() {
        let err: PlayerError = OscillateError::Ffmpeg("missing".into()).into();
        assert_eq!(err.kind(), "ffmpeg");
        assert_eq!(err.to_string(), "FFmpeg error: missing");
        assert_eq!(PlayerError::NotConnected.kind(), "connection");
    }
}
