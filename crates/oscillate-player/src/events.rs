//! Player lifecycle events

use oscillate_core::{GuildId, Track};
use serde::Serialize;

/// Events broadcast by the audio manager.
///
/// Subscribers receive them through [`crate::AudioManager::subscribe`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    TrackStart {
        guild_id: GuildId,
        track: Track,
    },
    TrackEnd {
        guild_id: GuildId,
        track: Option<Track>,
        error: Option<String>,
    },
    /// The player sat idle past the timeout and is being stopped
    Idle { guild_id: GuildId },
    Pause { guild_id: GuildId },
    Resume { guild_id: GuildId },
    Stop { guild_id: GuildId },
    Skip { guild_id: GuildId },
    Error {
        guild_id: GuildId,
        operation: String,
        error: String,
    },
}

impl PlayerEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            PlayerEvent::TrackStart { guild_id, .. }
            | PlayerEvent::TrackEnd { guild_id, .. }
            | PlayerEvent::Idle { guild_id }
            | PlayerEvent::Pause { guild_id }
            | PlayerEvent::Resume { guild_id }
            | PlayerEvent::Stop { guild_id }
            | PlayerEvent::Skip { guild_id }
            | PlayerEvent::Error { guild_id, .. } => *guild_id,
        }
    }

    /// Event name
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::TrackStart { .. } => "track_start",
            PlayerEvent::TrackEnd { .. } => "track_end",
            PlayerEvent::Idle { .. } => "idle",
            PlayerEvent::Pause { .. } => "pause",
            PlayerEvent::Resume { .. } => "resume",
            PlayerEvent::Stop { .. } => "stop",
            PlayerEvent::Skip { .. } => "skip",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let event = PlayerEvent::Skip { guild_id: 9 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "skip");
        assert_eq!(value["guild_id"], 9);
        assert_eq!(event.name(), "skip");
    }
}
