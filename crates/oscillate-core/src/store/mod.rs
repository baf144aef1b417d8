//! Persistence of player state, play history and guild statistics

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OscillateResult;
use crate::track::Track;
use crate::GuildId;

/// Default number of history rows returned
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// One played track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub track: Track,
    /// `YYYY-MM-DD HH:MM:SS` in UTC
    pub played_at: Option<String>,
    pub requester_id: Option<u64>,
    /// Seconds
    pub duration: Option<u64>,
}

/// A track with the number of times it was played
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackPlays {
    pub track: Track,
    pub play_count: u64,
}

/// The requester with the most history entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUser {
    pub user_id: u64,
    pub request_count: u64,
}

/// Aggregated per-guild statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildStats {
    pub guild_id: GuildId,
    pub total_tracks_played: u64,
    pub total_playtime_seconds: u64,
    pub last_activity: Option<String>,
    pub most_played_track: Option<TrackPlays>,
    pub most_active_user: Option<ActiveUser>,
}

impl GuildStats {
    /// Statistics of a guild that never played anything
    pub fn empty(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            total_tracks_played: 0,
            total_playtime_seconds: 0,
            last_activity: None,
            most_played_track: None,
            most_active_user: None,
        }
    }
}

/// Everything stored for one guild, as written by `export-data`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildExport {
    pub guild_id: GuildId,
    pub export_timestamp: String,
    #[serde(default)]
    pub queue_state: Option<Value>,
    #[serde(default)]
    pub track_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub statistics: Option<GuildStats>,
}

/// Storage backend for player state and history.
///
/// Player state is opaque JSON to the store; its shape is owned by the
/// player runtime.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Prepare the backend. Other methods initialise lazily as well.
    async fn initialize(&self) -> OscillateResult<()>;

    async fn save_queue_state(&self, guild_id: GuildId, state: &Value) -> OscillateResult<()>;

    async fn load_queue_state(&self, guild_id: GuildId) -> OscillateResult<Option<Value>>;

    async fn clear_queue_state(&self, guild_id: GuildId) -> OscillateResult<()>;

    /// Append a played track and update the guild statistics
    async fn save_track_history(&self, guild_id: GuildId, track: &Track) -> OscillateResult<()>;

    /// Most recent plays first
    async fn track_history(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<HistoryEntry>>;

    async fn guild_stats(&self, guild_id: GuildId) -> OscillateResult<GuildStats>;

    /// Tracks played most often, grouped by audio URL
    async fn top_tracks(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<TrackPlays>>;

    async fn close(&self) -> OscillateResult<()>;
}

pub(crate) fn sql_timestamp(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
