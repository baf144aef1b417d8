//! SQLite backed store

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tracing::{debug, info};

use super::{
    sql_timestamp, ActiveUser, GuildExport, GuildStats, HistoryEntry, StateStore, TrackPlays,
};
use crate::error::{OscillateError, OscillateResult};
use crate::track::Track;
use crate::GuildId;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_states (
    guild_id INTEGER PRIMARY KEY,
    state_data TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS track_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    guild_id INTEGER NOT NULL,
    track_data TEXT NOT NULL,
    played_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    requester_id INTEGER,
    duration INTEGER
);

CREATE TABLE IF NOT EXISTS guild_stats (
    guild_id INTEGER PRIMARY KEY,
    total_tracks_played INTEGER DEFAULT 0,
    total_playtime_seconds INTEGER DEFAULT 0,
    last_activity TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    most_played_track TEXT,
    most_active_user INTEGER
);

CREATE INDEX IF NOT EXISTS idx_track_history_guild
    ON track_history(guild_id, played_at DESC);

CREATE INDEX IF NOT EXISTS idx_track_history_requester
    ON track_history(guild_id, requester_id);
";

const TOP_TRACKS_SQL: &str = "
SELECT track_data, COUNT(*) AS play_count
FROM track_history
WHERE guild_id = ?1
GROUP BY JSON_EXTRACT(track_data, '$.audio_url')
ORDER BY play_count DESC, MAX(id) DESC
LIMIT ?2";

const HISTORY_SQL: &str = "
SELECT track_data, played_at, requester_id, duration
FROM track_history
WHERE guild_id = ?1
ORDER BY played_at DESC, id DESC
LIMIT ?2";

/// Store backed by a single SQLite file.
///
/// The connection opens on first use. Queries run on the blocking pool.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> OscillateResult<T>
    where
        F: FnOnce(&mut Connection) -> OscillateResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            if guard.is_none() {
                *guard = Some(open(&path)?);
            }
            match guard.as_mut() {
                Some(conn) => f(conn),
                None => Err(OscillateError::Db("Database connection unavailable".to_string())),
            }
        })
        .await
        .map_err(|e| OscillateError::Db(format!("Database task failed: {}", e)))?
    }

    /// Delete history older than `days`; returns the number of rows removed
    pub async fn cleanup_old_history(&self, days: u32) -> OscillateResult<usize> {
        let deleted = self
            .with_conn(move |conn| {
                let modifier = format!("-{} days", days);
                Ok(conn.execute(
                    "DELETE FROM track_history WHERE played_at < datetime('now', ?1)",
                    params![modifier],
                )?)
            })
            .await
            .map_err(|e| OscillateError::Db(format!("Failed to cleanup old history: {}", e)))?;

        if deleted > 0 {
            info!(deleted, days, "Cleaned up old track history records");
        }
        Ok(deleted)
    }

    /// Everything stored for one guild
    pub async fn export_guild(&self, guild_id: GuildId) -> OscillateResult<GuildExport> {
        let queue_state = self.load_queue_state(guild_id).await?;
        let track_history = self
            .with_conn(move |conn| read_history(conn, guild_id, -1))
            .await
            .map_err(|e| {
                OscillateError::Db(format!("Failed to export data for guild {}: {}", guild_id, e))
            })?;
        let statistics = self.guild_stats(guild_id).await?;

        Ok(GuildExport {
            guild_id,
            export_timestamp: chrono::Utc::now().to_rfc3339(),
            queue_state,
            track_history,
            statistics: Some(statistics),
        })
    }

    /// Load an export. History rows are appended and the guild statistics
    /// are rebuilt from the resulting history.
    pub async fn import_guild(&self, export: GuildExport) -> OscillateResult<usize> {
        let guild_id = export.guild_id;
        if let Some(state) = &export.queue_state {
            self.save_queue_state(guild_id, state).await?;
        }

        let imported = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                for entry in &export.track_history {
                    let data = serde_json::to_string(&entry.track)?;
                    tx.execute(
                        "INSERT INTO track_history (guild_id, track_data, played_at, requester_id, duration)
                         VALUES (?1, ?2, COALESCE(?3, CURRENT_TIMESTAMP), ?4, ?5)",
                        params![
                            guild_id as i64,
                            data,
                            entry.played_at,
                            entry.requester_id.map(|id| id as i64),
                            entry.duration.map(|d| d as i64)
                        ],
                    )?;
                }
                rebuild_stats(&tx, guild_id)?;
                tx.commit()?;
                Ok(export.track_history.len())
            })
            .await
            .map_err(|e| OscillateError::Db(format!("Failed to import guild data: {}", e)))?;

        info!(guild_id, imported, "Imported guild data");
        Ok(imported)
    }
}

fn open(path: &Path) -> OscillateResult<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            OscillateError::Db(format!("Failed to initialize database: {}", e))
        })?;
    }
    let conn = Connection::open(path)
        .map_err(|e| OscillateError::Db(format!("Failed to initialize database: {}", e)))?;
    conn.execute_batch(SCHEMA)
        .map_err(|e| OscillateError::Db(format!("Failed to initialize database: {}", e)))?;
    info!(path = %path.display(), "SQLite database initialized");
    Ok(conn)
}

fn parse_track(data: &str) -> OscillateResult<Track> {
    Ok(serde_json::from_str(data)?)
}

/// `limit` of -1 returns every row
fn read_history(conn: &Connection, guild_id: GuildId, limit: i64) -> OscillateResult<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(HISTORY_SQL)?;
    let rows = stmt.query_map(params![guild_id as i64, limit], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<i64>>(2)?,
            row.get::<_, Option<i64>>(3)?,
        ))
    })?;

    let mut history = Vec::new();
    for row in rows {
        let (data, played_at, requester_id, duration) = row?;
        history.push(HistoryEntry {
            track: parse_track(&data)?,
            played_at,
            requester_id: requester_id.map(|id| id as u64),
            duration: duration.filter(|d| *d > 0).map(|d| d as u64),
        });
    }
    Ok(history)
}

fn read_top_tracks(conn: &Connection, guild_id: GuildId, limit: i64) -> OscillateResult<Vec<TrackPlays>> {
    let mut stmt = conn.prepare(TOP_TRACKS_SQL)?;
    let rows = stmt.query_map(params![guild_id as i64, limit], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut tracks = Vec::new();
    for row in rows {
        let (data, play_count) = row?;
        tracks.push(TrackPlays {
            track: parse_track(&data)?,
            play_count: play_count as u64,
        });
    }
    Ok(tracks)
}

fn rebuild_stats(conn: &Connection, guild_id: GuildId) -> OscillateResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO guild_stats (
            guild_id, total_tracks_played, total_playtime_seconds, last_activity
        )
        SELECT ?1, COUNT(*), COALESCE(SUM(duration), 0), MAX(played_at)
        FROM track_history WHERE guild_id = ?1
        HAVING COUNT(*) > 0",
        params![guild_id as i64],
    )?;
    Ok(())
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn initialize(&self) -> OscillateResult<()> {
        self.with_conn(|_| Ok(())).await
    }

    async fn save_queue_state(&self, guild_id: GuildId, state: &Value) -> OscillateResult<()> {
        let data = serde_json::to_string(state)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO queue_states (guild_id, state_data, updated_at)
                 VALUES (?1, ?2, CURRENT_TIMESTAMP)",
                params![guild_id as i64, data],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| {
            OscillateError::Db(format!("Failed to save queue state for guild {}: {}", guild_id, e))
        })?;
        debug!(guild_id, "Saved queue state");
        Ok(())
    }

    async fn load_queue_state(&self, guild_id: GuildId) -> OscillateResult<Option<Value>> {
        self.with_conn(move |conn| {
            let data: Option<String> = conn
                .query_row(
                    "SELECT state_data FROM queue_states WHERE guild_id = ?1",
                    params![guild_id as i64],
                    |row| row.get(0),
                )
                .optional()?;
            match data {
                Some(data) => Ok(Some(serde_json::from_str(&data)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| {
            OscillateError::Db(format!("Failed to load queue state for guild {}: {}", guild_id, e))
        })
    }

    async fn clear_queue_state(&self, guild_id: GuildId) -> OscillateResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM queue_states WHERE guild_id = ?1",
                params![guild_id as i64],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| {
            OscillateError::Db(format!("Failed to clear queue state for guild {}: {}", guild_id, e))
        })?;
        debug!(guild_id, "Cleared queue state");
        Ok(())
    }

    async fn save_track_history(&self, guild_id: GuildId, track: &Track) -> OscillateResult<()> {
        let data = serde_json::to_string(track)?;
        let requester_id = track.requester_id().map(|id| id as i64);
        let duration = track.duration.map(|d| d as i64);

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO track_history (guild_id, track_data, requester_id, duration)
                 VALUES (?1, ?2, ?3, ?4)",
                params![guild_id as i64, data, requester_id, duration],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO guild_stats (
                    guild_id, total_tracks_played, total_playtime_seconds, last_activity
                ) VALUES (
                    ?1,
                    COALESCE((SELECT total_tracks_played FROM guild_stats WHERE guild_id = ?1), 0) + 1,
                    COALESCE((SELECT total_playtime_seconds FROM guild_stats WHERE guild_id = ?1), 0) + ?2,
                    CURRENT_TIMESTAMP
                )",
                params![guild_id as i64, duration.unwrap_or(0)],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
        .map_err(|e| {
            OscillateError::Db(format!(
                "Failed to save track history for guild {}: {}",
                guild_id, e
            ))
        })?;
        debug!(guild_id, "Saved track history");
        Ok(())
    }

    async fn track_history(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<HistoryEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| read_history(conn, guild_id, limit))
            .await
            .map_err(|e| {
                OscillateError::Db(format!(
                    "Failed to get track history for guild {}: {}",
                    guild_id, e
                ))
            })
    }

    async fn guild_stats(&self, guild_id: GuildId) -> OscillateResult<GuildStats> {
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT total_tracks_played, total_playtime_seconds, last_activity
                     FROM guild_stats WHERE guild_id = ?1",
                    params![guild_id as i64],
                    |row| {
                        Ok((
                            row.get::<_, Option<i64>>(0)?,
                            row.get::<_, Option<i64>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    },
                )
                .optional()?;

            let Some((tracks, playtime, last_activity)) = row else {
                return Ok(GuildStats::empty(guild_id));
            };

            let most_played_track = read_top_tracks(conn, guild_id, 1)?.into_iter().next();
            let most_active_user = conn
                .query_row(
                    "SELECT requester_id, COUNT(*) AS request_count
                     FROM track_history
                     WHERE guild_id = ?1 AND requester_id IS NOT NULL
                     GROUP BY requester_id
                     ORDER BY request_count DESC
                     LIMIT 1",
                    params![guild_id as i64],
                    |row| {
                        Ok(ActiveUser {
                            user_id: row.get::<_, i64>(0)? as u64,
                            request_count: row.get::<_, i64>(1)? as u64,
                        })
                    },
                )
                .optional()?;

            Ok(GuildStats {
                guild_id,
                total_tracks_played: tracks.unwrap_or(0).max(0) as u64,
                total_playtime_seconds: playtime.unwrap_or(0).max(0) as u64,
                last_activity,
                most_played_track,
                most_active_user,
            })
        })
        .await
        .map_err(|e| {
            OscillateError::Db(format!("Failed to get guild stats for guild {}: {}", guild_id, e))
        })
    }

    async fn top_tracks(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<TrackPlays>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| read_top_tracks(conn, guild_id, limit))
            .await
    }

    async fn close(&self) -> OscillateResult<()> {
        let conn = Arc::clone(&self.conn);
        let closed = tokio::task::spawn_blocking(move || conn.lock().take())
            .await
            .map_err(|e| OscillateError::Db(format!("Database task failed: {}", e)))?;
        if let Some(conn) = closed {
            conn.close().map_err(|(_, e)| OscillateError::from(e))?;
            info!(path = %self.path.display(), "SQLite database connection closed");
        }
        Ok(())
    }
}
