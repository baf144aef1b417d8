//! In-memory store for tests and development

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;

use super::{sql_timestamp, ActiveUser, GuildStats, HistoryEntry, StateStore, TrackPlays};
use crate::error::OscillateResult;
use crate::track::Track;
use crate::GuildId;

/// Maximum history entries kept per guild
pub const MAX_HISTORY: usize = 1000;

#[derive(Default)]
struct GuildTotals {
    tracks: u64,
    playtime: u64,
    last_activity: Option<String>,
}

#[derive(Default)]
struct MemoryState {
    queue_states: HashMap<GuildId, Value>,
    history: HashMap<GuildId, VecDeque<HistoryEntry>>,
    totals: HashMap<GuildId, GuildTotals>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn top_tracks(history: Option<&VecDeque<HistoryEntry>>, limit: usize) -> Vec<TrackPlays> {
    let Some(history) = history else {
        return Vec::new();
    };

    // (plays, most recent position, track)
    let mut counts: HashMap<&str, (u64, usize, &Track)> = HashMap::new();
    for (position, entry) in history.iter().enumerate() {
        let slot = counts
            .entry(entry.track.audio_url.as_str())
            .or_insert((0, position, &entry.track));
        slot.0 += 1;
        slot.1 = position;
    }

    let mut ranked: Vec<_> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(play_count, _, track)| TrackPlays {
            track: track.clone(),
            play_count,
        })
        .collect()
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn initialize(&self) -> OscillateResult<()> {
        info!("Memory store initialized");
        Ok(())
    }

    async fn save_queue_state(&self, guild_id: GuildId, state: &Value) -> OscillateResult<()> {
        self.state.lock().queue_states.insert(guild_id, state.clone());
        Ok(())
    }

    async fn load_queue_state(&self, guild_id: GuildId) -> OscillateResult<Option<Value>> {
        Ok(self.state.lock().queue_states.get(&guild_id).cloned())
    }

    async fn clear_queue_state(&self, guild_id: GuildId) -> OscillateResult<()> {
        self.state.lock().queue_states.remove(&guild_id);
        Ok(())
    }

    async fn save_track_history(&self, guild_id: GuildId, track: &Track) -> OscillateResult<()> {
        let played_at = sql_timestamp(chrono::Utc::now());
        let mut state = self.state.lock();

        let history = state.history.entry(guild_id).or_default();
        history.push_back(HistoryEntry {
            track: track.clone(),
            played_at: Some(played_at.clone()),
            requester_id: track.requester_id(),
            duration: track.duration,
        });
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }

        let totals = state.totals.entry(guild_id).or_default();
        totals.tracks += 1;
        totals.playtime += track.duration.unwrap_or(0);
        totals.last_activity = Some(played_at);
        Ok(())
    }

    async fn track_history(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<HistoryEntry>> {
        let state = self.state.lock();
        Ok(state
            .history
            .get(&guild_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn guild_stats(&self, guild_id: GuildId) -> OscillateResult<GuildStats> {
        let state = self.state.lock();
        let Some(totals) = state.totals.get(&guild_id) else {
            return Ok(GuildStats::empty(guild_id));
        };
        let history = state.history.get(&guild_id);

        let mut requests: HashMap<u64, u64> = HashMap::new();
        for entry in history.into_iter().flatten() {
            if let Some(id) = entry.requester_id {
                *requests.entry(id).or_default() += 1;
            }
        }
        let most_active_user = requests
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(user_id, request_count)| ActiveUser {
                user_id,
                request_count,
            });

        Ok(GuildStats {
            guild_id,
            total_tracks_played: totals.tracks,
            total_playtime_seconds: totals.playtime,
            last_activity: totals.last_activity.clone(),
            most_played_track: top_tracks(history, 1).into_iter().next(),
            most_active_user,
        })
    }

    async fn top_tracks(&self, guild_id: GuildId, limit: usize) -> OscillateResult<Vec<TrackPlays>> {
        let state = self.state.lock();
        Ok(top_tracks(state.history.get(&guild_id), limit))
    }

    async fn close(&self) -> OscillateResult<()> {
        *self.state.lock() = MemoryState::default();
        info!("Memory store cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::Requester;

    #[tokio::test]
    async fn test_history_newest_first_and_capped() {
        let store = MemoryStore::new();
        for n in 0..(MAX_HISTORY + 5) {
            let url = format!("https://cdn.example/{}", n);
            store
                .save_track_history(1, &Track::new("t", url).unwrap())
                .await
                .unwrap();
        }

        let history = store.track_history(1, 2).await.unwrap();
        assert_eq!(history[0].track.audio_url, format!("https://cdn.example/{}", MAX_HISTORY + 4));
        assert_eq!(store.track_history(1, usize::MAX).await.unwrap().len(), MAX_HISTORY);
        assert_eq!(
            store.guild_stats(1).await.unwrap().total_tracks_played,
            (MAX_HISTORY + 5) as u64
        );
    }

    #[tokio::test]
    async fn test_stats_from_history() {
        let store = MemoryStore::new();
        let alice = Requester::new(10, "alice");
        let bob = Requester::new(20, "bob");
        let a = Track::new("A", "a").unwrap().with_duration(30).with_requester(alice.clone());
        let b = Track::new("B", "b").unwrap().with_duration(60).with_requester(bob);

        store.save_track_history(3, &a).await.unwrap();
        store.save_track_history(3, &b).await.unwrap();
        store.save_track_history(3, &a).await.unwrap();

        let stats = store.guild_stats(3).await.unwrap();
        assert_eq!(stats.total_playtime_seconds, 120);
        assert_eq!(stats.most_played_track.unwrap().play_count, 2);
        assert_eq!(
            stats.most_active_user,
            Some(ActiveUser {
                user_id: 10,
                request_count: 2
            })
        );

        let top = store.top_tracks(3, 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[1].track.audio_url, "b");
    }

    #[tokio::test]
    async fn test_queue_state_roundtrip_and_close() {
        let store = MemoryStore::new();
        store.save_queue_state(1, &serde_json::json!({"volume": 1.0})).await.unwrap();
        assert!(store.load_queue_state(1).await.unwrap().is_some());

        store.clear_queue_state(1).await.unwrap();
        assert!(store.load_queue_state(1).await.unwrap().is_none());

        store.save_queue_state(2, &serde_json::json!({})).await.unwrap();
        store.close().await.unwrap();
        assert!(store.load_queue_state(2).await.unwrap().is_none());
    }
}
