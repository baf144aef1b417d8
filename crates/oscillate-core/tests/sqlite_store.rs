//! Integration tests for the SQLite store
//!
//! These run against a real database file in a temporary directory.

use oscillate_core::store::{GuildExport, StateStore};
use oscillate_core::{Requester, SqliteStore, Track};
use pretty_assertions::assert_eq;
use serde_json::json;

// =============================================================================
// Helpers
// =============================================================================

fn track(title: &str, url: &str, duration: u64, requester: Option<u64>) -> Track {
    let track = Track::new(title, url).unwrap().with_duration(duration);
    match requester {
        Some(id) => track.with_requester(Requester::new(id, format!("user-{}", id))),
        None => track,
    }
}

async fn seeded_store(dir: &tempfile::TempDir) -> SqliteStore {
    let store = SqliteStore::new(dir.path().join("oscillate.db"));
    store.initialize().await.unwrap();

    store
        .save_track_history(42, &track("Intro", "https://cdn.example/intro", 90, Some(7)))
        .await
        .unwrap();
    store
        .save_track_history(42, &track("Theme", "https://cdn.example/theme", 200, Some(7)))
        .await
        .unwrap();
    store
        .save_track_history(42, &track("Intro", "https://cdn.example/intro", 90, Some(8)))
        .await
        .unwrap();
    store
        .save_queue_state(42, &json!({"volume": 0.8, "queue": {"tracks": []}}))
        .await
        .unwrap();
    store
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_history_and_stats() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir).await;

    let history = store.track_history(42, 2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].track.title, "Intro");
    assert_eq!(history[0].requester_id, Some(8));
    assert_eq!(history[1].track.title, "Theme");

    let stats = store.guild_stats(42).await.unwrap();
    assert_eq!(stats.total_tracks_played, 3);
    assert_eq!(stats.total_playtime_seconds, 380);
    assert_eq!(stats.most_active_user.unwrap().user_id, 7);

    let top = store.top_tracks(42, 10).await.unwrap();
    let summary: Vec<_> = top
        .iter()
        .map(|t| (t.track.title.as_str(), t.play_count))
        .collect();
    assert_eq!(summary, vec![("Intro", 2), ("Theme", 1)]);
}

#[tokio::test]
async fn test_export_import_between_databases() {
    let dir = tempfile::tempdir().unwrap();
    let source = seeded_store(&dir).await;

    let export = source.export_guild(42).await.unwrap();
    assert_eq!(export.guild_id, 42);
    assert_eq!(export.track_history.len(), 3);
    assert_eq!(export.statistics.as_ref().unwrap().total_tracks_played, 3);

    // Exports travel as JSON files
    let file = dir.path().join("guild_42_export.json");
    std::fs::write(&file, serde_json::to_vec_pretty(&export).unwrap()).unwrap();
    let loaded: GuildExport = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();

    let target = SqliteStore::new(dir.path().join("restored.db"));
    let imported = target.import_guild(loaded).await.unwrap();
    assert_eq!(imported, 3);

    let state = target.load_queue_state(42).await.unwrap().unwrap();
    assert_eq!(state["volume"], json!(0.8));

    let stats = target.guild_stats(42).await.unwrap();
    assert_eq!(stats.total_tracks_played, 3);
    assert_eq!(stats.total_playtime_seconds, 380);
    assert_eq!(
        stats.most_played_track.unwrap().track.audio_url,
        "https://cdn.example/intro"
    );
}

#[tokio::test]
async fn test_cleanup_old_history() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir).await;

    let mut export = store.export_guild(42).await.unwrap();
    for entry in &mut export.track_history {
        entry.played_at = Some("2001-01-01 00:00:00".to_string());
    }
    export.guild_id = 43;
    store.import_guild(export).await.unwrap();

    let deleted = store.cleanup_old_history(30).await.unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(store.track_history(42, 50).await.unwrap().len(), 3);
    assert!(store.track_history(43, 50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_queue_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = seeded_store(&dir).await;

    store.clear_queue_state(42).await.unwrap();
    assert!(store.load_queue_state(42).await.unwrap().is_none());
    store.close().await.unwrap();
}
