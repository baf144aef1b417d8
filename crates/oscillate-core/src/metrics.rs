//! Engine counters, mirrored to the `metrics` facade
//!
//! [`Metrics`] keeps its own totals so a snapshot can be served without an
//! exporter. When exporting is enabled every update is also forwarded to
//! whatever recorder is installed (Prometheus in the daemon), using
//! `oscillate_` prefixed names.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::GuildId;

/// Track duration histogram buckets (seconds)
pub const TRACK_DURATION_BUCKETS: [f64; 8] = [30.0, 60.0, 120.0, 180.0, 300.0, 600.0, 1200.0, 3600.0];
/// Operation duration histogram buckets (seconds)
pub const OPERATION_DURATION_BUCKETS: [f64; 8] = [0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

pub const TRACK_DURATION_METRIC: &str = "oscillate_track_duration_seconds";
pub const OPERATION_DURATION_METRIC: &str = "oscillate_operation_duration_seconds";

#[derive(Debug)]
struct MetricsState {
    start: Instant,
    ffmpeg_spawned: u64,
    streams_active: u64,
    total_played_seconds: u64,
    per_guild_played: HashMap<GuildId, u64>,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
    errors_by_type: HashMap<String, u64>,
    tracks_played: u64,
    commands_executed: u64,
    active_guilds: u64,
    /// Last duration per operation, in seconds
    operation_times: HashMap<String, f64>,
}

impl MetricsState {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            ffmpeg_spawned: 0,
            streams_active: 0,
            total_played_seconds: 0,
            per_guild_played: HashMap::new(),
            cache_hits: 0,
            cache_misses: 0,
            errors: 0,
            errors_by_type: HashMap::new(),
            tracks_played: 0,
            commands_executed: 0,
            active_guilds: 0,
            operation_times: HashMap::new(),
        }
    }
}

/// Playtime of one guild
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuildPlaytime {
    pub guild_id: GuildId,
    pub seconds: u64,
}

/// Serialisable view of all counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime: f64,
    pub ffmpeg_spawned: u64,
    pub streams_active: u64,
    pub total_played_seconds: u64,
    pub tracks_played: u64,
    pub commands_executed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub avg_track_duration: f64,
    pub errors: u64,
    pub errors_by_type: BTreeMap<String, u64>,
    pub active_guilds: u64,
    pub per_guild_played: BTreeMap<GuildId, u64>,
    pub top_guilds: Vec<GuildPlaytime>,
    pub operation_times: BTreeMap<String, f64>,
}

pub struct Metrics {
    export: bool,
    state: Mutex<MetricsState>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Metrics {
    /// `export` controls forwarding to the installed recorder
    pub fn new(export: bool) -> Self {
        Self {
            export,
            state: Mutex::new(MetricsState::new()),
        }
    }

    pub fn is_exporting(&self) -> bool {
        self.export
    }

    /// Seconds since creation or the last [`Metrics::reset_all`]
    pub fn uptime(&self) -> f64 {
        let uptime = self.state.lock().start.elapsed().as_secs_f64();
        if self.export {
            gauge!("oscillate_uptime_seconds").set(uptime);
        }
        uptime
    }

    /// A track finished after `seconds` of playback
    pub fn record_played(&self, guild_id: GuildId, seconds: u64) {
        {
            let mut state = self.state.lock();
            state.total_played_seconds += seconds;
            *state.per_guild_played.entry(guild_id).or_default() += seconds;
            state.tracks_played += 1;
        }
        if self.export {
            counter!("oscillate_tracks_played_total", "guild_id" => guild_id.to_string())
                .increment(1);
            histogram!(TRACK_DURATION_METRIC).record(seconds as f64);
        }
    }

    pub fn record_ffmpeg_spawn(&self) {
        self.state.lock().ffmpeg_spawned += 1;
        if self.export {
            counter!("oscillate_ffmpeg_processes_spawned_total").increment(1);
        }
    }

    pub fn set_active_streams(&self, count: u64) {
        self.state.lock().streams_active = count;
        if self.export {
            gauge!("oscillate_active_streams").set(count as f64);
        }
    }

    pub fn active_streams(&self) -> u64 {
        self.state.lock().streams_active
    }

    pub fn set_active_guilds(&self, count: u64) {
        self.state.lock().active_guilds = count;
        if self.export {
            gauge!("oscillate_active_guilds").set(count as f64);
        }
    }

    pub fn set_guild_queue_size(&self, guild_id: GuildId, size: usize) {
        if self.export {
            gauge!("oscillate_queue_size", "guild_id" => guild_id.to_string()).set(size as f64);
        }
    }

    pub fn cache_hit(&self) {
        self.state.lock().cache_hits += 1;
        if self.export {
            counter!("oscillate_cache_operations_total", "operation" => "hit").increment(1);
        }
    }

    pub fn cache_miss(&self) {
        self.state.lock().cache_misses += 1;
        if self.export {
            counter!("oscillate_cache_operations_total", "operation" => "miss").increment(1);
        }
    }

    pub fn record_error(&self, error_type: &str) {
        {
            let mut state = self.state.lock();
            state.errors += 1;
            *state
                .errors_by_type
                .entry(error_type.to_string())
                .or_default() += 1;
        }
        if self.export {
            counter!("oscillate_errors_total", "error_type" => error_type.to_string()).increment(1);
        }
    }

    pub fn record_command(&self, command: &str, guild_id: GuildId) {
        self.state.lock().commands_executed += 1;
        if self.export {
            counter!(
                "oscillate_commands_total",
                "command_name" => command.to_string(),
                "guild_id" => guild_id.to_string()
            )
            .increment(1);
        }
    }

    /// Store the latest duration of `operation`
    pub fn record_operation_time(&self, operation: &str, seconds: f64) {
        self.state
            .lock()
            .operation_times
            .insert(operation.to_string(), seconds);
        if self.export {
            histogram!(OPERATION_DURATION_METRIC, "operation" => operation.to_string())
                .record(seconds);
        }
    }

    /// Time a scope; the duration is recorded when the guard drops
    pub fn time_operation(&self, operation: impl Into<String>) -> OperationTimer<'_> {
        OperationTimer {
            metrics: self,
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Percentage of cache lookups that hit, 0-100
    pub fn cache_hit_rate(&self) -> f64 {
        let state = self.state.lock();
        hit_rate(state.cache_hits, state.cache_misses)
    }

    pub fn avg_track_duration(&self) -> f64 {
        let state = self.state.lock();
        average(state.total_played_seconds, state.tracks_played)
    }

    pub fn guild_playtime(&self, guild_id: GuildId) -> u64 {
        self.state
            .lock()
            .per_guild_played
            .get(&guild_id)
            .copied()
            .unwrap_or(0)
    }

    /// Guilds ordered by playtime, longest first
    pub fn top_guilds(&self, limit: usize) -> Vec<GuildPlaytime> {
        top_guilds(&self.state.lock().per_guild_played, limit)
    }

    pub fn reset_guild(&self, guild_id: GuildId) {
        self.state.lock().per_guild_played.remove(&guild_id);
        self.set_guild_queue_size(guild_id, 0);
    }

    pub fn reset_all(&self) {
        *self.state.lock() = MetricsState::new();
        info!("All metrics counters reset");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.uptime();
        let state = self.state.lock();
        MetricsSnapshot {
            uptime,
            ffmpeg_spawned: state.ffmpeg_spawned,
            streams_active: state.streams_active,
            total_played_seconds: state.total_played_seconds,
            tracks_played: state.tracks_played,
            commands_executed: state.commands_executed,
            cache_hits: state.cache_hits,
            cache_misses: state.cache_misses,
            cache_hit_rate: hit_rate(state.cache_hits, state.cache_misses),
            avg_track_duration: average(state.total_played_seconds, state.tracks_played),
            errors: state.errors,
            errors_by_type: state
                .errors_by_type
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            active_guilds: state.active_guilds,
            per_guild_played: state
                .per_guild_played
                .iter()
                .map(|(k, v)| (*k, *v))
                .collect(),
            top_guilds: top_guilds(&state.per_guild_played, 5),
            operation_times: state
                .operation_times
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64 * 100.0
}

fn average(total: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total as f64 / count as f64
}

fn top_guilds(per_guild: &HashMap<GuildId, u64>, limit: usize) -> Vec<GuildPlaytime> {
    let mut guilds: Vec<GuildPlaytime> = per_guild
        .iter()
        .map(|(&guild_id, &seconds)| GuildPlaytime { guild_id, seconds })
        .collect();
    guilds.sort_by(|a, b| b.seconds.cmp(&a.seconds).then(a.guild_id.cmp(&b.guild_id)));
    guilds.truncate(limit);
    guilds
}

/// Records the elapsed time of an operation on drop
pub struct OperationTimer<'a> {
    metrics: &'a Metrics,
    operation: String,
    start: Instant,
}

impl Drop for OperationTimer<'_> {
    fn drop(&mut self) {
        self.metrics
            .record_operation_time(&self.operation, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_played_and_averages() {
        let metrics = Metrics::new(false);
        metrics.record_played(1, 120);
        metrics.record_played(1, 60);
        metrics.record_played(2, 300);

        assert_eq!(metrics.guild_playtime(1), 180);
        assert_eq!(metrics.avg_track_duration(), 160.0);

        let top = metrics.top_guilds(1);
        assert_eq!(top, vec![GuildPlaytime { guild_id: 2, seconds: 300 }]);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = Metrics::new(false);
        assert_eq!(metrics.cache_hit_rate(), 0.0);
        metrics.cache_hit();
        metrics.cache_hit();
        metrics.cache_hit();
        metrics.cache_miss();
        assert_eq!(metrics.cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_errors_by_type() {
        let metrics = Metrics::new(false);
        metrics.record_error("ffmpeg");
        metrics.record_error("ffmpeg");
        metrics.record_error("queue");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors, 3);
        assert_eq!(snapshot.errors_by_type.get("ffmpeg"), Some(&2));
    }

    #[test]
    fn test_operation_timer_records_on_drop() {
        let metrics = Metrics::new(false);
        {
            let _timer = metrics.time_operation("save_all");
        }
        let snapshot = metrics.snapshot();
        assert!(snapshot.operation_times.contains_key("save_all"));
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new(false);
        metrics.record_played(9, 10);
        metrics.record_played(8, 10);
        metrics.record_ffmpeg_spawn();

        metrics.reset_guild(9);
        assert_eq!(metrics.guild_playtime(9), 0);
        assert_eq!(metrics.guild_playtime(8), 10);

        metrics.reset_all();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ffmpeg_spawned, 0);
        assert_eq!(snapshot.tracks_played, 0);
        assert!(snapshot.per_guild_played.is_empty());
    }

    #[test]
    fn test_exporting_without_recorder_is_harmless() {
        let metrics = Metrics::new(true);
        metrics.record_played(1, 30);
        metrics.cache_miss();
        metrics.set_guild_queue_size(1, 4);
        assert_eq!(metrics.snapshot().tracks_played, 1);
    }
}
