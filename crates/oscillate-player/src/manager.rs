//! Audio manager: owns the guild players and the shared resources

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use oscillate_core::ffmpeg::transcode_args;
use oscillate_core::{FfmpegArgs, GuildId, Metrics, MetricsSnapshot, StateStore, Track};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::TrackCache;
use crate::config::ManagerConfig;
use crate::error::PlayerResult;
use crate::events::PlayerEvent;
use crate::player::GuildPlayer;
use crate::source::{FfmpegSourceFactory, SourceFactory};
use crate::voice::VoiceConnector;

/// Bitrate used while load is normal
pub const HIGH_BITRATE: u32 = 256_000;
/// Bitrate used once more than half of the ffmpeg slots stream
pub const LOW_BITRATE: u32 = 128_000;

const EVENT_CAPACITY: usize = 256;

pub(crate) type PlayerMap = RwLock<HashMap<GuildId, Arc<GuildPlayer>>>;

/// Resources shared by the manager and every player
pub(crate) struct Shared {
    pub(crate) config: ManagerConfig,
    pub(crate) ffmpeg_slots: Arc<Semaphore>,
    bitrate: AtomicU32,
    active_streams: AtomicU64,
    pub(crate) metrics: Option<Arc<Metrics>>,
    events: broadcast::Sender<PlayerEvent>,
    store: RwLock<Option<Arc<dyn StateStore>>>,
    cache: Mutex<TrackCache>,
    pub(crate) sources: Arc<dyn SourceFactory>,
    pub(crate) connector: Arc<dyn VoiceConnector>,
}

impl Shared {
    pub(crate) fn emit(&self, event: PlayerEvent) {
        debug!(guild_id = event.guild_id(), event = event.name(), "Player event");
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn store(&self) -> Option<Arc<dyn StateStore>> {
        self.store.read().clone()
    }

    pub(crate) fn bitrate(&self) -> u32 {
        self.bitrate.load(Ordering::SeqCst)
    }

    pub(crate) fn adapt_bitrate(&self) {
        let threshold = (self.config.max_ffmpeg_procs / 2).max(1) as u64;
        let bitrate = if self.active_streams.load(Ordering::SeqCst) > threshold {
            LOW_BITRATE
        } else {
            HIGH_BITRATE
        };
        let previous = self.bitrate.swap(bitrate, Ordering::SeqCst);
        if previous != bitrate {
            info!(bitrate, "Adapted stream bitrate");
        }
    }

    pub(crate) fn stream_started(&self) {
        let active = self.active_streams.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(metrics) = &self.metrics {
            metrics.set_active_streams(active);
        }
    }

    pub(crate) fn stream_finished(&self) {
        let previous = self
            .active_streams
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if let Some(metrics) = &self.metrics {
            metrics.set_active_streams(previous.saturating_sub(1));
        }
    }

    pub(crate) fn active_streams(&self) -> u64 {
        self.active_streams.load(Ordering::SeqCst)
    }

    pub(crate) fn record_error(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error(kind);
        }
    }

    pub(crate) fn cache_track(&self, track: &Track) {
        let hit = self.cache.lock().insert(track.clone());
        if let Some(metrics) = &self.metrics {
            if hit {
                metrics.cache_hit();
            } else {
                metrics.cache_miss();
            }
        }
    }
}

/// Manages guild players, ffmpeg concurrency, persistence and events.
///
/// ```no_run
/// use std::sync::Arc;
/// use oscillate_player::{AudioManager, ManagerConfig, NullVoiceConnector};
///
/// # async fn run() -> oscillate_player::PlayerResult<()> {
/// let manager = AudioManager::new(ManagerConfig::default(), Arc::new(NullVoiceConnector::new()))?;
/// let player = manager.player(1234);
/// player.ensure_voice(5678).await?;
/// # Ok(())
/// # }
/// ```
pub struct AudioManager {
    shared: Arc<Shared>,
    players: Arc<PlayerMap>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl AudioManager {
    /// Create a manager decoding with ffmpeg
    pub fn new(config: ManagerConfig, connector: Arc<dyn VoiceConnector>) -> PlayerResult<Self> {
        let sources = Arc::new(FfmpegSourceFactory::new(config.ffmpeg_path.clone()));
        Self::with_source_factory(config, connector, sources)
    }

    /// Create a manager with a custom PCM source factory
    pub fn with_source_factory(
        config: ManagerConfig,
        connector: Arc<dyn VoiceConnector>,
        sources: Arc<dyn SourceFactory>,
    ) -> PlayerResult<Self> {
        config.validate()?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let metrics = config.enable_metrics.then(|| Arc::new(Metrics::default()));
        let shared = Arc::new(Shared {
            ffmpeg_slots: Arc::new(Semaphore::new(config.max_ffmpeg_procs)),
            bitrate: AtomicU32::new(HIGH_BITRATE),
            active_streams: AtomicU64::new(0),
            metrics,
            events,
            store: RwLock::new(None),
            cache: Mutex::new(TrackCache::new(config.cache_size)),
            sources,
            connector,
            config,
        });

        Ok(Self {
            shared,
            players: Arc::new(RwLock::new(HashMap::new())),
            tasks: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get or create the player for a guild
    pub fn player(&self, guild_id: GuildId) -> Arc<GuildPlayer> {
        if let Some(player) = self.players.read().get(&guild_id) {
            return player.clone();
        }

        let mut players = self.players.write();
        let player = players
            .entry(guild_id)
            .or_insert_with(|| {
                GuildPlayer::new(guild_id, self.shared.clone(), Arc::downgrade(&self.players))
            })
            .clone();
        let count = players.len() as u64;
        drop(players);

        if let Some(metrics) = &self.shared.metrics {
            metrics.set_active_guilds(count);
        }
        player
    }

    /// Existing player for a guild
    pub fn get_player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        self.players.read().get(&guild_id).cloned()
    }

    /// Forget a guild's player without stopping it
    pub fn remove_player(&self, guild_id: GuildId) -> Option<Arc<GuildPlayer>> {
        remove_player(&self.players, &self.shared, guild_id)
    }

    /// Attach the store and spawn the autosave and idle loops.
    ///
    /// Calling `start` on a running manager does nothing.
    pub async fn start(&self, store: Arc<dyn StateStore>) -> PlayerResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = store.initialize().await {
            self.running.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        *self.shared.store.write() = Some(store);

        let autosave = self.spawn_autosave();
        let idle = self.spawn_idle_check();
        self.tasks.lock().extend([autosave, idle]);

        info!(
            max_ffmpeg_procs = self.shared.config.max_ffmpeg_procs,
            "AudioManager started"
        );
        Ok(())
    }

    fn spawn_autosave(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let players = self.players.clone();
        let period = shared.config.autosave_period();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                save_players(&shared, &players).await;
            }
        })
    }

    fn spawn_idle_check(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let players = self.players.clone();
        let period = shared.config.idle_check_period();
        let timeout = shared.config.idle_timeout();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let now = Instant::now();
                let idle: Vec<Arc<GuildPlayer>> = players
                    .read()
                    .values()
                    .filter(|p| p.is_idle(now, timeout))
                    .cloned()
                    .collect();

                for player in idle {
                    info!(guild_id = player.guild_id(), "Stopping idle player");
                    shared.emit(PlayerEvent::Idle {
                        guild_id: player.guild_id(),
                    });
                    player.stop().await;
                }
            }
        })
    }

    /// Save every player, abort the background loops and stop all players
    pub async fn shutdown(&self) {
        info!("Shutting down AudioManager");
        self.running.store(false, Ordering::SeqCst);

        self.save_all().await;

        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }

        let players: Vec<Arc<GuildPlayer>> = self.players.read().values().cloned().collect();
        for player in players {
            player.halt(false).await;
        }
        self.players.write().clear();
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_active_guilds(0);
        }

        info!("AudioManager shutdown complete");
    }

    pub async fn save_all(&self) {
        save_players(&self.shared, &self.players).await;
    }

    /// Persist one guild's player state. Failures are logged and emitted
    /// as error events.
    pub async fn save_guild(&self, guild_id: GuildId) {
        let Some(player) = self.get_player(guild_id) else {
            return;
        };
        save_player(&self.shared, &player).await;
    }

    /// Restore a guild's player from the store, creating the player when
    /// saved state exists.
    pub async fn load_guild(&self, guild_id: GuildId) {
        let Some(store) = self.shared.store() else {
            return;
        };

        let result = match store.load_queue_state(guild_id).await {
            Ok(Some(state)) => self.player(guild_id).deserialize_state(state).await,
            Ok(None) => return,
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(()) => info!(guild_id, "Loaded guild state"),
            Err(e) => {
                error!(guild_id, error = %e, "Failed to load guild state");
                self.shared.record_error(e.kind());
                self.shared.emit(PlayerEvent::Error {
                    guild_id,
                    operation: "load".to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    /// Input and output arguments for the current bitrate
    pub fn transcode_args(&self) -> FfmpegArgs {
        transcode_args(self.shared.bitrate())
    }

    pub fn bitrate(&self) -> u32 {
        self.shared.bitrate()
    }

    /// Drop to the low bitrate while many streams are active
    pub fn adapt_bitrate(&self) {
        self.shared.adapt_bitrate();
    }

    pub fn active_streams(&self) -> u64 {
        self.shared.active_streams()
    }

    /// Remember track metadata; counts a cache hit or miss
    pub fn cache_track(&self, track: &Track) {
        self.shared.cache_track(track);
    }

    pub fn cached_track(&self, key: &str) -> Option<Track> {
        self.shared.cache.lock().get(key).cloned()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn metrics(&self) -> Option<Arc<Metrics>> {
        self.shared.metrics.clone()
    }

    /// `None` when metrics are disabled
    pub fn metrics_snapshot(&self) -> Option<MetricsSnapshot> {
        self.shared.metrics.as_ref().map(|m| m.snapshot())
    }

    /// Guild IDs with a player, ascending
    pub fn active_guilds(&self) -> Vec<GuildId> {
        let mut guilds: Vec<GuildId> = self.players.read().keys().copied().collect();
        guilds.sort_unstable();
        guilds
    }

    pub fn total_tracks_queued(&self) -> usize {
        self.players.read().values().map(|p| p.queue_size()).sum()
    }
}

impl Drop for AudioManager {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().drain(..) {
            handle.abort();
        }
    }
}

pub(crate) fn remove_player(
    players: &PlayerMap,
    shared: &Shared,
    guild_id: GuildId,
) -> Option<Arc<GuildPlayer>> {
    let mut players = players.write();
    let removed = players.remove(&guild_id);
    let count = players.len() as u64;
    drop(players);

    if let Some(metrics) = &shared.metrics {
        metrics.set_active_guilds(count);
    }
    removed
}

async fn save_players(shared: &Shared, players: &PlayerMap) {
    if shared.store().is_none() {
        return;
    }
    let snapshot: Vec<Arc<GuildPlayer>> = players.read().values().cloned().collect();
    for player in snapshot {
        save_player(shared, &player).await;
    }
}

async fn save_player(shared: &Shared, player: &GuildPlayer) {
    let Some(store) = shared.store() else {
        return;
    };
    let guild_id = player.guild_id();

    let result = match serde_json::to_value(player.serialize_state()) {
        Ok(state) => store.save_queue_state(guild_id, &state).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    if let Some(metrics) = &shared.metrics {
        metrics.set_guild_queue_size(guild_id, player.queue_size());
    }

    if let Err(e) = result {
        warn!(guild_id, error = %e, "Failed to save guild state");
        shared.record_error("db");
        shared.emit(PlayerEvent::Error {
            guild_id,
            operation: "save".to_string(),
            error: e,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::mock::MockVoiceConnector;

    fn manager(config: ManagerConfig) -> AudioManager {
        AudioManager::new(config, Arc::new(MockVoiceConnector::new())).unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ManagerConfig {
            max_ffmpeg_procs: 0,
            ..Default::default()
        };
        assert!(AudioManager::new(config, Arc::new(MockVoiceConnector::new())).is_err());
    }

    #[tokio::test]
    async fn test_player_get_or_create() {
        let manager = manager(ManagerConfig::default());
        let a = manager.player(1);
        let b = manager.player(1);
        assert!(Arc::ptr_eq(&a, &b));

        manager.player(3);
        assert_eq!(manager.active_guilds(), vec![1, 3]);

        assert!(manager.remove_player(1).is_some());
        assert!(manager.get_player(1).is_none());
        assert_eq!(manager.active_guilds(), vec![3]);
    }

    #[tokio::test]
    async fn test_adapt_bitrate() {
        let manager = manager(ManagerConfig::default());
        assert_eq!(manager.bitrate(), HIGH_BITRATE);

        // Threshold is max(1, 4 / 2) = 2
        for _ in 0..3 {
            manager.shared.stream_started();
        }
        manager.adapt_bitrate();
        assert_eq!(manager.bitrate(), LOW_BITRATE);
        assert_eq!(manager.transcode_args().options, "-vn -b:a 128k -threads 1");

        manager.shared.stream_finished();
        manager.adapt_bitrate();
        assert_eq!(manager.bitrate(), HIGH_BITRATE);
    }

    #[tokio::test]
    async fn test_single_slot_threshold_is_one() {
        let manager = manager(ManagerConfig {
            max_ffmpeg_procs: 1,
            ..Default::default()
        });
        manager.shared.stream_started();
        manager.adapt_bitrate();
        assert_eq!(manager.bitrate(), HIGH_BITRATE);

        manager.shared.stream_started();
        manager.adapt_bitrate();
        assert_eq!(manager.bitrate(), LOW_BITRATE);
    }

    #[tokio::test]
    async fn test_stream_counter_never_underflows() {
        let manager = manager(ManagerConfig::default());
        manager.shared.stream_finished();
        assert_eq!(manager.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_cache_track_counts_hits() {
        let manager = manager(ManagerConfig::default());
        let track = Track::new("Song", "https://cdn.example/a").unwrap();
        manager.cache_track(&track);
        manager.cache_track(&track);

        let snapshot = manager.metrics_snapshot().unwrap();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert!(manager.cached_track("https://cdn.example/a").is_some());
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let manager = manager(ManagerConfig {
            enable_metrics: false,
            ..Default::default()
        });
        assert!(manager.metrics().is_none());
        assert!(manager.metrics_snapshot().is_none());
    }
}
