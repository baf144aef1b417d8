//! Per-guild player
//!
//! A [`GuildPlayer`] owns one guild's queue, filter chain and voice
//! connection. Each track runs in its own playback task that pulls frames
//! from a [`PcmSource`] and pushes them to the voice connection. When the
//! task ends it reports to the player's driver task, which records the
//! finished track and starts the next one.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use oscillate_core::ffmpeg::{transcode_args, validate_args};
use oscillate_core::filters::ChainState;
use oscillate_core::queue::QueueStatistics;
use oscillate_core::{
    AudioQueue, ChannelId, FfmpegArgs, Filter, FilterChain, GuildId, LoopMode, QueueState, Track,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{PlayerError, PlayerResult};
use crate::events::PlayerEvent;
use crate::manager::{remove_player, PlayerMap, Shared};
use crate::source::{apply_gain, PcmSource, VolumeHandle};
use crate::voice::VoiceConnection;

const MAX_VOLUME: f64 = 2.0;
const STOP_FADE_LIMIT: f64 = 1.0;

/// Persisted player state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(default)]
    pub current: Option<Track>,
    #[serde(default)]
    pub queue: Option<QueueState>,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub crossfade: Option<f64>,
    #[serde(default)]
    pub filters: Option<ChainState>,
    /// Unix timestamp (seconds) of the save
    #[serde(default)]
    pub last_saved: f64,
}

fn default_volume() -> f64 {
    1.0
}

/// Point-in-time view of a player
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub guild_id: GuildId,
    pub playing: bool,
    pub paused: bool,
    pub queue_size: usize,
    pub current_track: Option<Track>,
    /// Seconds
    pub time_elapsed: f64,
    pub volume: f64,
    pub loop_mode: LoopMode,
    pub shuffle: bool,
    pub filters_active: usize,
    pub channel_id: Option<ChannelId>,
}

struct PlaybackState {
    current: Option<Track>,
    playing: bool,
    paused: bool,
    skipping: bool,
    /// Bumped for every track started
    generation: u64,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    last_active: Instant,
    volume: f64,
    crossfade: f64,
}

impl PlaybackState {
    fn new(crossfade: f64) -> Self {
        Self {
            current: None,
            playing: false,
            paused: false,
            skipping: false,
            generation: 0,
            started_at: None,
            paused_at: None,
            last_active: Instant::now(),
            volume: 1.0,
            crossfade,
        }
    }

    /// Paused time is excluded
    fn elapsed(&self, now: Instant) -> Duration {
        if !self.playing {
            return Duration::ZERO;
        }
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        match (self.paused, self.paused_at) {
            (true, Some(paused_at)) => paused_at.saturating_duration_since(started_at),
            _ => now.saturating_duration_since(started_at),
        }
    }

    fn reset(&mut self, now: Instant) -> Option<Track> {
        self.playing = false;
        self.paused = false;
        self.skipping = false;
        self.started_at = None;
        self.paused_at = None;
        self.last_active = now;
        self.current.take()
    }
}

struct Playback {
    handle: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// Opened ahead of time. It holds no ffmpeg slot; `play` acquires one
/// before streaming from it.
struct Preloaded {
    track: Track,
    source: Box<dyn PcmSource>,
}

/// Audio player for one guild
pub struct GuildPlayer {
    guild_id: GuildId,
    this: Weak<GuildPlayer>,
    shared: Arc<Shared>,
    players: Weak<PlayerMap>,
    queue: Mutex<AudioQueue>,
    filters: Mutex<FilterChain>,
    state: Mutex<PlaybackState>,
    volume: VolumeHandle,
    voice: RwLock<Option<Arc<dyn VoiceConnection>>>,
    pause_tx: watch::Sender<bool>,
    /// Flipped once by `halt`; cancels a pending ffmpeg slot wait
    halt_tx: watch::Sender<bool>,
    /// Serialises starting tracks
    process_lock: tokio::sync::Mutex<()>,
    playback: Mutex<Option<Playback>>,
    preloaded: tokio::sync::Mutex<Option<Preloaded>>,
    /// Bumped whenever a preloaded source becomes stale
    preload_epoch: AtomicU64,
    finished_tx: mpsc::UnboundedSender<Option<String>>,
    finished_rx: Mutex<Option<mpsc::UnboundedReceiver<Option<String>>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl GuildPlayer {
    pub(crate) fn new(guild_id: GuildId, shared: Arc<Shared>, players: Weak<PlayerMap>) -> Arc<Self> {
        let (pause_tx, _) = watch::channel(false);
        let (halt_tx, _) = watch::channel(false);
        let (finished_tx, finished_rx) = mpsc::unbounded_channel();
        let queue = AudioQueue::new(
            shared.config.max_queue_size,
            oscillate_core::queue::DEFAULT_HISTORY_SIZE,
        );
        let crossfade = shared.config.crossfade_duration;

        Arc::new_cyclic(|this| Self {
            guild_id,
            this: this.clone(),
            shared,
            players,
            queue: Mutex::new(queue),
            filters: Mutex::new(FilterChain::new()),
            state: Mutex::new(PlaybackState::new(crossfade)),
            volume: VolumeHandle::new(1.0),
            voice: RwLock::new(None),
            pause_tx,
            halt_tx,
            process_lock: tokio::sync::Mutex::new(()),
            playback: Mutex::new(None),
            preloaded: tokio::sync::Mutex::new(None),
            preload_epoch: AtomicU64::new(0),
            finished_tx,
            finished_rx: Mutex::new(Some(finished_rx)),
            driver: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    /// Whether [`GuildPlayer::stop`] has run
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> PlayerResult<()> {
        if self.is_stopped() {
            return Err(PlayerError::Stopped);
        }
        Ok(())
    }

    fn connected_voice(&self) -> Option<Arc<dyn VoiceConnection>> {
        self.voice.read().clone().filter(|v| v.is_connected())
    }

    /// Connected voice channel
    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.connected_voice().map(|v| v.channel_id())
    }

    // ========================================================================
    // Voice
    // ========================================================================

    /// Connect to `channel_id`, or move there when connected elsewhere
    pub async fn ensure_voice(&self, channel_id: ChannelId) -> PlayerResult<()> {
        self.ensure_running()?;

        if let Some(voice) = self.connected_voice() {
            if voice.channel_id() != channel_id {
                voice.move_to(channel_id).await.inspect_err(|e| {
                    error!(guild_id = self.guild_id, channel_id, error = %e, "Failed to move voice channel");
                })?;
                info!(guild_id = self.guild_id, channel_id, "Moved to new voice channel");
            }
            return Ok(());
        }

        let voice = self
            .shared
            .connector
            .connect(self.guild_id, channel_id)
            .await
            .inspect_err(|e| {
                error!(guild_id = self.guild_id, channel_id, error = %e, "Failed to connect to voice");
            })?;
        *self.voice.write() = Some(voice);
        self.state.lock().last_active = Instant::now();
        info!(guild_id = self.guild_id, channel_id, "Connected to voice");
        Ok(())
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Queue a track and start playing when idle
    pub async fn add(&self, track: Track) -> PlayerResult<()> {
        self.ensure_running()?;
        self.queue.lock().put(track.clone())?;
        self.shared.cache_track(&track);
        self.queue_changed();
        debug!(guild_id = self.guild_id, track = %track, "Track queued");
        self.process_queue().await
    }

    /// Queue several tracks; none are added when they would not all fit
    pub async fn add_many(&self, tracks: Vec<Track>) -> PlayerResult<()> {
        self.ensure_running()?;
        self.queue.lock().put_many(tracks.clone())?;
        for track in &tracks {
            self.shared.cache_track(track);
        }
        self.queue_changed();
        debug!(guild_id = self.guild_id, count = tracks.len(), "Tracks queued");
        self.process_queue().await
    }

    fn queue_changed(&self) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_guild_queue_size(self.guild_id, self.queue_size());
        }
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().size()
    }

    /// Queued tracks in insertion order
    pub fn queued_tracks(&self) -> Vec<Track> {
        self.queue.lock().to_vec()
    }

    /// Next tracks in play order
    pub fn upcoming(&self, count: usize) -> Vec<Track> {
        self.queue.lock().peek(count)
    }

    /// Played tracks, most recent first
    pub fn history(&self, count: Option<usize>) -> Vec<Track> {
        self.queue.lock().history(count)
    }

    pub fn queue_statistics(&self) -> QueueStatistics {
        self.queue.lock().statistics()
    }

    pub fn remove_track(&self, index: isize) -> PlayerResult<Track> {
        let track = self.queue.lock().remove_at(index)?;
        self.queue_changed();
        Ok(track)
    }

    pub fn move_track(&self, from: isize, to: isize) -> PlayerResult<()> {
        self.queue.lock().move_track(from, to)?;
        Ok(())
    }

    pub fn clear_queue(&self) {
        self.queue.lock().clear();
        self.queue_changed();
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.queue.lock().loop_mode()
    }

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.queue.lock().set_loop_mode(mode);
    }

    pub fn set_shuffle(&self, enabled: bool) {
        self.queue.lock().set_shuffle(enabled);
    }

    // ========================================================================
    // Filters
    // ========================================================================

    /// Add or replace a filter. Takes effect from the next track.
    pub async fn add_filter(&self, filter: Filter) -> PlayerResult<()> {
        let name = filter.name.clone();
        self.filters.lock().add(filter)?;
        self.invalidate_preload().await;
        info!(guild_id = self.guild_id, filter = %name, "Added filter");
        Ok(())
    }

    pub async fn remove_filter(&self, name: &str) -> bool {
        let removed = self.filters.lock().remove(name);
        if removed {
            self.invalidate_preload().await;
            info!(guild_id = self.guild_id, filter = %name, "Removed filter");
        }
        removed
    }

    /// Flip a filter on or off; `false` when no such filter
    pub async fn toggle_filter(&self, name: &str) -> bool {
        let toggled = self.filters.lock().toggle(name);
        if toggled {
            self.invalidate_preload().await;
        }
        toggled
    }

    pub async fn clear_filters(&self) {
        self.filters.lock().clear();
        self.invalidate_preload().await;
        info!(guild_id = self.guild_id, "Cleared all filters");
    }

    pub fn filter_state(&self) -> ChainState {
        self.filters.lock().to_state()
    }

    /// Transcode arguments for the current bitrate followed by the filter
    /// chain, sanitised
    pub fn ffmpeg_args(&self) -> FfmpegArgs {
        let base = transcode_args(self.shared.bitrate());
        let filters = self.filters.lock().combined_args();
        validate_args(&base.merge(&filters))
    }

    // ========================================================================
    // Playback control
    // ========================================================================

    /// Set the volume, clamped to 0.0..=2.0; applies to the playing track
    pub fn set_volume(&self, volume: f64) -> f64 {
        let volume = volume.max(0.0).min(MAX_VOLUME);
        self.state.lock().volume = volume;
        self.volume.set_volume(volume as f32);
        volume
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    pub fn set_crossfade(&self, seconds: f64) {
        self.state.lock().crossfade = seconds.max(0.0);
    }

    pub fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn current_track(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    /// Fade the current track out over the crossfade duration and move on.
    /// Returns `false` when nothing is playing.
    pub async fn skip(&self) -> bool {
        let (generation, crossfade, paused) = {
            let mut state = self.state.lock();
            if !state.playing || self.playback.lock().is_none() {
                return false;
            }
            state.skipping = true;
            (state.generation, state.crossfade, state.paused)
        };

        if !paused {
            self.fade_out(generation, crossfade).await;
        }

        self.shared.emit(PlayerEvent::Skip {
            guild_id: self.guild_id,
        });
        if self.state.lock().generation == generation {
            self.signal_stop();
        }
        true
    }

    pub fn pause(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.playing || state.paused {
                return false;
            }
            state.paused = true;
            state.paused_at = Some(Instant::now());
        }
        self.pause_tx.send_replace(true);
        self.shared.emit(PlayerEvent::Pause {
            guild_id: self.guild_id,
        });
        true
    }

    pub fn resume(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.paused {
                return false;
            }
            let now = Instant::now();
            if let (Some(paused_at), Some(started_at)) = (state.paused_at, state.started_at) {
                state.started_at = Some(started_at + now.saturating_duration_since(paused_at));
            }
            state.paused = false;
            state.paused_at = None;
            state.last_active = now;
        }
        self.pause_tx.send_replace(false);
        self.shared.emit(PlayerEvent::Resume {
            guild_id: self.guild_id,
        });
        true
    }

    /// Stop playback, disconnect, clear the queue and the persisted state,
    /// then deregister from the manager. The player accepts no further work.
    pub async fn stop(&self) {
        self.halt(true).await;
    }

    /// Stop without touching the persisted state; used on manager shutdown
    /// right after the state was saved.
    pub(crate) async fn halt(&self, clear_saved: bool) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.halt_tx.send_replace(true);
        let _guard = self.process_lock.lock().await;

        let (generation, crossfade, fade) = {
            let state = self.state.lock();
            (
                state.generation,
                state.crossfade.min(STOP_FADE_LIMIT),
                state.playing && !state.paused,
            )
        };
        if fade && self.connected_voice().is_some() {
            self.fade_out(generation, crossfade).await;
        }

        let playback = self.playback.lock().take();
        if let Some(playback) = playback {
            playback.stop_tx.send_replace(true);
            let _ = playback.handle.await;
        }
        self.discard_preload().await;

        let voice = self.voice.write().take();
        if let Some(voice) = voice {
            if let Err(e) = voice.disconnect().await {
                warn!(guild_id = self.guild_id, error = %e, "Voice disconnect failed");
            }
        }

        self.state.lock().reset(Instant::now());
        self.pause_tx.send_replace(false);
        self.queue.lock().clear();
        self.queue_changed();

        if let Some(store) = self.shared.store().filter(|_| clear_saved) {
            if let Err(e) = store.clear_queue_state(self.guild_id).await {
                warn!(guild_id = self.guild_id, error = %e, "Failed to clear saved state");
            }
        }

        self.shared.emit(PlayerEvent::Stop {
            guild_id: self.guild_id,
        });

        if let Some(players) = self.players.upgrade() {
            let registered = players
                .read()
                .get(&self.guild_id)
                .is_some_and(|p| std::ptr::eq(Arc::as_ptr(p), self));
            if registered {
                remove_player(&players, &self.shared, self.guild_id);
            }
        }
        info!(guild_id = self.guild_id, "Player stopped");
    }

    async fn fade_out(&self, generation: u64, duration: f64) {
        if duration <= 0.0 {
            return;
        }
        let steps = ((duration * 10.0) as usize).clamp(3, 20);
        let step = Duration::from_secs_f64(duration / steps as f64);

        for i in 0..=steps {
            {
                let state = self.state.lock();
                if !state.playing || state.generation != generation {
                    break;
                }
            }
            self.volume.set_fade(1.0 - i as f32 / steps as f32);
            tokio::time::sleep(step).await;
        }
    }

    fn signal_stop(&self) {
        if let Some(playback) = self.playback.lock().as_ref() {
            playback.stop_tx.send_replace(true);
        }
    }

    // ========================================================================
    // Queue processing
    // ========================================================================

    /// Start the next track when connected and nothing is playing.
    /// Without a voice connection the queue is left untouched.
    pub async fn process_queue(&self) -> PlayerResult<()> {
        let _guard = self.process_lock.lock().await;
        if self.is_stopped() {
            return Ok(());
        }
        {
            // `current` without `playing` is a start that failed and has not
            // been finished by the driver yet
            let state = self.state.lock();
            if state.playing || state.current.is_some() {
                return Ok(());
            }
        }
        let Some(voice) = self.connected_voice() else {
            debug!(guild_id = self.guild_id, "Not connected, leaving queue untouched");
            return Ok(());
        };
        let Some(track) = self.queue.lock().get() else {
            return Ok(());
        };
        self.queue_changed();

        self.play(track, voice).await
    }

    async fn play(&self, track: Track, voice: Arc<dyn VoiceConnection>) -> PlayerResult<()> {
        self.shared.adapt_bitrate();
        let args = self.ffmpeg_args();

        {
            let mut state = self.state.lock();
            state.reset(Instant::now());
            state.current = Some(track.clone());
        }
        self.ensure_driver();

        let (mut source, permit) = match self.open_source(&track, &args).await {
            Ok(opened) => opened,
            // halt is waiting on process_lock and tears the state down
            Err(PlayerError::Stopped) => {
                debug!(
                    guild_id = self.guild_id,
                    track = %track,
                    "Stopped while waiting for an ffmpeg slot"
                );
                return Ok(());
            }
            Err(e) => {
                error!(
                    guild_id = self.guild_id,
                    track = %track,
                    error = %e,
                    "Failed to open audio source"
                );
                let _ = self.finished_tx.send(Some(e.to_string()));
                return Ok(());
            }
        };
        if self.is_stopped() {
            source.close().await;
            return Ok(());
        }

        let volume = {
            let mut state = self.state.lock();
            let now = Instant::now();
            state.playing = true;
            state.generation += 1;
            state.started_at = Some(now);
            state.last_active = now;
            state.volume
        };
        self.pause_tx.send_replace(false);
        self.volume.set_volume(volume as f32);
        self.volume.set_fade(1.0);
        self.shared.stream_started();

        self.shared.emit(PlayerEvent::TrackStart {
            guild_id: self.guild_id,
            track: track.clone(),
        });
        info!(guild_id = self.guild_id, track = %track, "Now playing");

        let (stop_tx, stop_rx) = watch::channel(false);
        let pause_rx = self.pause_tx.subscribe();
        let volume = self.volume.clone();
        let shared = self.shared.clone();
        let finished = self.finished_tx.clone();
        let handle = tokio::spawn(async move {
            let error = stream(voice, source, volume, stop_rx, pause_rx).await;
            drop(permit);
            shared.stream_finished();
            let _ = finished.send(error);
        });
        *self.playback.lock() = Some(Playback { handle, stop_tx });

        let this = self.this.clone();
        tokio::spawn(async move {
            if let Some(player) = this.upgrade() {
                player.preload_next().await;
            }
        });
        Ok(())
    }

    /// Wait for a free ffmpeg slot. Fails with [`PlayerError::Stopped`] as
    /// soon as the player is halted.
    async fn acquire_slot(&self) -> PlayerResult<OwnedSemaphorePermit> {
        let mut halted = self.halt_tx.subscribe();
        let slots = self.shared.ffmpeg_slots.clone();
        tokio::select! {
            permit = slots.acquire_owned() => permit.map_err(|_| PlayerError::Shutdown),
            _ = halted.wait_for(|halted| *halted) => Err(PlayerError::Stopped),
        }
    }

    /// Source for `track` plus the ffmpeg slot it streams under. A matching
    /// preloaded source is reused.
    async fn open_source(
        &self,
        track: &Track,
        args: &FfmpegArgs,
    ) -> PlayerResult<(Box<dyn PcmSource>, OwnedSemaphorePermit)> {
        let preloaded = self.take_preload(track).await;
        let permit = match self.acquire_slot().await {
            Ok(permit) => permit,
            Err(e) => {
                if let Some(mut preloaded) = preloaded {
                    preloaded.source.close().await;
                }
                return Err(e);
            }
        };
        if let Some(preloaded) = preloaded {
            return Ok((preloaded.source, permit));
        }

        if let Some(metrics) = &self.shared.metrics {
            metrics.record_ffmpeg_spawn();
        }
        let source = self.shared.sources.open(track, args).await?;
        Ok((source, permit))
    }

    fn ensure_driver(&self) {
        let mut driver = self.driver.lock();
        if driver.is_some() {
            return;
        }
        let Some(mut finished_rx) = self.finished_rx.lock().take() else {
            return;
        };

        let this = self.this.clone();
        *driver = Some(tokio::spawn(async move {
            while let Some(error) = finished_rx.recv().await {
                let Some(player) = this.upgrade() else {
                    break;
                };
                player.finish_track(error).await;
            }
        }));
    }

    async fn finish_track(&self, error: Option<String>) {
        let (finished, elapsed, skipped) = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let elapsed = state.elapsed(now);
            let skipped = state.skipping;
            (state.reset(now), elapsed, skipped)
        };
        self.pause_tx.send_replace(false);
        self.playback.lock().take();

        self.shared.emit(PlayerEvent::TrackEnd {
            guild_id: self.guild_id,
            track: finished.clone(),
            error: error.clone(),
        });

        if let Some(track) = finished {
            match &error {
                Some(e) => {
                    warn!(guild_id = self.guild_id, track = %track, error = %e, "Track ended with error");
                    self.shared.record_error("audio");
                }
                None => self.record_completion(&track, elapsed).await,
            }

            let mut queue = self.queue.lock();
            match queue.loop_mode() {
                // Looped track sits at the front; drop it so playback moves on
                LoopMode::Single if error.is_some() || skipped => {
                    if queue.front() == Some(&track) {
                        let _ = queue.remove_at(0);
                    }
                }
                LoopMode::Queue if error.is_none() && !self.is_stopped() => {
                    if let Err(e) = queue.put(track) {
                        warn!(guild_id = self.guild_id, error = %e, "Could not requeue looped track");
                    }
                }
                _ => {}
            }
        }

        if self.is_stopped() {
            return;
        }
        if let Err(e) = self.process_queue().await {
            error!(guild_id = self.guild_id, error = %e, "Failed to start next track");
            self.shared.record_error(e.kind());
        }
    }

    async fn record_completion(&self, track: &Track, elapsed: Duration) {
        let seconds = elapsed.as_secs();
        if seconds > 0 {
            if let Some(metrics) = &self.shared.metrics {
                metrics.record_played(self.guild_id, seconds);
            }
        }

        if let Some(store) = self.shared.store() {
            if let Err(e) = store.save_track_history(self.guild_id, track).await {
                warn!(guild_id = self.guild_id, error = %e, "Failed to save track history");
                self.shared.record_error(e.kind());
            }
        }
    }

    // ========================================================================
    // Preloading
    // ========================================================================

    async fn preload_next(&self) {
        if self.is_stopped() {
            return;
        }
        let Some(next) = self.queue.lock().peek(1).into_iter().next() else {
            return;
        };
        if self
            .preloaded
            .lock()
            .await
            .as_ref()
            .is_some_and(|p| p.track == next)
        {
            return;
        }

        let Ok(permit) = self.shared.ffmpeg_slots.clone().try_acquire_owned() else {
            debug!(guild_id = self.guild_id, "No free ffmpeg slot, skipping preload");
            return;
        };
        let epoch = self.preload_epoch.load(Ordering::SeqCst);
        self.shared.adapt_bitrate();
        let args = self.ffmpeg_args();

        let opened = self.shared.sources.open(&next, &args).await;
        // The slot only covers the spawn; an idle preload must not starve
        // other guilds
        drop(permit);
        let mut source = match opened {
            Ok(source) => source,
            Err(e) => {
                debug!(guild_id = self.guild_id, error = %e, "Preload failed");
                return;
            }
        };
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_ffmpeg_spawn();
        }

        let mut slot = self.preloaded.lock().await;
        if self.is_stopped() || self.preload_epoch.load(Ordering::SeqCst) != epoch {
            source.close().await;
            return;
        }
        let previous = slot.replace(Preloaded {
            track: next.clone(),
            source,
        });
        drop(slot);
        if let Some(mut previous) = previous {
            previous.source.close().await;
        }
        debug!(guild_id = self.guild_id, track = %next, "Preloaded next track");
    }

    /// Preloaded source for `track`; any other preloaded source is closed
    async fn take_preload(&self, track: &Track) -> Option<Preloaded> {
        let preloaded = self.preloaded.lock().await.take()?;
        if &preloaded.track == track {
            return Some(preloaded);
        }
        let mut stale = preloaded;
        stale.source.close().await;
        None
    }

    async fn invalidate_preload(&self) {
        self.preload_epoch.fetch_add(1, Ordering::SeqCst);
        self.discard_preload().await;
    }

    async fn discard_preload(&self) {
        let preloaded = self.preloaded.lock().await.take();
        if let Some(mut preloaded) = preloaded {
            preloaded.source.close().await;
        }
    }

    // ========================================================================
    // State
    // ========================================================================

    /// Playback time of the current track, excluding pauses
    pub fn time_elapsed(&self) -> Duration {
        self.state.lock().elapsed(Instant::now())
    }

    /// Connected but silent with an empty queue for longer than `timeout`
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        if self.connected_voice().is_none() {
            return false;
        }
        let state = self.state.lock();
        // A track waiting for an ffmpeg slot counts as activity
        if state.playing || state.paused || state.current.is_some() {
            return false;
        }
        if !self.queue.lock().is_empty() {
            return false;
        }
        now.saturating_duration_since(state.last_active) > timeout
    }

    pub fn serialize_state(&self) -> PlayerState {
        let (current, volume, crossfade) = {
            let state = self.state.lock();
            (state.current.clone(), state.volume, state.crossfade)
        };
        PlayerState {
            current,
            queue: Some(self.queue.lock().export_state()),
            volume,
            crossfade: Some(crossfade),
            filters: Some(self.filters.lock().to_state()),
            last_saved: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    /// Apply saved state. The saved current track goes back to the front
    /// of the queue.
    pub async fn deserialize_state(&self, data: Value) -> PlayerResult<()> {
        let saved: PlayerState = serde_json::from_value(data)?;
        let filters = saved.filters.map(FilterChain::from_state).transpose()?;

        {
            let mut queue = self.queue.lock();
            if let Some(queue_state) = saved.queue {
                queue.import_state(queue_state);
            }
            if let Some(current) = saved.current {
                if let Err(e) = queue.add_to_front(current) {
                    warn!(guild_id = self.guild_id, error = %e, "Dropped saved current track");
                }
            }
        }
        if let Some(filters) = filters {
            *self.filters.lock() = filters;
        }
        self.set_volume(saved.volume);
        if let Some(crossfade) = saved.crossfade {
            self.set_crossfade(crossfade);
        }
        self.invalidate_preload().await;
        self.queue_changed();

        info!(guild_id = self.guild_id, "Restored player state");
        Ok(())
    }

    pub fn status(&self) -> PlayerStatus {
        let (playing, paused, current_track, time_elapsed, volume) = {
            let state = self.state.lock();
            (
                state.playing,
                state.paused,
                state.current.clone(),
                state.elapsed(Instant::now()),
                state.volume,
            )
        };
        let (queue_size, loop_mode, shuffle) = {
            let queue = self.queue.lock();
            (queue.size(), queue.loop_mode(), queue.shuffle())
        };

        PlayerStatus {
            guild_id: self.guild_id,
            playing,
            paused,
            queue_size,
            current_track,
            time_elapsed: time_elapsed.as_secs_f64(),
            volume,
            loop_mode,
            shuffle,
            filters_active: self.filters.lock().enabled_count(),
            channel_id: self.voice_channel(),
        }
    }
}

impl Drop for GuildPlayer {
    fn drop(&mut self) {
        if let Some(playback) = self.playback.get_mut().take() {
            playback.handle.abort();
        }
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

/// Pump frames from `source` to `voice` until the source ends, an error
/// occurs or a stop is signalled. Returns the error message, if any.
async fn stream(
    voice: Arc<dyn VoiceConnection>,
    mut source: Box<dyn PcmSource>,
    volume: VolumeHandle,
    mut stop_rx: watch::Receiver<bool>,
    mut pause_rx: watch::Receiver<bool>,
) -> Option<String> {
    let mut error = None;

    loop {
        if *stop_rx.borrow() {
            break;
        }
        if *pause_rx.borrow() {
            tokio::select! {
                _ = stop_rx.wait_for(|stop| *stop) => break,
                resumed = pause_rx.wait_for(|paused| !*paused) => {
                    if resumed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let frame = tokio::select! {
            _ = stop_rx.wait_for(|stop| *stop) => break,
            frame = source.next_frame() => frame,
        };
        let mut frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                error = Some(e.to_string());
                break;
            }
        };

        apply_gain(&mut frame, volume.gain());
        tokio::select! {
            _ = stop_rx.wait_for(|stop| *stop) => break,
            sent = voice.send_frame(&frame) => {
                if let Err(e) = sent {
                    error = Some(e.to_string());
                    break;
                }
            }
        }
    }

    source.close().await;
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_excludes_pause() {
        let start = Instant::now();
        let mut state = PlaybackState::new(0.0);
        assert_eq!(state.elapsed(start), Duration::ZERO);

        state.playing = true;
        state.started_at = Some(start);
        assert_eq!(state.elapsed(start + Duration::from_secs(5)), Duration::from_secs(5));

        state.paused = true;
        state.paused_at = Some(start + Duration::from_secs(3));
        assert_eq!(state.elapsed(start + Duration::from_secs(60)), Duration::from_secs(3));
    }

    #[test]
    fn test_reset_returns_current() {
        let mut state = PlaybackState::new(3.0);
        state.current = Some(Track::new("Song", "a").unwrap());
        state.playing = true;
        state.skipping = true;

        let now = Instant::now();
        let finished = state.reset(now);
        assert_eq!(finished.map(|t| t.audio_url), Some("a".to_string()));
        assert!(!state.playing);
        assert!(!state.skipping);
        assert_eq!(state.last_active, now);
    }

    #[test]
    fn test_player_state_defaults() {
        let state: PlayerState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.volume, 1.0);
        assert!(state.current.is_none());
        assert!(state.queue.is_none());
        assert!(state.crossfade.is_none());
    }
}
