//! Track queue with shuffle, loop modes and play history

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OscillateError, OscillateResult};
use crate::track::{now_secs, Track};

/// Default maximum number of queued tracks
pub const DEFAULT_MAX_SIZE: usize = 1000;
/// Default number of played tracks remembered
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// What happens to a track once it has been taken from the queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    /// Play each track once
    #[default]
    None,
    /// Repeat the current track
    Single,
    /// Re-queue finished tracks at the back
    Queue,
}

impl LoopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::None => "none",
            LoopMode::Single => "single",
            LoopMode::Queue => "queue",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopMode {
    type Err = OscillateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "off" => Ok(LoopMode::None),
            "single" | "track" => Ok(LoopMode::Single),
            "queue" | "all" => Ok(LoopMode::Queue),
            other => Err(OscillateError::Queue(format!("Unknown loop mode: {}", other))),
        }
    }
}

/// Point-in-time queue statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatistics {
    pub size: usize,
    pub max_size: usize,
    pub is_empty: bool,
    pub is_full: bool,
    pub shuffle: bool,
    pub loop_mode: LoopMode,
    pub history_size: usize,
    pub total_added: u64,
    pub total_played: u64,
    pub total_duration: Option<u64>,
}

/// Persisted queue state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueState {
    #[serde(default)]
    pub tracks: Vec<Track>,
    /// Played tracks, oldest first
    #[serde(default)]
    pub history: Vec<Track>,
    #[serde(default)]
    pub shuffle: bool,
    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default)]
    pub total_added: u64,
    #[serde(default)]
    pub total_played: u64,
    #[serde(default)]
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    track: Track,
}

/// Ordered track queue.
///
/// Tracks are kept in insertion order. With shuffle enabled a random play
/// order over the queued entries decides what `get` and `peek` return;
/// any structural change regenerates that order.
pub struct AudioQueue {
    entries: VecDeque<Entry>,
    history: VecDeque<Track>,
    /// Remaining play order (entry ids) while shuffled
    shuffle_order: Vec<u64>,
    next_id: u64,
    rng: StdRng,
    max_size: usize,
    history_size: usize,
    shuffle: bool,
    loop_mode: LoopMode,
    total_added: u64,
    total_played: u64,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_HISTORY_SIZE)
    }
}

impl AudioQueue {
    pub fn new(max_size: usize, history_size: usize) -> Self {
        Self::with_rng(max_size, history_size, StdRng::from_entropy())
    }

    /// Create a queue with a deterministic shuffle sequence
    pub fn with_seed(max_size: usize, history_size: usize, seed: u64) -> Self {
        Self::with_rng(max_size, history_size, StdRng::seed_from_u64(seed))
    }

    fn with_rng(max_size: usize, history_size: usize, rng: StdRng) -> Self {
        Self {
            entries: VecDeque::new(),
            history: VecDeque::with_capacity(history_size),
            shuffle_order: Vec::new(),
            next_id: 0,
            rng,
            max_size,
            history_size,
            shuffle: false,
            loop_mode: LoopMode::None,
            total_added: 0,
            total_played: 0,
        }
    }

    fn entry(&mut self, track: Track) -> Entry {
        let id = self.next_id;
        self.next_id += 1;
        Entry { id, track }
    }

    fn ensure_capacity(&self, additional: usize) -> OscillateResult<()> {
        if additional == 1 && self.entries.len() >= self.max_size {
            return Err(OscillateError::Queue(format!(
                "Queue is full (max {} tracks)",
                self.max_size
            )));
        }
        if self.entries.len() + additional > self.max_size {
            return Err(OscillateError::Queue(format!(
                "Cannot add {} tracks, would exceed limit ({} > {})",
                additional,
                self.entries.len() + additional,
                self.max_size
            )));
        }
        Ok(())
    }

    fn resolve_index(&self, index: isize, allow_end: bool) -> Option<usize> {
        let len = self.entries.len() as isize;
        let resolved = if index < 0 { index + len } else { index };
        let upper = if allow_end { len } else { len - 1 };
        (0..=upper).contains(&resolved).then_some(resolved as usize)
    }

    fn regenerate_shuffle(&mut self) {
        if !self.shuffle {
            self.shuffle_order.clear();
            return;
        }
        self.shuffle_order = self.entries.iter().map(|e| e.id).collect();
        self.shuffle_order.shuffle(&mut self.rng);
    }

    /// Append a track
    pub fn put(&mut self, track: Track) -> OscillateResult<()> {
        self.ensure_capacity(1)?;
        let entry = self.entry(track);
        self.entries.push_back(entry);
        self.total_added += 1;
        self.regenerate_shuffle();
        Ok(())
    }

    /// Append several tracks; nothing is added when they would not all fit
    pub fn put_many(&mut self, tracks: Vec<Track>) -> OscillateResult<()> {
        if tracks.is_empty() {
            return Ok(());
        }
        if self.entries.len() + tracks.len() > self.max_size {
            return Err(OscillateError::Queue(format!(
                "Cannot add {} tracks, would exceed limit ({} > {})",
                tracks.len(),
                self.entries.len() + tracks.len(),
                self.max_size
            )));
        }
        for track in tracks {
            let entry = self.entry(track);
            self.entries.push_back(entry);
            self.total_added += 1;
        }
        self.regenerate_shuffle();
        Ok(())
    }

    /// Insert a track so it plays next
    pub fn add_to_front(&mut self, track: Track) -> OscillateResult<()> {
        self.ensure_capacity(1)?;
        let entry = self.entry(track);
        let id = entry.id;
        self.entries.push_front(entry);
        self.total_added += 1;
        self.regenerate_shuffle();
        if self.shuffle {
            self.shuffle_order.retain(|x| *x != id);
            self.shuffle_order.insert(0, id);
        }
        Ok(())
    }

    /// Take the next track.
    ///
    /// In `Single` loop mode the track is put back at the front so it is
    /// returned again by the next call.
    pub fn get(&mut self) -> Option<Track> {
        if self.entries.is_empty() {
            return None;
        }

        let position = if self.shuffle {
            if self.shuffle_order.is_empty() {
                self.regenerate_shuffle();
            }
            let id = self.shuffle_order.remove(0);
            self.entries.iter().position(|e| e.id == id)?
        } else {
            0
        };

        let mut entry = self.entries.remove(position)?;
        entry.track.increment_play_count();
        self.push_history(entry.track.clone());
        self.total_played += 1;

        if self.loop_mode == LoopMode::Single {
            let track = entry.track.clone();
            if self.shuffle {
                self.shuffle_order.insert(0, entry.id);
            }
            self.entries.push_front(entry);
            return Some(track);
        }

        Some(entry.track)
    }

    fn push_history(&mut self, track: Track) {
        if self.history_size == 0 {
            return;
        }
        while self.history.len() >= self.history_size {
            self.history.pop_front();
        }
        self.history.push_back(track);
    }

    /// The next `count` tracks in play order
    pub fn peek(&self, count: usize) -> Vec<Track> {
        if self.shuffle && !self.shuffle_order.is_empty() {
            return self
                .shuffle_order
                .iter()
                .filter_map(|id| self.entries.iter().find(|e| e.id == *id))
                .take(count)
                .map(|e| e.track.clone())
                .collect();
        }
        self.entries
            .iter()
            .take(count)
            .map(|e| e.track.clone())
            .collect()
    }

    /// First track in insertion order
    pub fn front(&self) -> Option<&Track> {
        self.entries.front().map(|e| &e.track)
    }

    /// Remove the track at `index` (negative counts from the end)
    pub fn remove_at(&mut self, index: isize) -> OscillateResult<Track> {
        let idx = self
            .resolve_index(index, false)
            .ok_or_else(|| OscillateError::Queue(format!("Index {} out of range", index)))?;
        let entry = self
            .entries
            .remove(idx)
            .ok_or_else(|| OscillateError::Queue("Track not found in queue".to_string()))?;
        self.regenerate_shuffle();
        Ok(entry.track)
    }

    /// Move a track from `src` to `dst`
    pub fn move_track(&mut self, src: isize, dst: isize) -> OscillateResult<()> {
        let from = self
            .resolve_index(src, false)
            .ok_or_else(|| OscillateError::Queue(format!("Source index {} out of range", src)))?;
        let to = self.resolve_index(dst, true).ok_or_else(|| {
            OscillateError::Queue(format!("Destination index {} out of range", dst))
        })?;

        if let Some(entry) = self.entries.remove(from) {
            let to = to.min(self.entries.len());
            self.entries.insert(to, entry);
        }
        self.regenerate_shuffle();
        Ok(())
    }

    /// Insert a copy of the track at `index` right after it
    pub fn duplicate(&mut self, index: isize) -> OscillateResult<()> {
        let idx = self
            .resolve_index(index, false)
            .ok_or_else(|| OscillateError::Queue(format!("Index {} out of range", index)))?;
        self.ensure_capacity(1)?;

        let track = self.entries[idx].track.clone();
        let entry = self.entry(track);
        self.entries.insert(idx + 1, entry);
        self.total_added += 1;
        self.regenerate_shuffle();
        Ok(())
    }

    /// Drop every queued track (history is kept)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.shuffle_order.clear();
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle = enabled;
        self.regenerate_shuffle();
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Played tracks, most recent first
    pub fn history(&self, count: Option<usize>) -> Vec<Track> {
        self.history
            .iter()
            .rev()
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Queued tracks in insertion order
    pub fn to_vec(&self) -> Vec<Track> {
        self.entries.iter().map(|e| e.track.clone()).collect()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_size
    }

    /// Sum of durations, or `None` if the queue is empty or any duration is unknown
    pub fn total_duration(&self) -> Option<u64> {
        if self.entries.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .map(|e| e.track.duration)
            .sum::<Option<u64>>()
    }

    pub fn statistics(&self) -> QueueStatistics {
        QueueStatistics {
            size: self.size(),
            max_size: self.max_size,
            is_empty: self.is_empty(),
            is_full: self.is_full(),
            shuffle: self.shuffle,
            loop_mode: self.loop_mode,
            history_size: self.history.len(),
            total_added: self.total_added,
            total_played: self.total_played,
            total_duration: self.total_duration(),
        }
    }

    pub fn export_state(&self) -> QueueState {
        QueueState {
            tracks: self.to_vec(),
            history: self.history.iter().cloned().collect(),
            shuffle: self.shuffle,
            loop_mode: self.loop_mode,
            total_added: self.total_added,
            total_played: self.total_played,
            timestamp: now_secs(),
        }
    }

    /// Replace the queue contents with a previously exported state. Tracks
    /// beyond this queue's `max_size` are dropped from the back.
    pub fn import_state(&mut self, state: QueueState) {
        self.clear();
        let mut tracks = state.tracks;
        if tracks.len() > self.max_size {
            warn!(
                saved = tracks.len(),
                max_size = self.max_size,
                "Saved queue exceeds max size, dropping extra tracks"
            );
            tracks.truncate(self.max_size);
        }
        for track in tracks {
            let entry = self.entry(track);
            self.entries.push_back(entry);
        }

        self.history.clear();
        for track in state.history {
            self.push_history(track);
        }

        self.shuffle = state.shuffle;
        self.loop_mode = state.loop_mode;
        self.total_added = state.total_added;
        self.total_played = state.total_played;
        self.regenerate_shuffle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn track(n: usize) -> Track {
        Track::new(format!("Track {}", n), format!("https://cdn.example/{}", n))
            .unwrap()
            .with_duration(60)
    }

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn test_fifo_order_and_history() {
        let mut queue = AudioQueue::default();
        queue.put(track(1)).unwrap();
        queue.put(track(2)).unwrap();

        let first = queue.get().unwrap();
        assert_eq!(first.title, "Track 1");
        assert_eq!(first.play_count, 1);
        assert_eq!(queue.get().unwrap().title, "Track 2");
        assert!(queue.get().is_none());

        assert_eq!(titles(&queue.history(None)), vec!["Track 2", "Track 1"]);
        assert_eq!(queue.statistics().total_played, 2);
    }

    #[test]
    fn test_put_respects_max_size() {
        let mut queue = AudioQueue::new(2, 10);
        queue.put(track(1)).unwrap();
        queue.put(track(2)).unwrap();
        assert!(queue.is_full());

        let err = queue.put(track(3)).unwrap_err();
        assert!(err.to_string().contains("Queue is full (max 2 tracks)"));
    }

    #[test]
    fn test_put_many_is_all_or_nothing() {
        let mut queue = AudioQueue::new(3, 10);
        queue.put(track(1)).unwrap();

        assert!(queue.put_many(vec![track(2), track(3), track(4)]).is_err());
        assert_eq!(queue.size(), 1);

        queue.put_many(vec![track(2), track(3)]).unwrap();
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn test_single_loop_repeats_track() {
        let mut queue = AudioQueue::default();
        queue.put(track(1)).unwrap();
        queue.put(track(2)).unwrap();
        queue.set_loop_mode(LoopMode::Single);

        assert_eq!(queue.get().unwrap().title, "Track 1");
        assert_eq!(queue.get().unwrap().title, "Track 1");
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut queue = AudioQueue::new(10, 2);
        for n in 0..4 {
            queue.put(track(n)).unwrap();
        }
        while queue.get().is_some() {}
        assert_eq!(titles(&queue.history(None)), vec!["Track 3", "Track 2"]);
        assert_eq!(titles(&queue.history(Some(1))), vec!["Track 3"]);
    }

    #[test]
    fn test_remove_and_move_with_negative_indices() {
        let mut queue = AudioQueue::default();
        for n in 1..=4 {
            queue.put(track(n)).unwrap();
        }

        let removed = queue.remove_at(-1).unwrap();
        assert_eq!(removed.title, "Track 4");

        queue.move_track(0, -1).unwrap();
        assert_eq!(
            titles(&queue.to_vec()),
            vec!["Track 2", "Track 1", "Track 3"]
        );

        queue.move_track(0, 3).unwrap();
        assert_eq!(
            titles(&queue.to_vec()),
            vec!["Track 1", "Track 3", "Track 2"]
        );

        assert!(queue.remove_at(3).is_err());
        assert!(queue.move_track(5, 0).is_err());
        assert!(queue.move_track(0, 4).is_err());
    }

    #[test]
    fn test_add_to_front_and_duplicate() {
        let mut queue = AudioQueue::new(3, 10);
        queue.put(track(1)).unwrap();
        queue.add_to_front(track(0)).unwrap();
        queue.duplicate(0).unwrap();

        assert_eq!(
            titles(&queue.to_vec()),
            vec!["Track 0", "Track 0", "Track 1"]
        );
        assert!(queue.duplicate(0).is_err());
        assert_eq!(queue.statistics().total_added, 3);
    }

    #[test]
    fn test_shuffle_plays_every_track_once() {
        let mut queue = AudioQueue::with_seed(100, 10, 7);
        for n in 0..20 {
            queue.put(track(n)).unwrap();
        }
        queue.set_shuffle(true);

        let peeked = queue.peek(1).pop().unwrap();
        let first = queue.get().unwrap();
        assert_eq!(peeked, first);

        let mut seen = HashSet::new();
        seen.insert(first.audio_url.clone());
        while let Some(t) = queue.get() {
            assert!(seen.insert(t.audio_url.clone()), "track played twice");
        }
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn test_disable_shuffle_restores_insertion_order() {
        let mut queue = AudioQueue::with_seed(100, 10, 3);
        for n in 0..5 {
            queue.put(track(n)).unwrap();
        }
        queue.set_shuffle(true);
        queue.set_shuffle(false);
        assert_eq!(queue.get().unwrap().title, "Track 0");
    }

    #[test]
    fn test_total_duration() {
        let mut queue = AudioQueue::default();
        assert_eq!(queue.total_duration(), None);

        queue.put(track(1)).unwrap();
        queue.put(track(2)).unwrap();
        assert_eq!(queue.total_duration(), Some(120));

        queue
            .put(Track::new("No length", "https://cdn.example/x").unwrap())
            .unwrap();
        assert_eq!(queue.total_duration(), None);
    }

    #[test]
    fn test_export_import_state() {
        let mut queue = AudioQueue::default();
        queue.put(track(1)).unwrap();
        queue.put(track(2)).unwrap();
        queue.put(track(3)).unwrap();
        queue.get();
        queue.set_loop_mode(LoopMode::Queue);

        let state = queue.export_state();
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"loop_mode\":\"queue\""));

        let mut restored = AudioQueue::default();
        restored.import_state(serde_json::from_str(&json).unwrap());

        assert_eq!(titles(&restored.to_vec()), vec!["Track 2", "Track 3"]);
        assert_eq!(titles(&restored.history(None)), vec!["Track 1"]);
        assert_eq!(restored.loop_mode(), LoopMode::Queue);
        assert_eq!(restored.statistics().total_added, 3);
        assert_eq!(restored.statistics().total_played, 1);
    }

    #[test]
    fn test_import_truncates_to_max_size() {
        let mut large = AudioQueue::new(10, 5);
        for n in 1..=6 {
            large.put(track(n)).unwrap();
        }
        let state = large.export_state();

        let mut small = AudioQueue::new(4, 5);
        small.import_state(state);

        assert_eq!(small.size(), 4);
        assert!(small.is_full());
        assert_eq!(
            titles(&small.to_vec()),
            vec!["Track 1", "Track 2", "Track 3", "Track 4"]
        );
        assert!(small.put(track(7)).is_err());
    }

    #[test]
    fn test_loop_mode_parse() {
        assert_eq!("Queue".parse::<LoopMode>().unwrap(), LoopMode::Queue);
        assert_eq!("single".parse::<LoopMode>().unwrap(), LoopMode::Single);
        assert!("forever".parse::<LoopMode>().is_err());
    }
}
