//! Track metadata cache

use std::collections::{HashMap, VecDeque};

use oscillate_core::Track;

/// Bounded cache of resolved tracks keyed by webpage URL (or audio URL).
/// The oldest insertion is evicted first.
pub struct TrackCache {
    capacity: usize,
    entries: HashMap<String, Track>,
    order: VecDeque<String>,
}

impl TrackCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Track> {
        self.entries.get(key)
    }

    /// Store a track. Returns true when its key was already cached.
    pub fn insert(&mut self, track: Track) -> bool {
        let key = track.cache_key().to_string();
        if self.entries.contains_key(&key) {
            self.entries.insert(key, track);
            return true;
        }
        if self.capacity == 0 {
            return false;
        }

        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, track);
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(url: &str) -> Track {
        Track::new("Song", url).unwrap()
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = TrackCache::new(4);
        assert!(!cache.insert(track("a")));
        assert!(cache.insert(track("a")));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_some());
    }

    #[test]
    fn test_evicts_oldest() {
        let mut cache = TrackCache::new(2);
        cache.insert(track("a"));
        cache.insert(track("b"));
        cache.insert(track("c"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_keyed_by_webpage_url() {
        let mut cache = TrackCache::new(2);
        cache.insert(track("a").with_webpage_url("https://example.com/watch"));
        assert!(cache.get("https://example.com/watch").is_some());
        assert!(cache.get("a").is_none());
    }
}
