//! Audio track model

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{OscillateError, OscillateResult};

/// The user who requested a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// Discord user ID, when known
    pub id: Option<u64>,
    /// Display name
    pub name: String,
}

impl Requester {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: name.into(),
        }
    }
}

/// An audio track with its metadata and playback bookkeeping.
///
/// Two tracks are equal when they point at the same audio URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TrackRecord", into = "TrackRecord")]
pub struct Track {
    pub title: String,
    pub audio_url: String,
    pub webpage_url: Option<String>,
    /// Duration in seconds
    pub duration: Option<u64>,
    pub uploader: Option<String>,
    pub thumbnail: Option<String>,
    pub requester: Option<Requester>,
    /// Unix timestamp (seconds) the track was created
    pub added_at: f64,
    pub play_count: u32,
    pub metadata: Map<String, Value>,
}

impl Track {
    /// Create a track. Fails when `audio_url` is empty.
    pub fn new(title: impl Into<String>, audio_url: impl Into<String>) -> OscillateResult<Self> {
        let audio_url = audio_url.into();
        if audio_url.is_empty() {
            return Err(OscillateError::Track("audio_url is required".to_string()));
        }

        let title = title.into();
        Ok(Self {
            title: if title.is_empty() {
                "Unknown Track".to_string()
            } else {
                title
            },
            audio_url,
            webpage_url: None,
            duration: None,
            uploader: None,
            thumbnail: None,
            requester: None,
            added_at: now_secs(),
            play_count: 0,
            metadata: Map::new(),
        })
    }

    pub fn with_webpage_url(mut self, url: impl Into<String>) -> Self {
        self.webpage_url = Some(url.into());
        self
    }

    /// Set the duration in seconds; zero means unknown
    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration = (seconds > 0).then_some(seconds);
        self
    }

    pub fn with_uploader(mut self, uploader: impl Into<String>) -> Self {
        self.uploader = Some(uploader.into());
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = Some(requester);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Title with the uploader appended when known
    pub fn display_title(&self) -> String {
        match &self.uploader {
            Some(uploader) => format!("{} - {}", self.title, uploader),
            None => self.title.clone(),
        }
    }

    /// `HH:MM:SS` for tracks of an hour or more, `MM:SS` otherwise
    pub fn formatted_duration(&self) -> String {
        let Some(duration) = self.duration else {
            return "Unknown".to_string();
        };

        let hours = duration / 3600;
        let minutes = (duration % 3600) / 60;
        let seconds = duration % 60;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }

    pub fn requester_name(&self) -> &str {
        self.requester
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or("Unknown")
    }

    pub fn requester_id(&self) -> Option<u64> {
        self.requester.as_ref().and_then(|r| r.id)
    }

    pub fn increment_play_count(&mut self) {
        self.play_count = self.play_count.saturating_add(1);
    }

    /// Key used by the metadata cache
    pub fn cache_key(&self) -> &str {
        self.webpage_url.as_deref().unwrap_or(&self.audio_url)
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.audio_url == other.audio_url
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.audio_url.hash(state);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_title())
    }
}

pub(crate) fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Flat wire form of a track, shared by persisted state and exports
#[derive(Debug, Serialize, Deserialize)]
struct TrackRecord {
    #[serde(default)]
    title: String,
    audio_url: String,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default, deserialize_with = "whole_seconds")]
    duration: Option<i64>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    requester_id: Option<u64>,
    #[serde(default)]
    requester_name: Option<String>,
    #[serde(default)]
    added_at: Option<f64>,
    #[serde(default)]
    play_count: u32,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Any JSON number, truncated to whole seconds
fn whole_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number = Option::<Number>::deserialize(deserializer)?;
    Ok(number.and_then(|n| {
        n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|secs| secs.is_finite())
                .map(|secs| secs.trunc() as i64)
        })
    }))
}

impl TryFrom<TrackRecord> for Track {
    type Error = OscillateError;

    fn try_from(record: TrackRecord) -> Result<Self, Self::Error> {
        let mut track = Track::new(record.title, record.audio_url)?;
        track.webpage_url = record.webpage_url;
        track.duration = record.duration.filter(|d| *d > 0).map(|d| d as u64);
        track.uploader = record.uploader;
        track.thumbnail = record.thumbnail;
        track.requester = record.requester_name.map(|name| Requester {
            id: record.requester_id,
            name,
        });
        if let Some(added_at) = record.added_at {
            track.added_at = added_at;
        }
        track.play_count = record.play_count;
        track.metadata = record.metadata;
        Ok(track)
    }
}

impl From<Track> for TrackRecord {
    fn from(track: Track) -> Self {
        let (requester_id, requester_name) = match track.requester {
            Some(r) => (r.id, Some(r.name)),
            None => (None, None),
        };
        Self {
            title: track.title,
            audio_url: track.audio_url,
            webpage_url: track.webpage_url,
            duration: track.duration.map(|d| d as i64),
            uploader: track.uploader,
            thumbnail: track.thumbnail,
            requester_id,
            requester_name,
            added_at: Some(track.added_at),
            play_count: track.play_count,
            metadata: track.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_title_defaults() {
        let track = Track::new("", "https://cdn.example/a.opus").unwrap();
        assert_eq!(track.title, "Unknown Track");
    }

    #[test]
    fn test_empty_audio_url_rejected() {
        assert!(matches!(
            Track::new("Song", ""),
            Err(OscillateError::Track(_))
        ));
    }

    #[test]
    fn test_formatted_duration() {
        let track = Track::new("Song", "a").unwrap();
        assert_eq!(track.formatted_duration(), "Unknown");
        assert_eq!(track.clone().with_duration(65).formatted_duration(), "01:05");
        assert_eq!(track.clone().with_duration(3725).formatted_duration(), "01:02:05");
        assert_eq!(track.with_duration(0).duration, None);
    }

    #[test]
    fn test_display_title_and_requester() {
        let track = Track::new("Song", "a")
            .unwrap()
            .with_uploader("Band")
            .with_requester(Requester::new(42, "alice"));
        assert_eq!(track.display_title(), "Song - Band");
        assert_eq!(track.to_string(), "Song - Band");
        assert_eq!(track.requester_name(), "alice");
        assert_eq!(track.requester_id(), Some(42));

        let anonymous = Track::new("Song", "b").unwrap();
        assert_eq!(anonymous.requester_name(), "Unknown");
        assert_eq!(anonymous.requester_id(), None);
    }

    #[test]
    fn test_equality_by_audio_url() {
        let a = Track::new("One", "same").unwrap();
        let b = Track::new("Two", "same").unwrap();
        let c = Track::new("One", "other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_deserialize_normalizes() {
        let track: Track = serde_json::from_value(json!({
            "title": "",
            "audio_url": "https://cdn.example/x",
            "duration": -5,
            "requester_id": 7,
            "requester_name": "bob"
        }))
        .unwrap();

        assert_eq!(track.title, "Unknown Track");
        assert_eq!(track.duration, None);
        assert_eq!(track.play_count, 0);
        assert_eq!(track.requester, Some(Requester::new(7, "bob")));
        assert!(track.added_at > 0.0);
    }

    #[test]
    fn test_fractional_duration_truncated() {
        let parse = |duration: Value| -> Track {
            serde_json::from_value(json!({
                "audio_url": "https://cdn.example/x",
                "duration": duration
            }))
            .unwrap()
        };

        assert_eq!(parse(json!(213.0)).duration, Some(213));
        assert_eq!(parse(json!(213.9)).duration, Some(213));
        assert_eq!(parse(json!(0.5)).duration, None);
        assert_eq!(parse(json!(-1.5)).duration, None);
        assert_eq!(parse(Value::Null).duration, None);
    }

    #[test]
    fn test_deserialize_requires_audio_url() {
        let result: Result<Track, _> =
            serde_json::from_value(json!({ "title": "x", "audio_url": "" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let track = Track::new("Song", "a")
            .unwrap()
            .with_duration(10)
            .with_requester(Requester::new(1, "alice"))
            .with_metadata("source", json!("youtube"));
        let value = serde_json::to_value(&track).unwrap();

        assert_eq!(value["requester_id"], json!(1));
        assert_eq!(value["requester_name"], json!("alice"));
        assert_eq!(value["duration"], json!(10));
        assert_eq!(value["metadata"]["source"], json!("youtube"));
        assert!(value.get("requester").is_none());
    }
}
