//! oscillate-player - Async playback runtime for oscillate
//!
//! This crate provides:
//! - [`AudioManager`]: one player per guild, shared ffmpeg slots, adaptive
//!   bitrate, autosave and idle disconnect loops, lifecycle events
//! - [`GuildPlayer`]: queue processing, filters, volume, pause/resume,
//!   skip with fade out, state persistence
//! - The voice and PCM source seams ([`VoiceConnector`], [`SourceFactory`])

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod player;
pub mod source;
pub mod voice;

pub use cache::TrackCache;
pub use config::ManagerConfig;
pub use error::{PlayerError, PlayerResult};
pub use events::PlayerEvent;
pub use manager::AudioManager;
pub use player::{GuildPlayer, PlayerState, PlayerStatus};
pub use source::{FfmpegSourceFactory, PcmSource, SourceFactory, StaticSource, VolumeHandle};
pub use voice::mock::MockVoiceConnector;
pub use voice::null::NullVoiceConnector;
pub use voice::{VoiceConnection, VoiceConnector};
