//! oscillate-core - Core types for the oscillate audio engine
//!
//! This crate provides:
//! - Track and queue models
//! - Audio filters rendered as ffmpeg arguments
//! - ffmpeg process helpers and libopus discovery
//! - Engine metrics
//! - The persistence trait with SQLite and in-memory backends

pub mod error;
pub mod ffmpeg;
pub mod filters;
pub mod metrics;
pub mod opus;
pub mod queue;
pub mod store;
pub mod track;

/// Discord guild (server) ID
pub type GuildId = u64;

/// Discord voice channel ID
pub type ChannelId = u64;

pub use error::{OscillateError, OscillateResult};
pub use ffmpeg::FfmpegArgs;
pub use filters::{AudioEffect, Effect, Filter, FilterChain};
pub use crate::metrics::{Metrics, MetricsSnapshot};
pub use queue::{AudioQueue, LoopMode, QueueState};
pub use store::{GuildStats, HistoryEntry, MemoryStore, SqliteStore, StateStore};
pub use track::{Requester, Track};

/// Package version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
