//! Audio manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PlayerError, PlayerResult};

/// Configuration for [`crate::AudioManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum concurrent ffmpeg decoders
    pub max_ffmpeg_procs: usize,
    /// Seconds a connected, silent player may stay before it is stopped
    pub idle_timeout: u64,
    /// Seconds between automatic state saves
    pub autosave_interval: u64,
    /// Fade out duration (seconds) used when skipping
    pub crossfade_duration: f64,
    /// Maximum cached track metadata entries
    pub cache_size: usize,
    /// Maximum queued tracks per guild
    pub max_queue_size: usize,
    /// Collect metrics
    pub enable_metrics: bool,
    /// ffmpeg executable
    pub ffmpeg_path: String,
    /// Seconds between idle checks
    pub idle_check_interval: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_ffmpeg_procs: 4,
            idle_timeout: 300,
            autosave_interval: 30,
            crossfade_duration: 3.0,
            cache_size: 200,
            max_queue_size: 1000,
            enable_metrics: true,
            ffmpeg_path: "ffmpeg".to_string(),
            idle_check_interval: 10,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> PlayerResult<()> {
        if self.max_ffmpeg_procs == 0 {
            return Err(PlayerError::Config(
                "max_ffmpeg_procs must be at least 1".to_string(),
            ));
        }
        if self.max_queue_size == 0 {
            return Err(PlayerError::Config(
                "max_queue_size must be at least 1".to_string(),
            ));
        }
        if self.autosave_interval == 0 || self.idle_check_interval == 0 {
            return Err(PlayerError::Config(
                "autosave_interval and idle_check_interval must be positive".to_string(),
            ));
        }
        if !self.crossfade_duration.is_finite() || self.crossfade_duration < 0.0 {
            return Err(PlayerError::Config(format!(
                "crossfade_duration must be a non-negative number, got {}",
                self.crossfade_duration
            )));
        }
        if self.ffmpeg_path.trim().is_empty() {
            return Err(PlayerError::Config("ffmpeg_path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn autosave_period(&self) -> Duration {
        Duration::from_secs(self.autosave_interval)
    }

    pub fn idle_check_period(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_ffmpeg_procs, 4);
        assert_eq!(config.idle_timeout, 300);
        assert_eq!(config.crossfade_duration, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{"max_ffmpeg_procs": 8, "enable_metrics": false}"#).unwrap();
        assert_eq!(config.max_ffmpeg_procs, 8);
        assert!(!config.enable_metrics);
        assert_eq!(config.cache_size, 200);
    }

    #[test]
    fn test_validation() {
        let config = ManagerConfig {
            max_ffmpeg_procs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ManagerConfig {
            crossfade_duration: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
