//! Daemon configuration
//!
//! Read from an optional TOML file:
//!
//! ```toml
//! [manager]
//! max_ffmpeg_procs = 4
//! idle_timeout = 300
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8000
//!
//! [storage]
//! db_path = "data/oscillate.db"
//!
//! [logging]
//! level = "info"
//! format = "text"
//! ```
//!
//! Command line flags and `OSCILLATE_*` variables override file values.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use oscillate_player::ManagerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub manager: ManagerConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/oscillate.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl DaemonConfig {
    /// Load a config file; missing sections fall back to defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.manager.validate()?;
        self.server
            .host
            .parse::<IpAddr>()
            .with_context(|| format!("server.host is not an IP address: {}", self.server.host))?;
        Ok(())
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .with_context(|| format!("server.host is not an IP address: {}", self.server.host))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Filter directives used when `RUST_LOG` is unset
    pub fn default_log_filter(&self) -> String {
        let level = &self.logging.level;
        format!(
            "oscillated={level},oscillate_player={level},oscillate_core={level},tower_http=warn"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.listen_addr().unwrap().to_string(), "0.0.0.0:8000");
    }

    #[test]
    fn test_partial_sections() {
        let config = DaemonConfig::parse(
            r#"
            [manager]
            max_ffmpeg_procs = 8
            idle_timeout = 60

            [server]
            port = 9000

            [storage]
            db_path = "/var/lib/oscillate/state.db"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.manager.max_ffmpeg_procs, 8);
        assert_eq!(config.manager.idle_timeout, 60);
        assert_eq!(config.manager.autosave_interval, 30);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(
            config.storage.db_path,
            PathBuf::from("/var/lib/oscillate/state.db")
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_manager_rejected() {
        let err = DaemonConfig::parse("[manager]\nmax_ffmpeg_procs = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_ffmpeg_procs"));
    }

    #[test]
    fn test_invalid_host_rejected() {
        assert!(DaemonConfig::parse("[server]\nhost = \"not an ip\"\n").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oscillated.toml");
        std::fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert!(config.default_log_filter().starts_with("oscillated=debug"));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = DaemonConfig::load(Path::new("/nonexistent/oscillated.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
