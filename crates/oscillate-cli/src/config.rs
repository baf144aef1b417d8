//! Configuration file handling for the oscillate CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

pub const DEFAULT_DB_PATH: &str = "oscillate.db";
pub const DEFAULT_SERVER: &str = "http://localhost:8000";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Default database file
    pub db_path: Option<PathBuf>,
    /// Default output format
    pub output: Option<OutputFormat>,
    /// Disable colored output
    pub no_color: Option<bool>,
    /// Daemon URL used by `health --server` without a value
    pub server: Option<String>,
    /// ffmpeg executable used by `diagnose`
    pub ffmpeg_path: Option<String>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// `~/.config/oscillate/config.toml` on Linux
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("oscillate");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        db_path: Option<&Path>,
        output: Option<OutputFormat>,
        no_color: bool,
    ) -> MergedConfig {
        MergedConfig {
            db_path: db_path
                .map(Path::to_path_buf)
                .or_else(|| self.db_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            output: output.or(self.output).unwrap_or_default(),
            no_color: no_color || self.no_color.unwrap_or(false),
            server: self
                .server
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVER.to_string()),
            ffmpeg_path: self.ffmpeg_path.clone(),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    pub db_path: PathBuf,
    pub output: OutputFormat,
    pub no_color: bool,
    pub server: String,
    pub ffmpeg_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_file() {
        let merged = Config::default().merge_with_args(None, None, false);
        assert_eq!(
            merged,
            MergedConfig {
                db_path: PathBuf::from(DEFAULT_DB_PATH),
                output: OutputFormat::Table,
                no_color: false,
                server: DEFAULT_SERVER.to_string(),
                ffmpeg_path: None,
            }
        );
    }

    #[test]
    fn test_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "db_path = \"/srv/oscillate.db\"\noutput = \"json\"\nffmpeg_path = \"/opt/ffmpeg\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.output, Some(OutputFormat::Json));

        let merged = config.merge_with_args(None, None, false);
        assert_eq!(merged.db_path, PathBuf::from("/srv/oscillate.db"));
        assert_eq!(merged.output, OutputFormat::Json);
        assert_eq!(merged.ffmpeg_path.as_deref(), Some("/opt/ffmpeg"));

        let merged = config.merge_with_args(
            Some(Path::new("local.db")),
            Some(OutputFormat::Table),
            true,
        );
        assert_eq!(merged.db_path, PathBuf::from("local.db"));
        assert_eq!(merged.output, OutputFormat::Table);
        assert!(merged.no_color);
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "output = \"xml\"\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
