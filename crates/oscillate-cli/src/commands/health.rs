//! Container probes: `health` and `ready`

use std::fs::OpenOptions;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use oscillate_core::{ffmpeg, FilterChain};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn readiness_message() -> String {
    format!("oscillate {} ready", oscillate_core::VERSION)
}

const CHECK_INPUT: &str = "https://cdn.example/health.opus";
const CHECK_FILE: &str = ".oscillate-health";

/// Print `OK` when the engine library is usable, the database directory is
/// writable and, with a server URL, when the daemon answers its health
/// endpoint
pub async fn health(server: Option<&str>, db_path: Option<&Path>) -> Result<()> {
    self_check()?;
    if let Some(db_path) = db_path {
        check_data_dir(db_path)?;
    }

    if let Some(server) = server {
        check_daemon(server).await?;
    }

    println!("OK");
    Ok(())
}

/// Print the readiness line. Starts nothing.
pub fn ready() {
    println!("{}", readiness_message());
}

/// The default transcode arguments must survive validation untouched and
/// produce a complete PCM command line
fn self_check() -> Result<()> {
    let args = ffmpeg::transcode_args(128_000);
    let validated = ffmpeg::validate_args(&args);
    if validated != args {
        bail!(
            "Default transcode arguments were rewritten by validation: {:?}",
            validated
        );
    }

    let args = validated.merge(&FilterChain::new().combined_args());
    let command = ffmpeg::build_command(CHECK_INPUT, &args, None);
    check_command(&command)
}

fn check_command(command: &[String]) -> Result<()> {
    let has = |flag: &str| command.iter().any(|arg| arg == flag);
    let input = command
        .iter()
        .position(|arg| arg == "-i")
        .and_then(|i| command.get(i + 1));
    if input.map(String::as_str) != Some(CHECK_INPUT) {
        bail!("ffmpeg command does not read the track URL");
    }
    if !has("-vn") {
        bail!("ffmpeg command does not disable video");
    }
    if command.last().map(String::as_str) != Some("pipe:1") || !has("s16le") {
        bail!("ffmpeg command does not write PCM to stdout");
    }
    Ok(())
}

/// The directory holding the database must accept new files
fn check_data_dir(db_path: &Path) -> Result<()> {
    let dir = match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let check_file = dir.join(CHECK_FILE);
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&check_file)
        .with_context(|| format!("Data directory is not writable: {}", dir.display()))?;
    std::fs::remove_file(&check_file)
        .with_context(|| format!("Failed to clean up {}", check_file.display()))?;
    Ok(())
}

async fn check_daemon(server: &str) -> Result<()> {
    let url = format!("{}/health", server.trim_end_matches('/'));
    tracing::debug!(%url, "Probing daemon");

    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")?;
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Daemon unreachable at {}", url))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if !status.is_success() || body.trim() != "OK" {
        bail!("Daemon unhealthy at {}: {} {}", url, status, body.trim());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_message() {
        assert_eq!(
            readiness_message(),
            format!("oscillate {} ready", env!("CARGO_PKG_VERSION"))
        );
    }

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_self_check_passes() {
        self_check().unwrap();
    }

    #[test]
    fn test_incomplete_command_fails() {
        let no_video_flag = command(&["ffmpeg", "-i", CHECK_INPUT, "-f", "s16le", "pipe:1"]);
        let err = check_command(&no_video_flag).unwrap_err();
        assert!(err.to_string().contains("disable video"));

        let no_output = command(&["ffmpeg", "-i", CHECK_INPUT, "-vn", "-f", "s16le"]);
        let err = check_command(&no_output).unwrap_err();
        assert!(err.to_string().contains("PCM"));

        let no_input = command(&["ffmpeg", "-vn", "-f", "s16le", "pipe:1"]);
        assert!(check_command(&no_input).is_err());
    }

    #[test]
    fn test_writable_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        check_data_dir(&dir.path().join("oscillate.db")).unwrap();
        assert!(!dir.path().join(CHECK_FILE).exists());
    }

    #[test]
    fn test_missing_data_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("missing").join("oscillate.db");

        let err = check_data_dir(&db_path).unwrap_err();
        assert!(err.to_string().contains("not writable"));
    }

    #[tokio::test]
    async fn test_unreachable_daemon_fails() {
        let err = health(Some("http://127.0.0.1:1"), None).await.unwrap_err();
        assert!(err.to_string().contains("Daemon unreachable"));
    }
}
