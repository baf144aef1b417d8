//! ffmpeg command construction and process management
//!
//! The decode pipeline always produces signed 16-bit little endian stereo
//! PCM at 48 kHz on stdout, in 20 ms frames of [`FRAME_BYTES`] bytes.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{OscillateError, OscillateResult};

/// Output sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48_000;
/// Output channel count
pub const CHANNELS: u32 = 2;
/// Duration of one PCM frame
pub const FRAME_DURATION: Duration = Duration::from_millis(20);
/// Bytes in one 20 ms s16le stereo frame
pub const FRAME_BYTES: usize = (SAMPLE_RATE as usize / 50) * CHANNELS as usize * 2;

const DEFAULT_EXECUTABLE: &str = "ffmpeg";
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const FFPROBE_TIMEOUT: Duration = Duration::from_secs(10);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Substrings never allowed in before-options
const DANGEROUS_PATTERNS: [&str; 9] = ["-f null", "-y /", "rm ", "del ", ";", "&", "|", "$(", "`"];

/// Arguments placed around the input of an ffmpeg invocation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfmpegArgs {
    /// Input options, placed before `-i`
    #[serde(default)]
    pub before_options: String,
    /// Output options, placed after the input
    #[serde(default)]
    pub options: String,
}

impl FfmpegArgs {
    pub fn new(before_options: impl Into<String>, options: impl Into<String>) -> Self {
        Self {
            before_options: before_options.into(),
            options: options.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.before_options.trim().is_empty() && self.options.trim().is_empty()
    }

    /// Append `other` after `self`, part by part
    pub fn merge(&self, other: &FfmpegArgs) -> FfmpegArgs {
        FfmpegArgs {
            before_options: join_parts(&self.before_options, &other.before_options),
            options: join_parts(&self.options, &other.options),
        }
    }
}

fn join_parts(a: &str, b: &str) -> String {
    [a.trim(), b.trim()]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reconnecting input options and bitrate-limited output options
pub fn transcode_args(bitrate: u32) -> FfmpegArgs {
    FfmpegArgs {
        before_options: "-reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 5 -nostdin"
            .to_string(),
        options: format!("-vn -b:a {}k -threads 1", bitrate / 1000),
    }
}

/// Remove shell-like or destructive fragments from the before-options and
/// make sure video is disabled on the output side.
pub fn validate_args(args: &FfmpegArgs) -> FfmpegArgs {
    let mut before = args.before_options.clone();
    for pattern in DANGEROUS_PATTERNS {
        if before.to_ascii_lowercase().contains(pattern) {
            warn!(pattern, "Removed dangerous pattern from before_options");
            before = remove_ignore_ascii_case(&before, pattern);
        }
    }

    let mut options = args.options.trim().to_string();
    if !options.is_empty() && !options.split_whitespace().any(|token| token == "-vn") {
        options = format!("-vn {}", options);
    }

    FfmpegArgs {
        before_options: before.trim().to_string(),
        options,
    }
}

fn remove_ignore_ascii_case(haystack: &str, pattern: &str) -> String {
    let lowered = haystack.to_ascii_lowercase();
    let mut out = String::with_capacity(haystack.len());
    let mut cursor = 0;
    while let Some(found) = lowered[cursor..].find(pattern) {
        let start = cursor + found;
        out.push_str(&haystack[cursor..start]);
        cursor = start + pattern.len();
    }
    out.push_str(&haystack[cursor..]);
    out
}

/// Full argv for decoding `input` to raw PCM on stdout
pub fn build_command(input: &str, args: &FfmpegArgs, executable: Option<&str>) -> Vec<String> {
    let mut command = vec![executable.unwrap_or(DEFAULT_EXECUTABLE).to_string()];
    command.extend(args.before_options.split_whitespace().map(str::to_string));
    command.push("-i".to_string());
    command.push(input.to_string());
    command.extend(args.options.split_whitespace().map(str::to_string));
    command.extend(
        [
            "-f",
            "s16le",
            "-ar",
            "48000",
            "-ac",
            "2",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    command
}

/// Whether ffmpeg runs, and its version when it does
pub async fn check_availability(executable: Option<&str>) -> (bool, Option<String>) {
    let executable = executable.unwrap_or(DEFAULT_EXECUTABLE);
    let output = Command::new(executable)
        .arg("-version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match timeout(VERSION_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            (true, Some(parse_version(&stdout)))
        }
        Ok(Ok(_)) => (false, None),
        Ok(Err(e)) => {
            debug!(executable, error = %e, "ffmpeg not runnable");
            (false, None)
        }
        Err(_) => {
            warn!(executable, "ffmpeg -version timed out");
            (false, None)
        }
    }
}

fn parse_version(stdout: &str) -> String {
    stdout
        .lines()
        .find(|line| line.starts_with("ffmpeg version"))
        .and_then(|line| line.split_whitespace().nth(2))
        .unwrap_or("unknown")
        .to_string()
}

/// Run a one second synthetic source through ffmpeg into the null muxer
pub async fn probe_pipeline(executable: Option<&str>) -> bool {
    let executable = executable.unwrap_or(DEFAULT_EXECUTABLE);
    let status = Command::new(executable)
        .args([
            "-f",
            "lavfi",
            "-i",
            "testsrc2=duration=1:size=320x240:rate=30",
            "-f",
            "null",
            "-",
        ])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match timeout(PROBE_TIMEOUT, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(executable, error = %e, "ffmpeg pipeline probe failed to start");
            false
        }
        Err(_) => {
            warn!(executable, "ffmpeg pipeline probe timed out");
            false
        }
    }
}

/// Stream properties reported by ffprobe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    /// Seconds
    pub duration: Option<f64>,
    /// Bits per second
    pub bitrate: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub codec: Option<String>,
}

/// Probe a file or URL; `None` when ffprobe fails
///
/// ffprobe is located next to `ffmpeg_path` when one is given.
pub async fn audio_info(file: &str, ffmpeg_path: Option<&str>) -> Option<AudioInfo> {
    let ffprobe = ffmpeg_path
        .map(|p| p.replace("ffmpeg", "ffprobe"))
        .unwrap_or_else(|| "ffprobe".to_string());

    let output = Command::new(&ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            file,
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match timeout(FFPROBE_TIMEOUT, output).await {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(_)) => return None,
        Ok(Err(e)) => {
            debug!(ffprobe = %ffprobe, error = %e, "ffprobe not runnable");
            return None;
        }
        Err(_) => {
            warn!(ffprobe = %ffprobe, "ffprobe timed out");
            return None;
        }
    };

    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(data) => Some(parse_probe(&data)),
        Err(e) => {
            warn!(error = %e, "Unparseable ffprobe output");
            None
        }
    }
}

/// ffprobe reports most numbers as strings
fn number<T: std::str::FromStr>(value: Option<&Value>) -> Option<T> {
    match value? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

fn parse_probe(data: &Value) -> AudioInfo {
    let mut info = AudioInfo::default();

    if let Some(format) = data.get("format") {
        info.duration = Some(number(format.get("duration")).unwrap_or(0.0));
        info.bitrate = Some(number(format.get("bit_rate")).unwrap_or(0));
    }

    let audio = data
        .get("streams")
        .and_then(Value::as_array)
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s.get("codec_type").and_then(Value::as_str) == Some("audio"))
        });

    if let Some(stream) = audio {
        info.sample_rate = Some(number(stream.get("sample_rate")).unwrap_or(0));
        info.channels = Some(number(stream.get("channels")).unwrap_or(0));
        info.codec = stream
            .get("codec_name")
            .and_then(Value::as_str)
            .map(str::to_string);
    }

    info
}

/// A running ffmpeg child with its stdout piped
pub struct FfmpegProcess {
    command: Vec<String>,
    child: Option<Child>,
    exit_status: Option<ExitStatus>,
}

impl FfmpegProcess {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            child: None,
            exit_status: None,
        }
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Spawn the process. stdin and stderr are discarded.
    pub fn start(&mut self) -> OscillateResult<()> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| OscillateError::Ffmpeg("Empty ffmpeg command".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OscillateError::Ffmpeg(format!("Failed to start FFmpeg process: {}", e))
            })?;

        debug!(pid = ?child.id(), "Started ffmpeg");
        self.child = Some(child);
        self.exit_status = None;
        Ok(())
    }

    /// Take ownership of the PCM output pipe
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|c| c.stdout.take())
    }

    /// Terminate gracefully, then kill if the process lingers
    pub async fn stop(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        if let Ok(Some(status)) = child.try_wait() {
            self.exit_status = Some(status);
            return;
        }

        terminate(child).await;
        if let Ok(Ok(status)) = timeout(TERMINATE_GRACE, child.wait()).await {
            self.exit_status = Some(status);
            return;
        }

        if let Err(e) = child.start_kill() {
            warn!(error = %e, "Failed to kill ffmpeg");
        }
        match timeout(KILL_GRACE, child.wait()).await {
            Ok(Ok(status)) => self.exit_status = Some(status),
            _ => warn!("ffmpeg did not exit after kill"),
        }
    }

    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(status)) => {
                    self.exit_status = Some(status);
                    false
                }
                Ok(None) => true,
                Err(_) => false,
            },
            None => false,
        }
    }

    /// Exit code once the process has finished
    pub fn return_code(&mut self) -> Option<i32> {
        if self.exit_status.is_none() {
            self.is_running();
        }
        self.exit_status.and_then(|s| s.code())
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let sent = Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = sent {
        debug!(pid, error = %e, "SIGTERM failed, killing ffmpeg");
        let _ = child.start_kill();
    }
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_size() {
        assert_eq!(FRAME_BYTES, 3840);
    }

    #[test]
    fn test_transcode_args() {
        let args = transcode_args(128_000);
        assert_eq!(
            args.before_options,
            "-reconnect 1 -reconnect_streamed 1 -reconnect_delay_max 5 -nostdin"
        );
        assert_eq!(args.options, "-vn -b:a 128k -threads 1");
    }

    #[test]
    fn test_merge_skips_empty_parts() {
        let merged = transcode_args(256_000).merge(&FfmpegArgs::new("", "-af atempo=1.5"));
        assert!(merged.before_options.ends_with("-nostdin"));
        assert_eq!(merged.options, "-vn -b:a 256k -threads 1 -af atempo=1.5");
    }

    #[test]
    fn test_validate_strips_dangerous_patterns() {
        let args = FfmpegArgs::new("-ss 10; RM -rf / | cat", "-af volume=2");
        let validated = validate_args(&args);
        assert_eq!(validated.before_options, "-ss 10 -rf /  cat");
        assert_eq!(validated.options, "-vn -af volume=2");

        let untouched = validate_args(&FfmpegArgs::new("", "-vn -b:a 64k"));
        assert_eq!(untouched.options, "-vn -b:a 64k");
        assert_eq!(untouched.before_options, "");
    }

    #[test]
    fn test_build_command() {
        let args = FfmpegArgs::new("-nostdin", "-vn -af atempo=1.25");
        let command = build_command("https://cdn.example/a.webm", &args, Some("/usr/bin/ffmpeg"));
        assert_eq!(
            command,
            vec![
                "/usr/bin/ffmpeg",
                "-nostdin",
                "-i",
                "https://cdn.example/a.webm",
                "-vn",
                "-af",
                "atempo=1.25",
                "-f",
                "s16le",
                "-ar",
                "48000",
                "-ac",
                "2",
                "pipe:1"
            ]
        );
        assert_eq!(build_command("x", &FfmpegArgs::default(), None)[0], "ffmpeg");
    }

    #[test]
    fn test_parse_version() {
        let stdout = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc";
        assert_eq!(parse_version(stdout), "6.1.1-3ubuntu5");
        assert_eq!(parse_version("something else"), "unknown");
    }

    #[test]
    fn test_parse_probe() {
        let data = json!({
            "format": {"duration": "183.4", "bit_rate": "160000"},
            "streams": [
                {"codec_type": "video", "codec_name": "vp9"},
                {"codec_type": "audio", "codec_name": "opus", "sample_rate": "48000", "channels": 2}
            ]
        });
        let info = parse_probe(&data);
        assert_eq!(info.duration, Some(183.4));
        assert_eq!(info.bitrate, Some(160_000));
        assert_eq!(info.sample_rate, Some(48_000));
        assert_eq!(info.channels, Some(2));
        assert_eq!(info.codec.as_deref(), Some("opus"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let (available, version) =
            check_availability(Some("/nonexistent/oscillate-ffmpeg")).await;
        assert!(!available);
        assert!(version.is_none());
        assert!(!probe_pipeline(Some("/nonexistent/oscillate-ffmpeg")).await);
    }

    #[test]
    fn test_start_empty_command_fails() {
        let mut process = FfmpegProcess::new(Vec::new());
        assert!(matches!(process.start(), Err(OscillateError::Ffmpeg(_))));
        assert!(!process.is_running());
        assert_eq!(process.return_code(), None);
    }
}
