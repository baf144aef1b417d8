//! PCM sources feeding the players
//!
//! A [`SourceFactory`] turns a track plus ffmpeg arguments into a
//! [`PcmSource`] yielding 20 ms frames. Production uses
//! [`FfmpegSourceFactory`]; tests plug in their own factories.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use oscillate_core::ffmpeg::{build_command, FfmpegProcess, FRAME_BYTES};
use oscillate_core::{FfmpegArgs, Track};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdout;
use tracing::{debug, warn};

use crate::error::{PlayerError, PlayerResult};

/// A stream of interleaved stereo s16 frames
#[async_trait]
pub trait PcmSource: Send {
    /// Next frame, or `None` at end of stream
    async fn next_frame(&mut self) -> PlayerResult<Option<Vec<i16>>>;

    /// Release the underlying decoder
    async fn close(&mut self);
}

/// Opens PCM sources for tracks
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, track: &Track, args: &FfmpegArgs) -> PlayerResult<Box<dyn PcmSource>>;
}

/// Spawns one ffmpeg decoder per track
#[derive(Debug, Clone)]
pub struct FfmpegSourceFactory {
    executable: String,
}

impl FfmpegSourceFactory {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }
}

#[async_trait]
impl SourceFactory for FfmpegSourceFactory {
    async fn open(&self, track: &Track, args: &FfmpegArgs) -> PlayerResult<Box<dyn PcmSource>> {
        let command = build_command(&track.audio_url, args, Some(&self.executable));
        debug!(command = ?command, "Opening ffmpeg source");

        let mut process = FfmpegProcess::new(command);
        process.start()?;
        let stdout = process
            .take_stdout()
            .ok_or_else(|| PlayerError::Source("ffmpeg stdout unavailable".to_string()))?;

        Ok(Box::new(FfmpegSource {
            process,
            stdout,
            buffer: vec![0u8; FRAME_BYTES],
            produced: false,
            finished: false,
        }))
    }
}

/// Reads s16le PCM from a running ffmpeg process
pub struct FfmpegSource {
    process: FfmpegProcess,
    stdout: ChildStdout,
    buffer: Vec<u8>,
    produced: bool,
    finished: bool,
}

impl FfmpegSource {
    /// Fill the frame buffer; returns the number of bytes read
    async fn fill(&mut self) -> PlayerResult<usize> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            let read = self
                .stdout
                .read(&mut self.buffer[filled..])
                .await
                .map_err(|e| PlayerError::Source(format!("Failed to read ffmpeg output: {}", e)))?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }
}

#[async_trait]
impl PcmSource for FfmpegSource {
    async fn next_frame(&mut self) -> PlayerResult<Option<Vec<i16>>> {
        if self.finished {
            return Ok(None);
        }

        let filled = self.fill().await?;
        if filled == 0 {
            self.finished = true;
            self.process.stop().await;
            if !self.produced {
                if let Some(code) = self.process.return_code().filter(|c| *c != 0) {
                    return Err(PlayerError::Source(format!(
                        "ffmpeg exited with status {} before producing audio",
                        code
                    )));
                }
            }
            return Ok(None);
        }

        // Partial trailing frame is padded with silence
        self.buffer[filled..].fill(0);
        self.produced = true;
        Ok(Some(decode_frame(&self.buffer)))
    }

    async fn close(&mut self) {
        self.finished = true;
        self.process.stop().await;
    }
}

/// Little endian bytes to samples
pub fn decode_frame(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Scale samples in place, saturating at the i16 range
pub fn apply_gain(frame: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in frame.iter_mut() {
        let scaled = (*sample as f32 * gain).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

/// Volume shared between a player and its playback task.
///
/// Holds the user volume and a fade multiplier used while skipping or
/// stopping; the effective gain is their product.
#[derive(Debug, Clone)]
pub struct VolumeHandle {
    volume: Arc<AtomicU32>,
    fade: Arc<AtomicU32>,
}

impl VolumeHandle {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: Arc::new(AtomicU32::new(volume.to_bits())),
            fade: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn fade(&self) -> f32 {
        f32::from_bits(self.fade.load(Ordering::Relaxed))
    }

    pub fn set_fade(&self, fade: f32) {
        self.fade.store(fade.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        self.volume() * self.fade()
    }
}

/// Source over an in-memory list of frames
pub struct StaticSource {
    frames: std::collections::VecDeque<Vec<i16>>,
}

impl StaticSource {
    pub fn new(frames: Vec<Vec<i16>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    /// `count` frames of a constant sample value
    pub fn constant(count: usize, value: i16) -> Self {
        Self::new(vec![vec![value; FRAME_BYTES / 2]; count])
    }
}

#[async_trait]
impl PcmSource for StaticSource {
    async fn next_frame(&mut self) -> PlayerResult<Option<Vec<i16>>> {
        Ok(self.frames.pop_front())
    }

    async fn close(&mut self) {
        if !self.frames.is_empty() {
            warn!(remaining = self.frames.len(), "Static source closed early");
        }
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_frame() {
        let bytes = [0x01, 0x00, 0xff, 0xff, 0x00, 0x80];
        assert_eq!(decode_frame(&bytes), vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_apply_gain_saturates() {
        let mut frame = vec![1000, -1000, 30000, -30000];
        apply_gain(&mut frame, 2.0);
        assert_eq!(frame, vec![2000, -2000, i16::MAX, i16::MIN]);

        let mut frame = vec![1000, 3];
        apply_gain(&mut frame, 0.0);
        assert_eq!(frame, vec![0, 0]);
    }

    #[test]
    fn test_volume_handle() {
        let handle = VolumeHandle::new(0.5);
        let shared = handle.clone();
        shared.set_fade(0.5);
        assert_eq!(handle.gain(), 0.25);
        handle.set_fade(4.0);
        assert_eq!(shared.fade(), 1.0);
    }

    #[tokio::test]
    async fn test_static_source_drains() {
        let mut source = StaticSource::constant(2, 7);
        assert_eq!(source.next_frame().await.unwrap().unwrap().len(), FRAME_BYTES / 2);
        assert!(source.next_frame().await.unwrap().is_some());
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails_to_open() {
        let factory = FfmpegSourceFactory::new("/nonexistent/ffmpeg-binary");
        let track = Track::new("Song", "https://cdn.example/a.opus").unwrap();
        let result = factory.open(&track, &FfmpegArgs::default()).await;
        assert!(matches!(result, Err(PlayerError::Core(_))));
    }
}
