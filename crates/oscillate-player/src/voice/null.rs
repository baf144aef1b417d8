//! Voice connector that discards audio

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use oscillate_core::ffmpeg::FRAME_DURATION;
use oscillate_core::{ChannelId, GuildId};
use tokio::sync::Mutex;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::info;

use super::{VoiceConnection, VoiceConnector};
use crate::error::{PlayerError, PlayerResult};

/// Connector for running the engine without a voice gateway.
///
/// Frames are consumed at real-time speed so playback timing, idle
/// detection and metrics behave as they would on a live connection.
#[derive(Debug, Default)]
pub struct NullVoiceConnector;

impl NullVoiceConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VoiceConnector for NullVoiceConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Arc<dyn VoiceConnection>> {
        info!(guild_id, channel_id, "Null voice connection opened");
        Ok(Arc::new(NullVoiceConnection::new(guild_id, channel_id)))
    }
}

pub struct NullVoiceConnection {
    guild_id: GuildId,
    channel_id: AtomicU64,
    connected: AtomicBool,
    pacer: Mutex<Interval>,
}

impl NullVoiceConnection {
    fn new(guild_id: GuildId, channel_id: ChannelId) -> Self {
        let mut pacer = interval(FRAME_DURATION);
        pacer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            guild_id,
            channel_id: AtomicU64::new(channel_id),
            connected: AtomicBool::new(true),
            pacer: Mutex::new(pacer),
        }
    }
}

#[async_trait]
impl VoiceConnection for NullVoiceConnection {
    fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    fn channel_id(&self) -> ChannelId {
        self.channel_id.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn move_to(&self, channel_id: ChannelId) -> PlayerResult<()> {
        if !self.is_connected() {
            return Err(PlayerError::NotConnected);
        }
        self.channel_id.store(channel_id, Ordering::SeqCst);
        Ok(())
    }

    async fn send_frame(&self, _frame: &[i16]) -> PlayerResult<()> {
        if !self.is_connected() {
            return Err(PlayerError::NotConnected);
        }
        self.pacer.lock().await.tick().await;
        Ok(())
    }

    async fn disconnect(&self) -> PlayerResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        info!(guild_id = self.guild_id, "Null voice connection closed");
        Ok(())
    }
}
