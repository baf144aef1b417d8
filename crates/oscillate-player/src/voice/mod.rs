//! Voice connection seam
//!
//! Players never speak the voice protocol themselves. They hand 20 ms PCM
//! frames to a [`VoiceConnection`] obtained from a [`VoiceConnector`]:
//! - [`null::NullVoiceConnector`] paces frames in real time and drops them
//! - [`mock::MockVoiceConnector`] records frames for tests

pub mod mock;
pub mod null;

use std::sync::Arc;

use async_trait::async_trait;
use oscillate_core::{ChannelId, GuildId};

use crate::error::PlayerResult;

/// An established voice connection for one guild
#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn guild_id(&self) -> GuildId;

    fn channel_id(&self) -> ChannelId;

    fn is_connected(&self) -> bool;

    /// Switch to another channel of the same guild
    async fn move_to(&self, channel_id: ChannelId) -> PlayerResult<()>;

    /// Deliver one frame. Implementations pace delivery in real time.
    async fn send_frame(&self, frame: &[i16]) -> PlayerResult<()>;

    async fn disconnect(&self) -> PlayerResult<()>;
}

/// Opens voice connections
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Arc<dyn VoiceConnection>>;
}
