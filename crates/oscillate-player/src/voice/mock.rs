//! Mock voice connector for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oscillate_core::{ChannelId, GuildId};
use parking_lot::RwLock;

use super::{VoiceConnection, VoiceConnector};
use crate::error::{PlayerError, PlayerResult};

/// Mock connector. Keeps every connection it opened so tests can inspect
/// what was sent.
#[derive(Default)]
pub struct MockVoiceConnector {
    pacing: Option<Duration>,
    fail_connect: AtomicBool,
    connections: RwLock<HashMap<GuildId, Arc<MockVoiceConnection>>>,
}

impl MockVoiceConnector {
    /// Frames are accepted immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame takes `pacing` to send
    pub fn paced(pacing: Duration) -> Self {
        Self {
            pacing: Some(pacing),
            ..Self::default()
        }
    }

    /// Make subsequent connects fail
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Most recent connection for a guild
    pub fn connection(&self, guild_id: GuildId) -> Option<Arc<MockVoiceConnection>> {
        self.connections.read().get(&guild_id).cloned()
    }

    pub fn connect_count(&self) -> usize {
        self.connections.read().len()
    }
}

#[async_trait]
impl VoiceConnector for MockVoiceConnector {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> PlayerResult<Arc<dyn VoiceConnection>> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(PlayerError::Voice(format!(
                "Mock connect to channel {} refused",
                channel_id
            )));
        }

        let connection = Arc::new(MockVoiceConnection {
            guild_id,
            channel_id: AtomicU64::new(channel_id),
            connected: AtomicBool::new(true),
            pacing: self.pacing,
            frames: AtomicUsize::new(0),
            last_frame: RwLock::new(Vec::new()),
            moves: RwLock::new(Vec::new()),
        });
        self.connections.write().insert(guild_id, connection.clone());
        Ok(connection)
    }
}

/// Connection that counts frames and remembers the last one
pub struct MockVoiceConnection {
    guild_id: GuildId,
    channel_id: AtomicU64,
    connected: AtomicBool,
    pacing: Option<Duration>,
    frames: AtomicUsize,
    last_frame: RwLock<Vec<i16>>,
    moves: RwLock<Vec<ChannelId>>,
}

impl MockVoiceConnection {
    pub fn frames_sent(&self) -> usize {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Vec<i16> {
        self.last_frame.read().clone()
    }

    /// Channels moved to, in order
    pub fn moves(&self) -> Vec<ChannelId> {
        self.moves.read().clone()
    }
}

#[async_trait]
impl VoiceConnection for MockVoiceConnection {
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
        self.moves.write().push(channel_id);
        Ok(())
    }

    async fn send_frame(&self, frame: &[i16]) -> PlayerResult<()> {
        if !self.is_connected() {
            return Err(PlayerError::NotConnected);
        }
        if let Some(pacing) = self.pacing {
            tokio::time::sleep(pacing).await;
        } else {
            tokio::task::yield_now().await;
        }
        *self.last_frame.write() = frame.to_vec();
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> PlayerResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_frames_and_moves() {
        let connector = MockVoiceConnector::new();
        let connection = connector.connect(1, 10).await.unwrap();
        connection.send_frame(&[1, 2, 3, 4]).await.unwrap();
        connection.send_frame(&[5, 6]).await.unwrap();
        connection.move_to(11).await.unwrap();

        let mock = connector.connection(1).unwrap();
        assert_eq!(mock.frames_sent(), 2);
        assert_eq!(mock.last_frame(), vec![5, 6]);
        assert_eq!(mock.moves(), vec![11]);
        assert_eq!(connection.channel_id(), 11);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let connector = MockVoiceConnector::new();
        connector.set_fail_connect(true);
        assert!(matches!(
            connector.connect(1, 10).await,
            Err(PlayerError::Voice(_))
        ));
        assert_eq!(connector.connect_count(), 0);
    }
}
