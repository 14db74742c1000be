//! Seam between a voice connection and the session that created it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use voicegate_protocol::VoiceStateUpdate;

use crate::connection::VoiceConnection;
use crate::error::SdkError;

/// The parent session: owns the main gateway connection and the registry
/// of voice connections, one per guild.
#[async_trait]
pub trait ParentSession: Send + Sync {
    /// Write a voice state update (`op 4`) on the parent's own gateway connection.
    async fn send_voice_state_update(&self, update: VoiceStateUpdate) -> Result<(), SdkError>;

    /// Forget the voice connection for `guild_id`. Called by `disconnect`.
    fn remove_voice_connection(&self, guild_id: &str);
}

/// Concurrent guild id → connection map for parent sessions to embed.
#[derive(Clone, Default)]
pub struct VoiceRegistry {
    connections: Arc<DashMap<String, Arc<VoiceConnection>>>,
}

impl VoiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `connection` under its guild, returning any connection it replaced.
    pub fn insert(&self, connection: Arc<VoiceConnection>) -> Option<Arc<VoiceConnection>> {
        self.connections
            .insert(connection.guild_id().to_string(), connection)
    }

    #[must_use]
    pub fn get(&self, guild_id: &str) -> Option<Arc<VoiceConnection>> {
        self.connections.get(guild_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, guild_id: &str) -> Option<Arc<VoiceConnection>> {
        self.connections.remove(guild_id).map(|(_, connection)| connection)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
