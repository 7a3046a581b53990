//! Durable record of which SFU session belongs to which participant.
//!
//! The exactly-once session guard survives actor restarts by persisting the
//! external session id keyed by `(room, participant session id)` before the
//! creating operation reports success. A restarted actor reloads the record
//! and refuses to create a second SFU session for the same participant.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

/// Storage failure. The in-memory store never produces one; a backed store
/// surfaces its I/O errors here.
#[derive(Debug, Error)]
#[error("session store error: {0}")]
pub struct StoreError(pub String);

/// Persistence seam for the per-participant SFU session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted SFU session id, if one was ever created.
    async fn load(&self, room: &str, participant: &str) -> Result<Option<String>, StoreError>;

    /// Persist the SFU session id. Must complete before the creating
    /// operation reports success.
    async fn save(
        &self,
        room: &str,
        participant: &str,
        sfu_session_id: &str,
    ) -> Result<(), StoreError>;

    /// Remove the record when the participant's session is torn down.
    async fn remove(&self, room: &str, participant: &str) -> Result<(), StoreError>;
}

/// Process-local [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, room: &str, participant: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(room.to_string(), participant.to_string()))
            .cloned())
    }

    async fn save(
        &self,
        room: &str,
        participant: &str,
        sfu_session_id: &str,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            (room.to_string(), participant.to_string()),
            sfu_session_id.to_string(),
        );
        Ok(())
    }

    async fn remove(&self, room: &str, participant: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        entries.remove(&(room.to_string(), participant.to_string()));
        Ok(())
    }
}
