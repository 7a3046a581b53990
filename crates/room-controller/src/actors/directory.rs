//! Lazy per-key actor directories.
//!
//! Rooms and peer sessions are spawned on first use and addressed by name.
//! Each directory hands out child cancellation tokens, so cancelling the hub
//! shuts every actor down.

use super::room::{RoomActor, RoomActorHandle};
use super::session::{PeerSessionActor, PeerSessionHandle};
use crate::sfu::SfuApi;
use crate::store::SessionStore;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Directory of room actors keyed by room name.
pub struct RoomDirectory {
    rooms: Mutex<HashMap<String, RoomActorHandle>>,
    cancel_token: CancellationToken,
}

impl RoomDirectory {
    #[must_use]
    pub fn new(cancel_token: CancellationToken) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            cancel_token,
        }
    }

    /// Get the room's actor, spawning it on first use.
    pub async fn get_or_spawn(&self, room: &str) -> RoomActorHandle {
        let mut rooms = self.rooms.lock().await;
        if let Some(handle) = rooms.get(room) {
            return handle.clone();
        }

        debug!(target: "rc.actor.room", room = %room, "spawning room actor");
        let (handle, _task) = RoomActor::spawn(room.to_string(), self.cancel_token.child_token());
        rooms.insert(room.to_string(), handle.clone());
        handle
    }

    /// Look up without spawning.
    pub async fn get(&self, room: &str) -> Option<RoomActorHandle> {
        let rooms = self.rooms.lock().await;
        rooms.get(room).cloned()
    }
}

/// Directory of peer-session actors keyed by `(room, participant)`.
pub struct SessionDirectory {
    sessions: Mutex<HashMap<(String, String), PeerSessionHandle>>,
    cancel_token: CancellationToken,
    sfu: Arc<dyn SfuApi>,
    store: Arc<dyn SessionStore>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new(
        cancel_token: CancellationToken,
        sfu: Arc<dyn SfuApi>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            cancel_token,
            sfu,
            store,
        }
    }

    /// Get the participant's session actor, spawning it on first use.
    pub async fn get_or_spawn(&self, room: &str, participant: &str) -> PeerSessionHandle {
        let mut sessions = self.sessions.lock().await;
        let key = (room.to_string(), participant.to_string());
        if let Some(handle) = sessions.get(&key) {
            return handle.clone();
        }

        debug!(
            target: "rc.actor.session",
            room = %room,
            participant_id = %participant,
            "spawning peer session actor"
        );
        let (handle, _task) = PeerSessionActor::spawn(
            room.to_string(),
            participant.to_string(),
            self.cancel_token.child_token(),
            Arc::clone(&self.sfu),
            Arc::clone(&self.store),
        )
        .await;
        sessions.insert(key, handle.clone());
        handle
    }

    /// Look up without spawning.
    pub async fn get(&self, room: &str, participant: &str) -> Option<PeerSessionHandle> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(&(room.to_string(), participant.to_string()))
            .cloned()
    }

    /// Drop and cancel the participant's session actor.
    pub async fn remove(&self, room: &str, participant: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.remove(&(room.to_string(), participant.to_string())) {
            handle.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::sfu::testing::MockSfu;
    use crate::store::MemorySessionStore;

    #[tokio::test]
    async fn test_room_directory_reuses_actors() {
        let dir = RoomDirectory::new(CancellationToken::new());
        let a = dir.get_or_spawn("lobby").await;
        a.add_tracks(vec![super::super::messages::Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();

        // Same key: same actor, state preserved.
        let b = dir.get_or_spawn("lobby").await;
        assert_eq!(b.version().await.unwrap(), 2);

        // Different key: fresh actor at the starting version.
        let c = dir.get_or_spawn("other").await;
        assert_eq!(c.version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_room_directory_get_never_spawns() {
        let dir = RoomDirectory::new(CancellationToken::new());
        assert!(dir.get("lobby").await.is_none());

        dir.get_or_spawn("lobby").await;
        assert!(dir.get("lobby").await.is_some());
        assert!(dir.get("other").await.is_none());
    }

    #[tokio::test]
    async fn test_session_directory_scopes_by_room_and_participant() {
        let dir = SessionDirectory::new(
            CancellationToken::new(),
            Arc::new(MockSfu::new()),
            Arc::new(MemorySessionStore::new()),
        );

        let a = dir.get_or_spawn("lobby", "p-1").await;
        a.push_local_tracks(
            "v=0".to_string(),
            vec![crate::sfu::LocalTrackBinding {
                mid: "0".to_string(),
                name: "cam-1".to_string(),
            }],
        )
        .await
        .unwrap();

        let same = dir.get_or_spawn("lobby", "p-1").await;
        assert!(same.session_id().await.unwrap().is_some());

        let other_room = dir.get_or_spawn("den", "p-1").await;
        assert_eq!(other_room.session_id().await.unwrap(), None);

        assert!(dir.get("lobby", "p-1").await.is_some());
        dir.remove("lobby", "p-1").await;
        assert!(dir.get("lobby", "p-1").await.is_none());
    }
}
