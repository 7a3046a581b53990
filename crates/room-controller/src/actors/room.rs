//! `RoomActor` - per-room actor that owns the track registry.
//!
//! Each `RoomActor`:
//! - Owns all track rows for one room and the room's version counter
//! - Serializes every mutation, so version bumps are totally ordered
//! - Holds the outbound channels of the room's live connections and pokes
//!   them after every effective mutation
//!
//! The version only ever goes up. A poke is advisory: delivery is
//! best-effort (`try_send`), and clients that miss one converge through
//! their periodic resync.

use super::messages::{RoomMessage, Track, TrackLocation, TrackListing};
use crate::errors::{ConflictError, SignalError};

use signaling_protocol::{PublishedTrack, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room: String,
}

impl RoomActorHandle {
    /// Get the room name.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Insert rows atomically. Returns the new version on success; on any
    /// validation failure nothing is inserted and the version is unchanged.
    pub async fn add_tracks(&self, tracks: Vec<Track>) -> Result<u64, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::AddTracks {
                tracks,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Local publications of everyone except `session_id`, with the version
    /// they were read at.
    pub async fn list_except(&self, session_id: String) -> Result<TrackListing, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::ListExcept {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Drop every row owned by or mirroring `session_id`. Returns the
    /// version after the operation.
    pub async fn remove_by_session(&self, session_id: String) -> Result<u64, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::RemoveBySession {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Drop `session_id`'s rows with the given mids, cascading to mirrors of
    /// any removed publication. Returns the version after the operation.
    pub async fn remove_by_mids(
        &self,
        session_id: String,
        mids: Vec<String>,
    ) -> Result<u64, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::RemoveByMids {
                session_id,
                mids,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a connection's outbound channel for pokes and presence.
    pub async fn register_connection(
        &self,
        connection_id: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::RegisterConnection {
                connection_id,
                sender,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Remove a connection's outbound channel.
    pub async fn unregister_connection(&self, connection_id: String) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::UnregisterConnection { connection_id })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Fan a presence frame out to everyone except the originator.
    pub async fn broadcast_presence(
        &self,
        from_connection_id: String,
        message: ServerMessage,
    ) -> Result<(), SignalError> {
        self.sender
            .send(RoomMessage::BroadcastPresence {
                from_connection_id,
                message,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))
    }

    /// Current registry version.
    pub async fn version(&self) -> Result<u64, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetVersion { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room name.
    room: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of the hub's token).
    cancel_token: CancellationToken,
    /// All track rows, local and remote.
    tracks: Vec<Track>,
    /// Monotonic registry version. Starts at 1 when the room is created;
    /// every effective mutation bumps it by exactly one.
    version: u64,
    /// Outbound channels by connection id.
    connections: HashMap<String, mpsc::Sender<ServerMessage>>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(room: String, cancel_token: CancellationToken) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room: room.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            tracks: Vec::new(),
            version: 1,
            connections: HashMap::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "rc.actor.room", fields(room = %self.room))]
    async fn run(mut self) {
        info!(target: "rc.actor.room", room = %self.room, "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "rc.actor.room", room = %self.room, "RoomActor cancelled");
                    break;
                }
                message = self.receiver.recv() => {
                    match message {
                        Some(message) => self.handle_message(message),
                        None => {
                            debug!(target: "rc.actor.room", room = %self.room, "mailbox closed");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::AddTracks { tracks, respond_to } => {
                let result = self.add_tracks(tracks);
                let _ = respond_to.send(result);
            }
            RoomMessage::ListExcept {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.list_except(&session_id));
            }
            RoomMessage::RemoveBySession {
                session_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove_by_session(&session_id));
            }
            RoomMessage::RemoveByMids {
                session_id,
                mids,
                respond_to,
            } => {
                let _ = respond_to.send(self.remove_by_mids(&session_id, &mids));
            }
            RoomMessage::RegisterConnection {
                connection_id,
                sender,
            } => {
                self.connections.insert(connection_id, sender);
            }
            RoomMessage::UnregisterConnection { connection_id } => {
                self.connections.remove(&connection_id);
            }
            RoomMessage::BroadcastPresence {
                from_connection_id,
                message,
            } => {
                for (connection_id, sender) in &self.connections {
                    if *connection_id == from_connection_id {
                        continue;
                    }
                    if sender.try_send(message.clone()).is_err() {
                        warn!(
                            target: "rc.actor.room",
                            room = %self.room,
                            connection_id = %connection_id,
                            "presence dropped: outbound channel full or closed"
                        );
                    }
                }
            }
            RoomMessage::GetVersion { respond_to } => {
                let _ = respond_to.send(self.version);
            }
        }
    }

    /// Validate and insert a batch atomically.
    fn add_tracks(&mut self, batch: Vec<Track>) -> Result<u64, SignalError> {
        if batch.is_empty() {
            return Err(SignalError::Validation("empty track batch".to_string()));
        }

        for (i, track) in batch.iter().enumerate() {
            let remote_marker = track.remote_session_id.is_some();
            if (track.location == TrackLocation::Remote) != remote_marker {
                return Err(SignalError::InvariantViolation(format!(
                    "track {}: location/remote_session_id mismatch",
                    track.name
                )));
            }

            // Local names are the room-wide identity clients diff on.
            if track.location == TrackLocation::Local {
                let clashes_existing = self
                    .tracks
                    .iter()
                    .any(|t| t.location == TrackLocation::Local && t.name == track.name);
                let clashes_batch = batch
                    .iter()
                    .take(i)
                    .any(|t| t.location == TrackLocation::Local && t.name == track.name);
                if clashes_existing || clashes_batch {
                    return Err(ConflictError::DuplicateName(track.name.clone()).into());
                }
            }

            // A session never holds two rows for the same name or the same mid.
            let same_owner = |t: &Track| t.owner_session_id == track.owner_session_id;
            let owner_name_clash = self
                .tracks
                .iter()
                .chain(batch.iter().take(i))
                .any(|t| same_owner(t) && t.name == track.name);
            let owner_mid_clash = self
                .tracks
                .iter()
                .chain(batch.iter().take(i))
                .any(|t| same_owner(t) && t.mid == track.mid);
            if owner_name_clash || owner_mid_clash {
                return Err(SignalError::InvariantViolation(format!(
                    "session {} already holds a row for name={} or mid={}",
                    track.owner_session_id, track.name, track.mid
                )));
            }
        }

        let count = batch.len();
        self.tracks.extend(batch);
        self.version += 1;

        debug!(
            target: "rc.actor.room",
            room = %self.room,
            added = count,
            version = self.version,
            "tracks added"
        );

        self.poke_all();
        Ok(self.version)
    }

    fn list_except(&self, session_id: &str) -> TrackListing {
        let tracks = self
            .tracks
            .iter()
            .filter(|t| t.location == TrackLocation::Local && t.owner_session_id != session_id)
            .map(|t| PublishedTrack {
                mid: t.mid.clone(),
                session_id: t.owner_session_id.clone(),
                name: t.name.clone(),
            })
            .collect();

        TrackListing {
            tracks,
            version: self.version,
        }
    }

    fn remove_by_session(&mut self, session_id: &str) -> u64 {
        let before = self.tracks.len();
        self.tracks.retain(|t| {
            t.owner_session_id != session_id
                && t.remote_session_id.as_deref() != Some(session_id)
        });
        let removed = before - self.tracks.len();

        if removed > 0 {
            self.version += 1;
            info!(
                target: "rc.actor.room",
                room = %self.room,
                session_id = %session_id,
                removed,
                version = self.version,
                "session rows removed"
            );
            self.poke_all();
        }

        self.version
    }

    fn remove_by_mids(&mut self, session_id: &str, mids: &[String]) -> u64 {
        // Names of publications being closed; their mirrors go too.
        let closed_names: Vec<String> = self
            .tracks
            .iter()
            .filter(|t| {
                t.location == TrackLocation::Local
                    && t.owner_session_id == session_id
                    && mids.contains(&t.mid)
            })
            .map(|t| t.name.clone())
            .collect();

        let before = self.tracks.len();
        self.tracks.retain(|t| {
            let own_row = t.owner_session_id == session_id && mids.contains(&t.mid);
            let orphaned_mirror = t.remote_session_id.as_deref() == Some(session_id)
                && closed_names.contains(&t.name);
            !own_row && !orphaned_mirror
        });
        let removed = before - self.tracks.len();

        if removed > 0 {
            self.version += 1;
            debug!(
                target: "rc.actor.room",
                room = %self.room,
                session_id = %session_id,
                removed,
                version = self.version,
                "tracks closed"
            );
            self.poke_all();
        }

        self.version
    }

    /// Best-effort poke to every registered connection. A full or closed
    /// channel drops the poke; resync covers the gap.
    fn poke_all(&self) {
        let poke = ServerMessage::Poke {
            version: self.version,
        };
        for (connection_id, sender) in &self.connections {
            if sender.try_send(poke.clone()).is_err() {
                warn!(
                    target: "rc.actor.room",
                    room = %self.room,
                    connection_id = %connection_id,
                    "poke dropped: outbound channel full or closed"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn spawn_room() -> RoomActorHandle {
        let (handle, _task) = RoomActor::spawn("lobby".to_string(), CancellationToken::new());
        handle
    }

    #[tokio::test]
    async fn test_version_bumps_once_per_batch() {
        let room = spawn_room();
        assert_eq!(room.version().await.unwrap(), 1);

        let v = room
            .add_tracks(vec![
                Track::local("cam-1", "s-1", "0"),
                Track::local("mic-1", "s-1", "1"),
            ])
            .await
            .unwrap();
        assert_eq!(v, 2);

        let v = room
            .add_tracks(vec![Track::local("cam-2", "s-2", "0")])
            .await
            .unwrap();
        assert_eq!(v, 3);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejects_whole_batch() {
        let room = spawn_room();
        room.add_tracks(vec![Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();

        // Second row is fine, first clashes: nothing may land.
        let err = room
            .add_tracks(vec![
                Track::local("cam-1", "s-2", "0"),
                Track::local("cam-2", "s-2", "1"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::Conflict(ConflictError::DuplicateName(_))
        ));

        // No partial insert, no version bump.
        assert_eq!(room.version().await.unwrap(), 2);
        let listing = room.list_except("s-1".to_string()).await.unwrap();
        assert!(listing.tracks.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_within_one_batch_rejected() {
        let room = spawn_room();
        let err = room
            .add_tracks(vec![
                Track::local("cam-1", "s-1", "0"),
                Track::local("cam-1", "s-1", "1"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SignalError::Conflict(ConflictError::DuplicateName(_))
        ));
        assert_eq!(room.version().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remote_rows_do_not_reserve_names() {
        let room = spawn_room();
        // s-2 mirrors a track named cam-1; a local publication of cam-1 by
        // s-1 is still allowed.
        room.add_tracks(vec![Track::remote("cam-1", "s-2", "7", "s-1")])
            .await
            .unwrap();
        room.add_tracks(vec![Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();
        assert_eq!(room.version().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_except_returns_only_other_sessions_local_rows() {
        let room = spawn_room();
        room.add_tracks(vec![
            Track::local("cam-1", "s-1", "0"),
            Track::local("cam-2", "s-2", "0"),
            Track::remote("cam-2", "s-1", "5", "s-2"),
        ])
        .await
        .unwrap();

        let listing = room.list_except("s-1".to_string()).await.unwrap();
        assert_eq!(listing.version, 2);
        assert_eq!(listing.tracks.len(), 1);
        assert_eq!(listing.tracks[0].name, "cam-2");
        assert_eq!(listing.tracks[0].session_id, "s-2");
    }

    #[tokio::test]
    async fn test_remove_by_session_cascades_to_mirrors() {
        let room = spawn_room();
        room.add_tracks(vec![Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();
        room.add_tracks(vec![Track::local("cam-2", "s-2", "0")])
            .await
            .unwrap();
        // s-2 mirrors s-1's cam-1.
        room.add_tracks(vec![Track::remote("cam-1", "s-2", "5", "s-1")])
            .await
            .unwrap();

        // Removing s-1 drops its publication and s-2's mirror of it.
        let v = room.remove_by_session("s-1".to_string()).await.unwrap();
        assert_eq!(v, 5);

        let listing = room.list_except("none".to_string()).await.unwrap();
        assert_eq!(listing.tracks.len(), 1);
        assert_eq!(listing.tracks[0].name, "cam-2");
    }

    #[tokio::test]
    async fn test_remove_by_mids_cascades_to_mirrors_of_closed_names() {
        let room = spawn_room();
        room.add_tracks(vec![
            Track::local("cam-1", "s-1", "0"),
            Track::local("mic-1", "s-1", "1"),
        ])
        .await
        .unwrap();
        room.add_tracks(vec![Track::remote("cam-1", "s-2", "5", "s-1")])
            .await
            .unwrap();

        // Closing cam-1 drops s-2's mirror of it but keeps mic-1.
        let v = room
            .remove_by_mids("s-1".to_string(), vec!["0".to_string()])
            .await
            .unwrap();
        assert_eq!(v, 4);

        let listing = room.list_except("none".to_string()).await.unwrap();
        assert_eq!(listing.tracks.len(), 1);
        assert_eq!(listing.tracks[0].name, "mic-1");

        // Unknown mids: no-op, no bump.
        let v = room
            .remove_by_mids("s-1".to_string(), vec!["9".to_string()])
            .await
            .unwrap();
        assert_eq!(v, 4);
    }

    #[tokio::test]
    async fn test_remove_unknown_session_is_noop() {
        let room = spawn_room();
        room.add_tracks(vec![Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();

        let v = room.remove_by_session("s-9".to_string()).await.unwrap();
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn test_mutations_poke_registered_connections() {
        let room = spawn_room();
        let (tx, mut rx) = mpsc::channel(8);
        room.register_connection("c-1".to_string(), tx).await.unwrap();

        room.add_tracks(vec![Track::local("cam-1", "s-1", "0")])
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::Poke { version: 2 });

        room.remove_by_session("s-1".to_string()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), ServerMessage::Poke { version: 3 });

        // No-op removal pokes nobody.
        room.remove_by_session("s-1".to_string()).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_presence_skips_originator() {
        let room = spawn_room();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        room.register_connection("c-1".to_string(), tx1).await.unwrap();
        room.register_connection("c-2".to_string(), tx2).await.unwrap();

        let frame = ServerMessage::PauseRemoteVideo {
            name: "cam-1".to_string(),
            session_id: "s-1".to_string(),
        };
        room.broadcast_presence("c-1".to_string(), frame.clone())
            .await
            .unwrap();

        // Give the actor a turn to process.
        assert_eq!(rx2.recv().await.unwrap(), frame);
        assert!(rx1.try_recv().is_err());
    }
}
