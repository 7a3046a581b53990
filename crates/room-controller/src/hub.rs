//! Per-room WebSocket signaling hub.
//!
//! The hub owns the live connections: it parses inbound frames, verifies
//! session identity tokens, drives the room and peer-session actors, and
//! fans renegotiation offers and presence out to the other peers. All of its
//! logic is socket-free ([`Hub::on_message`] / [`Hub::on_close`]); the axum
//! WebSocket handler is a thin pump on top.
//!
//! Error policy: only the `pushTrack` join gets an `error` frame back.
//! Every other failed message is logged and dropped; the client's periodic
//! resync repairs whatever was missed.

use crate::actors::{RoomActorHandle, RoomDirectory, SessionDirectory, Track};
use crate::errors::SignalError;
use crate::sfu::{LocalTrackBinding, RemoteTrackRef, SfuApi};
use crate::store::SessionStore;

use common::identity::{self, IdentityTokenPayload};
use common::secret::SecretString;
use signaling_protocol::{parse_client_message, ClientMessage, ServerMessage, TrackSpec};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outbound channel depth per connection. A slow reader loses pokes, not
/// correctness.
pub const OUTBOUND_CHANNEL_BUFFER: usize = 64;

struct PeerEntry {
    room: String,
    sender: mpsc::Sender<ServerMessage>,
    /// Bound after a successful join.
    sfu_session_id: Option<String>,
}

/// Shared signaling state: directories of room and session actors plus the
/// live connection table.
pub struct Hub {
    jwt_secret: SecretString,
    pub rooms: RoomDirectory,
    pub sessions: SessionDirectory,
    peers: Mutex<HashMap<String, PeerEntry>>,
}

impl Hub {
    #[must_use]
    pub fn new(
        jwt_secret: SecretString,
        sfu: Arc<dyn SfuApi>,
        store: Arc<dyn SessionStore>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            jwt_secret,
            rooms: RoomDirectory::new(cancel_token.child_token()),
            sessions: SessionDirectory::new(cancel_token.child_token(), sfu, store),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Verify a token and map failures onto [`SignalError::Auth`].
    pub fn verify_token(&self, token: &str) -> Result<IdentityTokenPayload, SignalError> {
        identity::verify(&self.jwt_secret, token).map_err(SignalError::Auth)
    }

    /// Sign a token binding `(connection_id, session_id, room)`.
    pub fn issue_token(
        &self,
        connection_id: &str,
        session_id: &str,
        room: &str,
    ) -> Result<String, SignalError> {
        identity::issue(&self.jwt_secret, connection_id, session_id, room)
            .map_err(SignalError::Auth)
    }

    /// Alternate join path over HTTP: create the participant's SFU session
    /// (same exactly-once guard as the WebSocket join) and issue a token.
    pub async fn create_http_session(
        &self,
        user_session_id: &str,
        room: &str,
    ) -> Result<String, SignalError> {
        let session = self.sessions.get_or_spawn(room, user_session_id).await;
        let sfu_session_id = session.create_session().await?;
        self.issue_token(user_session_id, &sfu_session_id, room)
    }

    /// Register a freshly accepted connection.
    pub async fn connect(
        &self,
        room: &str,
        connection_id: &str,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), SignalError> {
        {
            let mut peers = self.peers.lock().await;
            peers.insert(
                connection_id.to_string(),
                PeerEntry {
                    room: room.to_string(),
                    sender: sender.clone(),
                    sfu_session_id: None,
                },
            );
        }

        let room_handle = self.rooms.get_or_spawn(room).await;
        room_handle
            .register_connection(connection_id.to_string(), sender)
            .await?;

        info!(
            target: "rc.hub",
            room = %room,
            connection_id = %connection_id,
            "connection registered"
        );
        Ok(())
    }

    /// Handle one inbound text frame.
    pub async fn on_message(&self, room: &str, connection_id: &str, raw: &str) {
        let message = match parse_client_message(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(
                    target: "rc.hub",
                    room = %room,
                    connection_id = %connection_id,
                    error = %e,
                    "rejecting unparseable frame"
                );
                self.send_error(
                    connection_id,
                    &SignalError::Validation("unrecognized message".to_string()),
                )
                .await;
                return;
            }
        };

        match message {
            ClientMessage::PushTrack { sdp, tracks } => {
                if let Err(e) = self.handle_push_track(room, connection_id, sdp, tracks).await {
                    warn!(
                        target: "rc.hub",
                        room = %room,
                        connection_id = %connection_id,
                        error = %e,
                        "pushTrack failed"
                    );
                    self.send_error(connection_id, &e).await;
                }
            }
            ClientMessage::RtcAnswer { sdp, token } => {
                if let Err(e) = self.handle_rtc_answer(room, connection_id, &sdp, &token).await {
                    warn!(
                        target: "rc.hub",
                        room = %room,
                        connection_id = %connection_id,
                        error = %e,
                        "rtcAnswer dropped"
                    );
                }
            }
            ClientMessage::PauseVideo { name, token } => {
                if let Err(e) = self
                    .handle_presence(room, connection_id, &token, name, true)
                    .await
                {
                    warn!(
                        target: "rc.hub",
                        room = %room,
                        connection_id = %connection_id,
                        error = %e,
                        "pause_video dropped"
                    );
                }
            }
            ClientMessage::ResumeVideo { name, token } => {
                if let Err(e) = self
                    .handle_presence(room, connection_id, &token, name, false)
                    .await
                {
                    warn!(
                        target: "rc.hub",
                        room = %room,
                        connection_id = %connection_id,
                        error = %e,
                        "resume_video dropped"
                    );
                }
            }
        }
    }

    /// Handle a connection going away: drop its rows (poking the survivors)
    /// and tear its SFU session down best-effort.
    pub async fn on_close(&self, room: &str, connection_id: &str) {
        let entry = {
            let mut peers = self.peers.lock().await;
            peers.remove(connection_id)
        };

        // A close must never resurrect a torn-down room.
        let room_handle = self.rooms.get(room).await;
        if let Some(handle) = &room_handle {
            if let Err(e) = handle.unregister_connection(connection_id.to_string()).await {
                warn!(target: "rc.hub", error = %e, "unregister failed");
            }
        }

        let Some(entry) = entry else { return };
        let Some(sfu_session_id) = entry.sfu_session_id else {
            debug!(
                target: "rc.hub",
                room = %room,
                connection_id = %connection_id,
                "connection closed before joining"
            );
            return;
        };

        // Registry first: survivors get poked even if SFU cleanup fails.
        if let Some(handle) = &room_handle {
            if let Err(e) = handle.remove_by_session(sfu_session_id.clone()).await {
                warn!(target: "rc.hub", error = %e, "registry cleanup failed");
            }
        }

        if let Some(session) = self.sessions.get(room, connection_id).await {
            if let Err(e) = session.teardown().await {
                warn!(target: "rc.hub", error = %e, "session teardown failed");
            }
        }
        self.sessions.remove(room, connection_id).await;

        info!(
            target: "rc.hub",
            room = %room,
            connection_id = %connection_id,
            sfu_session_id = %sfu_session_id,
            "connection closed"
        );
    }

    // ------------------------------------------------------------------
    // Frame handlers
    // ------------------------------------------------------------------

    async fn handle_push_track(
        &self,
        room: &str,
        connection_id: &str,
        offer_sdp: String,
        tracks: Vec<TrackSpec>,
    ) -> Result<(), SignalError> {
        if tracks.is_empty() {
            return Err(SignalError::Validation("no tracks in pushTrack".to_string()));
        }

        let bindings: Vec<LocalTrackBinding> = tracks
            .iter()
            .map(|t| LocalTrackBinding {
                mid: t.mid.clone(),
                name: t.name.clone(),
            })
            .collect();

        let session = self.sessions.get_or_spawn(room, connection_id).await;
        let (answer_sdp, sfu_session_id) = session
            .push_local_tracks(offer_sdp, bindings.clone())
            .await?;

        let token = self.issue_token(connection_id, &sfu_session_id, room)?;

        {
            let mut peers = self.peers.lock().await;
            if let Some(entry) = peers.get_mut(connection_id) {
                entry.sfu_session_id = Some(sfu_session_id.clone());
            }
        }

        self.send_to(
            connection_id,
            ServerMessage::RtcAnswer {
                sdp: answer_sdp,
                session_identity_token: Some(token),
            },
        )
        .await;

        let room_handle = self.rooms.get_or_spawn(room).await;
        let rows = bindings
            .iter()
            .map(|b| Track::local(b.name.clone(), sfu_session_id.clone(), b.mid.clone()))
            .collect();
        room_handle.add_tracks(rows).await?;

        // Deliver the new publication to everyone already in the room.
        self.fan_out_new_tracks(room, &room_handle, connection_id, &sfu_session_id, &bindings)
            .await;

        // And pull the room's pre-existing publications into the joiner.
        self.catch_up_joiner(&room_handle, connection_id, &sfu_session_id)
            .await;

        Ok(())
    }

    /// Concurrently push `publisher`'s new tracks into every other joined
    /// peer's session. Per-peer failures are logged and isolated.
    async fn fan_out_new_tracks(
        &self,
        room: &str,
        room_handle: &RoomActorHandle,
        from_connection_id: &str,
        publisher_session_id: &str,
        bindings: &[LocalTrackBinding],
    ) {
        let targets: Vec<(String, String)> = {
            let peers = self.peers.lock().await;
            peers
                .iter()
                .filter(|(conn_id, entry)| {
                    entry.room == room
                        && conn_id.as_str() != from_connection_id
                        && entry.sfu_session_id.is_some()
                })
                .filter_map(|(conn_id, entry)| {
                    entry
                        .sfu_session_id
                        .clone()
                        .map(|sid| (conn_id.clone(), sid))
                })
                .collect()
        };

        let pushes = targets.into_iter().map(|(peer_conn, peer_session_id)| {
            self.push_tracks_to_peer(
                room,
                room_handle,
                peer_conn,
                peer_session_id,
                publisher_session_id,
                bindings,
            )
        });
        futures::future::join_all(pushes).await;
    }

    async fn push_tracks_to_peer(
        &self,
        room: &str,
        room_handle: &RoomActorHandle,
        peer_connection_id: String,
        peer_session_id: String,
        publisher_session_id: &str,
        bindings: &[LocalTrackBinding],
    ) {
        let Some(peer_session) = self.sessions.get(room, &peer_connection_id).await else {
            return;
        };

        let refs: Vec<RemoteTrackRef> = bindings
            .iter()
            .map(|b| RemoteTrackRef {
                session_id: publisher_session_id.to_string(),
                name: b.name.clone(),
            })
            .collect();

        match peer_session.push_remote_tracks(refs).await {
            Ok(outcome) => {
                if !outcome.granted.is_empty() {
                    let rows = outcome
                        .granted
                        .iter()
                        .map(|g| {
                            Track::remote(
                                g.name.clone(),
                                peer_session_id.clone(),
                                g.mid.clone(),
                                g.session_id.clone(),
                            )
                        })
                        .collect();
                    if let Err(e) = room_handle.add_tracks(rows).await {
                        warn!(
                            target: "rc.hub",
                            connection_id = %peer_connection_id,
                            error = %e,
                            "failed to record mirror rows"
                        );
                    }
                }
                if let Some(offer_sdp) = outcome.offer_sdp {
                    self.send_to(&peer_connection_id, ServerMessage::RtcOffer { sdp: offer_sdp })
                        .await;
                }
            }
            Err(e) => {
                warn!(
                    target: "rc.hub",
                    connection_id = %peer_connection_id,
                    error = %e,
                    "fan-out push failed"
                );
            }
        }
    }

    /// Pull the other sessions' publications into a fresh joiner and send it
    /// a second `rtcOffer` when there is anything to receive.
    async fn catch_up_joiner(
        &self,
        room_handle: &RoomActorHandle,
        connection_id: &str,
        sfu_session_id: &str,
    ) {
        let listing = match room_handle.list_except(sfu_session_id.to_string()).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(target: "rc.hub", error = %e, "catch-up listing failed");
                return;
            }
        };
        if listing.tracks.is_empty() {
            return;
        }

        let room = room_handle.room().to_string();
        let Some(session) = self.sessions.get(&room, connection_id).await else {
            return;
        };

        let refs: Vec<RemoteTrackRef> = listing
            .tracks
            .iter()
            .map(|t| RemoteTrackRef {
                session_id: t.session_id.clone(),
                name: t.name.clone(),
            })
            .collect();

        match session.push_remote_tracks(refs).await {
            Ok(outcome) => {
                if !outcome.granted.is_empty() {
                    let rows = outcome
                        .granted
                        .iter()
                        .map(|g| {
                            Track::remote(
                                g.name.clone(),
                                sfu_session_id.to_string(),
                                g.mid.clone(),
                                g.session_id.clone(),
                            )
                        })
                        .collect();
                    if let Err(e) = room_handle.add_tracks(rows).await {
                        warn!(target: "rc.hub", error = %e, "failed to record joiner mirrors");
                    }
                }
                if let Some(offer_sdp) = outcome.offer_sdp {
                    self.send_to(connection_id, ServerMessage::RtcOffer { sdp: offer_sdp })
                        .await;
                }
            }
            Err(e) => {
                warn!(
                    target: "rc.hub",
                    connection_id = %connection_id,
                    error = %e,
                    "joiner catch-up failed"
                );
            }
        }
    }

    async fn handle_rtc_answer(
        &self,
        room: &str,
        connection_id: &str,
        answer_sdp: &str,
        token: &str,
    ) -> Result<(), SignalError> {
        self.authorize(room, connection_id, token)?;

        let session = self
            .sessions
            .get(room, connection_id)
            .await
            .ok_or_else(|| SignalError::Validation("no session for connection".to_string()))?;
        session.renegotiate(answer_sdp.to_string()).await
    }

    async fn handle_presence(
        &self,
        room: &str,
        connection_id: &str,
        token: &str,
        name: String,
        paused: bool,
    ) -> Result<(), SignalError> {
        let payload = self.authorize(room, connection_id, token)?;

        let message = if paused {
            ServerMessage::PauseRemoteVideo {
                name,
                session_id: payload.session_id,
            }
        } else {
            ServerMessage::ResumeRemoteVideo {
                name,
                session_id: payload.session_id,
            }
        };

        let room_handle = self.rooms.get_or_spawn(room).await;
        room_handle
            .broadcast_presence(connection_id.to_string(), message)
            .await
    }

    /// Verify a token and check it is bound to this connection and room.
    fn authorize(
        &self,
        room: &str,
        connection_id: &str,
        token: &str,
    ) -> Result<IdentityTokenPayload, SignalError> {
        let payload = self.verify_token(token)?;
        if payload.sub != connection_id || payload.room != room {
            return Err(SignalError::Validation(
                "token not bound to this connection".to_string(),
            ));
        }
        Ok(payload)
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    async fn send_to(&self, connection_id: &str, message: ServerMessage) {
        let sender = {
            let peers = self.peers.lock().await;
            peers.get(connection_id).map(|entry| entry.sender.clone())
        };
        if let Some(sender) = sender {
            if sender.send(message).await.is_err() {
                debug!(
                    target: "rc.hub",
                    connection_id = %connection_id,
                    "outbound channel closed"
                );
            }
        }
    }

    async fn send_error(&self, connection_id: &str, error: &SignalError) {
        self.send_to(
            connection_id,
            ServerMessage::Error {
                code: error.error_code(),
                message: error.client_message(),
            },
        )
        .await;
    }
}
