//! Message types for the room and peer-session actors.

use crate::errors::SignalError;
use crate::sfu::{LocalTrackBinding, PullOutcome, RemoteTrackRef};
use signaling_protocol::{PublishedTrack, ServerMessage};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Whether a registry row is a publication or a mirror of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackLocation {
    /// Published by the owning session; the authoritative row.
    Local,
    /// Pulled into the owning session from another session's publication.
    Remote,
}

/// One row in a room's track registry.
///
/// Invariant: `remote_session_id` is `Some` exactly when `location` is
/// [`TrackLocation::Remote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    pub id: Uuid,
    /// Track name; unique among local rows in a room.
    pub name: String,
    pub location: TrackLocation,
    /// The SFU session holding this row.
    pub owner_session_id: String,
    /// SDP media line id within the owner's session.
    pub mid: String,
    /// For remote rows, the session that published the track.
    pub remote_session_id: Option<String>,
}

impl Track {
    #[must_use]
    pub fn local(name: impl Into<String>, owner: impl Into<String>, mid: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location: TrackLocation::Local,
            owner_session_id: owner.into(),
            mid: mid.into(),
            remote_session_id: None,
        }
    }

    #[must_use]
    pub fn remote(
        name: impl Into<String>,
        owner: impl Into<String>,
        mid: impl Into<String>,
        publisher: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location: TrackLocation::Remote,
            owner_session_id: owner.into(),
            mid: mid.into(),
            remote_session_id: Some(publisher.into()),
        }
    }
}

/// A snapshot of the other sessions' publications at one registry version.
#[derive(Debug, Clone)]
pub struct TrackListing {
    pub tracks: Vec<PublishedTrack>,
    pub version: u64,
}

/// Messages handled by the room actor.
#[derive(Debug)]
pub enum RoomMessage {
    /// Insert rows atomically; bumps the version and pokes every registered
    /// connection on success.
    AddTracks {
        tracks: Vec<Track>,
        respond_to: oneshot::Sender<Result<u64, SignalError>>,
    },

    /// Local publications of everyone except `session_id`, with the version.
    ListExcept {
        session_id: String,
        respond_to: oneshot::Sender<TrackListing>,
    },

    /// Drop every row owned by or mirroring `session_id`. No-op (no version
    /// bump, no pokes) when nothing matches.
    RemoveBySession {
        session_id: String,
        respond_to: oneshot::Sender<u64>,
    },

    /// Drop `session_id`'s rows with the given mids, cascading to mirrors of
    /// any removed publication. No-op when nothing matches.
    RemoveByMids {
        session_id: String,
        mids: Vec<String>,
        respond_to: oneshot::Sender<u64>,
    },

    /// Register a connection's outbound channel for pokes and presence.
    RegisterConnection {
        connection_id: String,
        sender: mpsc::Sender<ServerMessage>,
    },

    /// Remove a connection's outbound channel.
    UnregisterConnection { connection_id: String },

    /// Fan a presence frame out to every registered connection except the
    /// originator.
    BroadcastPresence {
        from_connection_id: String,
        message: ServerMessage,
    },

    /// Current registry version.
    GetVersion { respond_to: oneshot::Sender<u64> },
}

/// Messages handled by a peer-session actor.
#[derive(Debug)]
pub enum SessionMessage {
    /// HTTP bootstrap: create the SFU session (exactly once) without
    /// publishing anything, reply with the new session id.
    CreateSession {
        respond_to: oneshot::Sender<Result<String, SignalError>>,
    },

    /// First publication: create the SFU session (exactly once), push the
    /// tracks, reply with the answer SDP and the new session id.
    PushLocalTracks {
        offer_sdp: String,
        tracks: Vec<LocalTrackBinding>,
        respond_to: oneshot::Sender<Result<(String, String), SignalError>>,
    },

    /// Publish additional tracks into the existing session.
    AddLocalTracks {
        offer_sdp: String,
        tracks: Vec<LocalTrackBinding>,
        respond_to: oneshot::Sender<Result<String, SignalError>>,
    },

    /// Pull remote tracks into the existing session.
    PushRemoteTracks {
        tracks: Vec<RemoteTrackRef>,
        respond_to: oneshot::Sender<Result<PullOutcome, SignalError>>,
    },

    /// Deliver the client's answer to complete a renegotiation.
    Renegotiate {
        answer_sdp: String,
        respond_to: oneshot::Sender<Result<(), SignalError>>,
    },

    /// Close tracks by mid. Publishers supply an offer and get an answer.
    CloseTracks {
        offer_sdp: Option<String>,
        mids: Vec<String>,
        respond_to: oneshot::Sender<Result<Option<String>, SignalError>>,
    },

    /// Best-effort cleanup on disconnect: close this session's own
    /// publications at the SFU.
    Teardown {
        respond_to: oneshot::Sender<Result<(), SignalError>>,
    },

    /// The SFU session id, if the session was created.
    GetSessionId {
        respond_to: oneshot::Sender<Option<String>>,
    },
}
