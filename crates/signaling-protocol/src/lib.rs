//! Wire types for the Roomcast signaling protocol.
//!
//! Two surfaces share these types:
//!
//! - The per-room WebSocket channel: JSON text frames discriminated by a
//!   `type` tag ([`ClientMessage`] inbound, [`ServerMessage`] outbound).
//! - The HTTP signaling surface authenticated via the
//!   `x-session-identity-token` header (the request/response DTOs below).
//!
//! Everything here is validated at the boundary: a frame that does not parse
//! into one of the tagged variants is rejected by the receiver with no state
//! mutation.

#![warn(clippy::pedantic)]

pub mod ws;

pub use ws::{parse_client_message, parse_server_message, ClientMessage, ServerMessage, TrackSpec};

use serde::{Deserialize, Serialize};

/// SDP message kind, mirroring the WebRTC `RTCSessionDescription.type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An SDP payload with its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// HTTP surface DTOs
// ----------------------------------------------------------------------------

/// Request header carrying the session identity token.
pub const SESSION_IDENTITY_HEADER: &str = "x-session-identity-token";

/// `POST /sessions/new` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionRequest {
    #[serde(rename = "userSessionId")]
    pub user_session_id: String,
    pub room: String,
}

/// `POST /sessions/new` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSessionResponse {
    #[serde(rename = "sessionIdentityToken")]
    pub session_identity_token: String,
}

/// One local track binding in a `tracks/new` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTrackEntry {
    pub mid: String,
    #[serde(rename = "trackName")]
    pub track_name: String,
}

/// One remote track reference in a `tracks/new` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTrackEntry {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "trackName")]
    pub track_name: String,
}

/// `POST /tracks/new` request: publish additional local tracks (with an
/// offer) or pull remote tracks by name from their owning sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TracksNewRequest {
    Local {
        #[serde(rename = "sessionDescription")]
        session_description: SessionDescription,
        tracks: Vec<LocalTrackEntry>,
    },
    Remote {
        tracks: Vec<RemoteTrackEntry>,
    },
}

/// One granted track binding in a `tracks/new` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedTrack {
    pub mid: String,
    pub name: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

/// `POST /tracks/new` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracksNewResponse {
    #[serde(
        rename = "sessionDescription",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_description: Option<SessionDescription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracks: Option<Vec<GrantedTrack>>,
}

/// `PUT /sessions/renegotiate` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenegotiateRequest {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescription,
}

/// `PUT /tracks/close` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTracksRequest {
    #[serde(rename = "sessionDescription")]
    pub session_description: SessionDescription,
    pub tracks: Vec<CloseTrackEntry>,
}

/// One track reference in a `tracks/close` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTrackEntry {
    pub mid: String,
}

/// `PUT /tracks/close` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseTracksResponse {
    #[serde(
        rename = "sessionDescription",
        skip_serializing_if = "Option::is_none"
    )]
    pub session_description: Option<SessionDescription>,
}

/// One row in a `GET /local_tracks` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedTrack {
    pub mid: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    pub name: String,
}

/// `GET /local_tracks` response: the other sessions' published tracks at a
/// single registry version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTracksResponse {
    pub tracks: Vec<PublishedTrack>,
    pub version: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_shape() {
        let sd = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&sd).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");

        let back: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0"}"#).unwrap();
        assert_eq!(back.kind, SdpType::Answer);
    }

    #[test]
    fn test_tracks_new_request_local_variant() {
        let json = r#"{
            "sessionDescription": {"type": "offer", "sdp": "v=0"},
            "tracks": [{"mid": "0", "trackName": "cam-1"}]
        }"#;
        let req: TracksNewRequest = serde_json::from_str(json).unwrap();
        assert!(matches!(req, TracksNewRequest::Local { .. }));
    }

    #[test]
    fn test_tracks_new_request_remote_variant() {
        let json = r#"{"tracks": [{"sessionId": "s-9", "trackName": "cam-9"}]}"#;
        let req: TracksNewRequest = serde_json::from_str(json).unwrap();
        match req {
            TracksNewRequest::Remote { tracks } => {
                assert_eq!(tracks.len(), 1);
                assert_eq!(tracks[0].session_id, "s-9");
            }
            TracksNewRequest::Local { .. } => panic!("expected remote variant"),
        }
    }

    #[test]
    fn test_local_tracks_response_round_trip() {
        let resp = LocalTracksResponse {
            tracks: vec![PublishedTrack {
                mid: "3".to_string(),
                session_id: "s-1".to_string(),
                name: "cam-1".to_string(),
            }],
            version: 7,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"sessionId\":\"s-1\""));
        let back: LocalTracksResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.version, 7);
        assert_eq!(back.tracks, resp.tracks);
    }
}
