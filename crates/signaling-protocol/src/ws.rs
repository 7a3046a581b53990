//! WebSocket message schema for the per-room signaling channel.
//!
//! All frames are JSON text discriminated by a `type` tag. Inbound frames
//! carry the session identity token on every message after the initial
//! `pushTrack` join; the receiver verifies it before acting.

use serde::{Deserialize, Serialize};

/// One local track binding in a `pushTrack` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackSpec {
    /// SDP media-line id correlating the track to a transceiver.
    #[serde(rename = "mId")]
    pub mid: String,
    /// Track name; the track's stable identity within the room.
    pub name: String,
}

/// Client-to-server frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Publish the connection's local tracks. The first (and only valid)
    /// `pushTrack` on a connection is the join: it creates the external SFU
    /// session and yields the session identity token in the reply.
    #[serde(rename = "pushTrack")]
    PushTrack { sdp: String, tracks: Vec<TrackSpec> },

    /// Answer to a previously delivered `rtcOffer`.
    #[serde(rename = "rtcAnswer")]
    RtcAnswer { sdp: String, token: String },

    /// Presence: the sender paused its local video track.
    #[serde(rename = "pause_video")]
    PauseVideo { name: String, token: String },

    /// Presence: the sender resumed its local video track.
    #[serde(rename = "resume_video")]
    ResumeVideo { name: String, token: String },
}

/// Server-to-client frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Answer to a `pushTrack`. Carries the session identity token exactly
    /// once, on the join reply.
    #[serde(rename = "rtcAnswer")]
    RtcAnswer {
        sdp: String,
        #[serde(
            rename = "sessionIdentityToken",
            skip_serializing_if = "Option::is_none"
        )]
        session_identity_token: Option<String>,
    },

    /// A renegotiation offer the client must answer via `rtcAnswer`.
    #[serde(rename = "rtcOffer")]
    RtcOffer { sdp: String },

    /// Something changed in the room registry; re-check the version.
    /// Receivers only ever raise their watermark, never lower it.
    #[serde(rename = "poke")]
    Poke { version: u64 },

    /// Presence fan-out: a peer paused the named track.
    #[serde(rename = "pause_remote_video")]
    PauseRemoteVideo {
        name: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Presence fan-out: a peer resumed the named track.
    #[serde(rename = "resume_remote_video")]
    ResumeRemoteVideo {
        name: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },

    /// Explicit failure for request/response exchanges (the `pushTrack`
    /// join); everything else is silently dropped and repaired by resync.
    #[serde(rename = "error")]
    Error { code: i32, message: String },
}

/// Parse a client frame, rejecting anything schema-invalid.
///
/// # Errors
///
/// Returns the serde error for non-JSON input or an unknown/invalid variant.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Parse a server frame, rejecting anything schema-invalid.
///
/// # Errors
///
/// Returns the serde error for non-JSON input or an unknown/invalid variant.
pub fn parse_server_message(raw: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_push_track_round_trip() {
        let raw = r#"{"type":"pushTrack","sdp":"v=0","tracks":[{"mId":"0","name":"cam-1"}]}"#;
        let msg = parse_client_message(raw).unwrap();
        match &msg {
            ClientMessage::PushTrack { sdp, tracks } => {
                assert_eq!(sdp, "v=0");
                assert_eq!(tracks, &[TrackSpec {
                    mid: "0".to_string(),
                    name: "cam-1".to_string(),
                }]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }

        let encoded = serde_json::to_string(&msg).unwrap();
        assert_eq!(parse_client_message(&encoded).unwrap(), msg);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(parse_client_message(r#"{"type":"teleport","sdp":"v=0"}"#).is_err());
        assert!(parse_server_message(r#"{"type":"teleport"}"#).is_err());
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        // pushTrack without tracks
        assert!(parse_client_message(r#"{"type":"pushTrack","sdp":"v=0"}"#).is_err());
        // poke without version
        assert!(parse_server_message(r#"{"type":"poke"}"#).is_err());
    }

    #[test]
    fn test_non_json_is_rejected() {
        assert!(parse_client_message("not json at all").is_err());
    }

    #[test]
    fn test_rtc_answer_token_elided_when_absent() {
        let msg = ServerMessage::RtcAnswer {
            sdp: "v=0".to_string(),
            session_identity_token: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("sessionIdentityToken"));

        let joined = ServerMessage::RtcAnswer {
            sdp: "v=0".to_string(),
            session_identity_token: Some("jwt".to_string()),
        };
        let json = serde_json::to_string(&joined).unwrap();
        assert!(json.contains("\"sessionIdentityToken\":\"jwt\""));
    }

    #[test]
    fn test_poke_wire_shape() {
        let json = serde_json::to_string(&ServerMessage::Poke { version: 4 }).unwrap();
        assert_eq!(json, r#"{"type":"poke","version":4}"#);
    }

    #[test]
    fn test_presence_wire_shape() {
        let json = serde_json::to_string(&ServerMessage::PauseRemoteVideo {
            name: "cam-1".to_string(),
            session_id: "s-1".to_string(),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"type":"pause_remote_video","name":"cam-1","sessionId":"s-1"}"#
        );
    }
}
