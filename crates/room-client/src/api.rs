//! Client-side view of the signaling protocol.
//!
//! [`SignalingApi`] is the seam the reconciler drives; [`HttpSignalingApi`]
//! implements it over the controller's HTTP surface (the bootstrap path that
//! does not need a WebSocket). Inbound room events (pokes, presence) arrive
//! separately as [`RoomEvent`]s, fed to the reconciler by whatever owns the
//! event channel.

use crate::media::MediaError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use signaling_protocol::{
    CloseTrackEntry, CloseTracksRequest, CloseTracksResponse, GrantedTrack, LocalTrackEntry,
    LocalTracksResponse, NewSessionRequest, NewSessionResponse, RemoteTrackEntry,
    RenegotiateRequest, SessionDescription, TrackSpec, TracksNewRequest, TracksNewResponse,
    SESSION_IDENTITY_HEADER,
};
use thiserror::Error;

/// Server-initiated events delivered over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// The room registry moved; `version` is a floor for the server state.
    Poke { version: u64 },
    PauseRemoteVideo { name: String, session_id: String },
    ResumeRemoteVideo { name: String, session_id: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server rejected request ({status}): {message}")]
    Api { status: u16, message: String },

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("media permission denied")]
    PermissionDenied,

    #[error("protocol violation: {0}")]
    Protocol(String),
}

/// Successful join: the answer to our offer and the identity token for all
/// further calls.
#[derive(Debug, Clone)]
pub struct JoinGrant {
    pub answer_sdp: String,
    pub token: String,
}

/// Successful remote-track pull.
#[derive(Debug, Clone, Default)]
pub struct PullGrant {
    /// Offer to answer via `renegotiate`, when transceivers changed.
    pub offer_sdp: Option<String>,
    pub granted: Vec<GrantedTrack>,
}

/// Operations the reconciler needs from the signaling server.
#[async_trait]
pub trait SignalingApi: Send + Sync {
    /// Join the room by publishing the initial local tracks.
    async fn push_track(
        &self,
        offer_sdp: &str,
        tracks: &[TrackSpec],
    ) -> Result<JoinGrant, ClientError>;

    /// The other sessions' publications, with the registry version.
    async fn local_tracks(&self, token: &str) -> Result<LocalTracksResponse, ClientError>;

    /// Pull remote tracks by `(session, name)`.
    async fn pull_tracks(
        &self,
        token: &str,
        tracks: &[RemoteTrackEntry],
    ) -> Result<PullGrant, ClientError>;

    /// Complete a renegotiation with our answer.
    async fn renegotiate(&self, token: &str, answer_sdp: &str) -> Result<(), ClientError>;

    /// Close receiving tracks by mid; returns the server's answer to our
    /// offer, if any.
    async fn close_tracks(
        &self,
        token: &str,
        offer_sdp: &str,
        mids: &[String],
    ) -> Result<Option<String>, ClientError>;
}

/// [`SignalingApi`] over the controller's HTTP surface.
pub struct HttpSignalingApi {
    client: reqwest::Client,
    base_url: String,
    user_session_id: String,
    room: String,
}

impl HttpSignalingApi {
    #[must_use]
    pub fn new(base_url: String, user_session_id: String, room: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_session_id,
            room,
        }
    }

    async fn call<B, R>(
        &self,
        method: reqwest::Method,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<R, ClientError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let mut request = self
            .client
            .request(method, format!("{}/{path}", self.base_url))
            .json(body);
        if let Some(token) = token {
            request = request.header(SESSION_IDENTITY_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v.pointer("/error/message")
                        .and_then(|m| m.as_str().map(String::from))
                })
                .unwrap_or(text);
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| ClientError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl SignalingApi for HttpSignalingApi {
    async fn push_track(
        &self,
        offer_sdp: &str,
        tracks: &[TrackSpec],
    ) -> Result<JoinGrant, ClientError> {
        let session: NewSessionResponse = self
            .call(
                reqwest::Method::POST,
                "sessions/new",
                None,
                &NewSessionRequest {
                    user_session_id: self.user_session_id.clone(),
                    room: self.room.clone(),
                },
            )
            .await?;
        let token = session.session_identity_token;

        let response: TracksNewResponse = self
            .call(
                reqwest::Method::POST,
                "tracks/new",
                Some(&token),
                &TracksNewRequest::Local {
                    session_description: SessionDescription::offer(offer_sdp),
                    tracks: tracks
                        .iter()
                        .map(|t| LocalTrackEntry {
                            mid: t.mid.clone(),
                            track_name: t.name.clone(),
                        })
                        .collect(),
                },
            )
            .await?;

        let answer_sdp = response
            .session_description
            .map(|sd| sd.sdp)
            .ok_or_else(|| ClientError::Protocol("join response missing answer".to_string()))?;

        Ok(JoinGrant { answer_sdp, token })
    }

    async fn local_tracks(&self, token: &str) -> Result<LocalTracksResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/local_tracks", self.base_url))
            .header(SESSION_IDENTITY_HEADER, token)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Protocol(e.to_string()))
    }

    async fn pull_tracks(
        &self,
        token: &str,
        tracks: &[RemoteTrackEntry],
    ) -> Result<PullGrant, ClientError> {
        let response: TracksNewResponse = self
            .call(
                reqwest::Method::POST,
                "tracks/new",
                Some(token),
                &TracksNewRequest::Remote {
                    tracks: tracks.to_vec(),
                },
            )
            .await?;

        Ok(PullGrant {
            offer_sdp: response.session_description.map(|sd| sd.sdp),
            granted: response.tracks.unwrap_or_default(),
        })
    }

    async fn renegotiate(&self, token: &str, answer_sdp: &str) -> Result<(), ClientError> {
        let _: serde_json::Value = self
            .call(
                reqwest::Method::PUT,
                "sessions/renegotiate",
                Some(token),
                &RenegotiateRequest {
                    session_description: SessionDescription::answer(answer_sdp),
                },
            )
            .await?;
        Ok(())
    }

    async fn close_tracks(
        &self,
        token: &str,
        offer_sdp: &str,
        mids: &[String],
    ) -> Result<Option<String>, ClientError> {
        let response: CloseTracksResponse = self
            .call(
                reqwest::Method::PUT,
                "tracks/close",
                Some(token),
                &CloseTracksRequest {
                    session_description: SessionDescription::offer(offer_sdp),
                    tracks: mids
                        .iter()
                        .map(|mid| CloseTrackEntry { mid: mid.clone() })
                        .collect(),
                },
            )
            .await?;

        Ok(response.session_description.map(|sd| sd.sdp))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> HttpSignalingApi {
        HttpSignalingApi::new(server.uri(), "u-1".to_string(), "lobby".to_string())
    }

    #[tokio::test]
    async fn test_push_track_bootstraps_then_publishes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/new"))
            .and(body_partial_json(serde_json::json!({
                "userSessionId": "u-1", "room": "lobby"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionIdentityToken": "jwt-1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/tracks/new"))
            .and(header("x-session-identity-token", "jwt-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionDescription": { "type": "answer", "sdp": "v=0 answer" }
            })))
            .mount(&server)
            .await;

        let grant = api_for(&server)
            .push_track(
                "v=0 offer",
                &[TrackSpec {
                    mid: "0".to_string(),
                    name: "cam-1".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(grant.token, "jwt-1");
        assert_eq!(grant.answer_sdp, "v=0 answer");
    }

    #[tokio::test]
    async fn test_api_error_carries_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/local_tracks"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "code": 2, "message": "token expired" }
            })))
            .mount(&server)
            .await;

        let err = api_for(&server).local_tracks("stale").await.unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_pull_tracks_maps_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tracks/new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sessionDescription": { "type": "offer", "sdp": "v=0 offer" },
                "tracks": [{ "mid": "5", "name": "cam-2", "sessionId": "s-2" }]
            })))
            .mount(&server)
            .await;

        let grant = api_for(&server)
            .pull_tracks(
                "jwt-1",
                &[RemoteTrackEntry {
                    session_id: "s-2".to_string(),
                    track_name: "cam-2".to_string(),
                }],
            )
            .await
            .unwrap();
        assert_eq!(grant.offer_sdp.as_deref(), Some("v=0 offer"));
        assert_eq!(grant.granted.len(), 1);
        assert_eq!(grant.granted[0].session_id, "s-2");
    }
}
