//! Client for the managed SFU HTTP API.
//!
//! The SFU is an external service: it terminates WebRTC peer connections and
//! forwards media, while this controller only moves SDP and track metadata
//! over its HTTP API. [`SfuApi`] is the seam the actors program against;
//! [`HttpSfuClient`] is the production implementation.
//!
//! Endpoint shape (`{base}/apps/{app_id}/...`):
//!
//! - `POST sessions/new` creates a session, returns its id
//! - `POST sessions/{id}/tracks/new` publishes local tracks (with an offer)
//!   or pulls remote tracks by `(session_id, name)`
//! - `PUT sessions/{id}/renegotiate` completes a renegotiation with an answer
//! - `PUT sessions/{id}/tracks/close` closes tracks by mid

use crate::errors::ExternalServiceError;
use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use signaling_protocol::SessionDescription;
use tracing::{debug, warn};

/// A local track to publish: SDP media line id and room-unique name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrackBinding {
    pub mid: String,
    pub name: String,
}

/// A remote track to pull, addressed by its owning SFU session and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackRef {
    pub session_id: String,
    pub name: String,
}

/// One successfully pulled remote track, with the mid the SFU assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledTrack {
    pub mid: String,
    pub name: String,
    pub session_id: String,
}

/// Result of a remote-track pull. Per-track failures are dropped from
/// `granted` rather than failing the whole call; the requester simply does
/// not receive those tracks and a later resync retries them.
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    pub granted: Vec<PulledTrack>,
    /// Offer the puller must answer, present when the pull changed the
    /// session's transceivers.
    pub offer_sdp: Option<String>,
}

/// Operations the controller needs from the SFU.
#[async_trait]
pub trait SfuApi: Send + Sync {
    /// Create a new SFU session and return its id.
    async fn new_session(&self) -> Result<String, ExternalServiceError>;

    /// Publish local tracks into a session. The offer describes the new
    /// transceivers; the returned SDP is the SFU's answer.
    async fn push_local_tracks(
        &self,
        session_id: &str,
        offer_sdp: &str,
        tracks: &[LocalTrackBinding],
    ) -> Result<String, ExternalServiceError>;

    /// Pull remote tracks into a session by `(owning session, name)`.
    async fn pull_remote_tracks(
        &self,
        session_id: &str,
        tracks: &[RemoteTrackRef],
    ) -> Result<PullOutcome, ExternalServiceError>;

    /// Complete a renegotiation by delivering the client's answer.
    async fn renegotiate(&self, session_id: &str, answer_sdp: &str)
        -> Result<(), ExternalServiceError>;

    /// Close tracks by mid. When the closer published the tracks it supplies
    /// an offer and receives the SFU's answer back.
    async fn close_tracks(
        &self,
        session_id: &str,
        offer_sdp: Option<&str>,
        mids: &[String],
    ) -> Result<Option<String>, ExternalServiceError>;
}

// ----------------------------------------------------------------------------
// Wire DTOs (SFU API shapes, internal to this module)
// ----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewSessionWire {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Serialize)]
struct TrackObjectWire {
    location: &'static str,
    #[serde(rename = "trackName")]
    track_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mid: Option<String>,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct TracksNewWire {
    #[serde(rename = "sessionDescription", skip_serializing_if = "Option::is_none")]
    session_description: Option<SessionDescription>,
    tracks: Vec<TrackObjectWire>,
}

#[derive(Debug, Deserialize)]
struct TrackResultWire {
    #[serde(rename = "trackName")]
    track_name: Option<String>,
    mid: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorDescription")]
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TracksNewResponseWire {
    #[serde(rename = "sessionDescription")]
    session_description: Option<SessionDescription>,
    tracks: Option<Vec<TrackResultWire>>,
}

#[derive(Debug, Serialize)]
struct RenegotiateWire {
    #[serde(rename = "sessionDescription")]
    session_description: SessionDescription,
}

#[derive(Debug, Serialize)]
struct CloseTrackWire {
    mid: String,
}

#[derive(Debug, Serialize)]
struct TracksCloseWire {
    #[serde(rename = "sessionDescription", skip_serializing_if = "Option::is_none")]
    session_description: Option<SessionDescription>,
    tracks: Vec<CloseTrackWire>,
    force: bool,
}

#[derive(Debug, Deserialize)]
struct TracksCloseResponseWire {
    #[serde(rename = "sessionDescription")]
    session_description: Option<SessionDescription>,
}

// ----------------------------------------------------------------------------
// Production client
// ----------------------------------------------------------------------------

/// HTTP implementation of [`SfuApi`] using bearer-token auth.
pub struct HttpSfuClient {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    api_token: SecretString,
}

impl HttpSfuClient {
    #[must_use]
    pub fn new(base_url: String, app_id: String, api_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            api_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/apps/{}/{path}", self.base_url, self.app_id)
    }

    async fn send<B, R>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &B,
    ) -> Result<R, ExternalServiceError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = self.url(path);
        debug!(target: "rc.sfu", %url, "SFU request");

        let response = self
            .client
            .request(method, &url)
            .bearer_auth(self.api_token.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ExternalServiceError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExternalServiceError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(target: "rc.sfu", %url, %status, "SFU returned error status");
            return Err(ExternalServiceError::Transport(format!(
                "{status}: {text}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| ExternalServiceError::Transport(format!("bad SFU response: {e}")))
    }
}

#[async_trait]
impl SfuApi for HttpSfuClient {
    async fn new_session(&self) -> Result<String, ExternalServiceError> {
        let wire: NewSessionWire = self
            .send(reqwest::Method::POST, "sessions/new", &serde_json::json!({}))
            .await
            .map_err(|e| ExternalServiceError::SessionCreationFailed(e.to_string()))?;
        Ok(wire.session_id)
    }

    async fn push_local_tracks(
        &self,
        session_id: &str,
        offer_sdp: &str,
        tracks: &[LocalTrackBinding],
    ) -> Result<String, ExternalServiceError> {
        let body = TracksNewWire {
            session_description: Some(SessionDescription::offer(offer_sdp)),
            tracks: tracks
                .iter()
                .map(|t| TrackObjectWire {
                    location: "local",
                    track_name: t.name.clone(),
                    mid: Some(t.mid.clone()),
                    session_id: None,
                })
                .collect(),
        };

        let wire: TracksNewResponseWire = self
            .send(
                reqwest::Method::POST,
                &format!("sessions/{session_id}/tracks/new"),
                &body,
            )
            .await
            .map_err(|e| ExternalServiceError::TrackPushFailed(e.to_string()))?;

        if let Some(result_tracks) = &wire.tracks {
            for t in result_tracks {
                if let Some(code) = &t.error_code {
                    return Err(ExternalServiceError::TrackPushFailed(format!(
                        "track {:?}: {code} {}",
                        t.track_name,
                        t.error_description.as_deref().unwrap_or("")
                    )));
                }
            }
        }

        wire.session_description
            .map(|sd| sd.sdp)
            .ok_or(ExternalServiceError::MissingAnswer)
    }

    async fn pull_remote_tracks(
        &self,
        session_id: &str,
        tracks: &[RemoteTrackRef],
    ) -> Result<PullOutcome, ExternalServiceError> {
        let body = TracksNewWire {
            session_description: None,
            tracks: tracks
                .iter()
                .map(|t| TrackObjectWire {
                    location: "remote",
                    track_name: t.name.clone(),
                    mid: None,
                    session_id: Some(t.session_id.clone()),
                })
                .collect(),
        };

        let wire: TracksNewResponseWire = self
            .send(
                reqwest::Method::POST,
                &format!("sessions/{session_id}/tracks/new"),
                &body,
            )
            .await
            .map_err(|e| ExternalServiceError::TrackPushFailed(e.to_string()))?;

        let mut granted = Vec::new();
        for t in wire.tracks.unwrap_or_default() {
            if let Some(code) = &t.error_code {
                // Per-track failure: skip it, resync retries later.
                warn!(
                    target: "rc.sfu",
                    track_name = ?t.track_name,
                    error_code = %code,
                    error = ?t.error_description,
                    "SFU rejected remote track pull"
                );
                continue;
            }
            if let (Some(mid), Some(name), Some(owner)) = (t.mid, t.track_name, t.session_id) {
                granted.push(PulledTrack {
                    mid,
                    name,
                    session_id: owner,
                });
            }
        }

        Ok(PullOutcome {
            granted,
            offer_sdp: wire.session_description.map(|sd| sd.sdp),
        })
    }

    async fn renegotiate(
        &self,
        session_id: &str,
        answer_sdp: &str,
    ) -> Result<(), ExternalServiceError> {
        let body = RenegotiateWire {
            session_description: SessionDescription::answer(answer_sdp),
        };

        let _: serde_json::Value = self
            .send(
                reqwest::Method::PUT,
                &format!("sessions/{session_id}/renegotiate"),
                &body,
            )
            .await
            .map_err(|e| ExternalServiceError::RenegotiationFailed(e.to_string()))?;

        Ok(())
    }

    async fn close_tracks(
        &self,
        session_id: &str,
        offer_sdp: Option<&str>,
        mids: &[String],
    ) -> Result<Option<String>, ExternalServiceError> {
        let body = TracksCloseWire {
            session_description: offer_sdp.map(SessionDescription::offer),
            tracks: mids
                .iter()
                .map(|mid| CloseTrackWire { mid: mid.clone() })
                .collect(),
            force: offer_sdp.is_none(),
        };

        let wire: TracksCloseResponseWire = self
            .send(
                reqwest::Method::PUT,
                &format!("sessions/{session_id}/tracks/close"),
                &body,
            )
            .await?;

        Ok(wire.session_description.map(|sd| sd.sdp))
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory [`SfuApi`] double for actor and hub tests.

    use super::{
        ExternalServiceError, LocalTrackBinding, PullOutcome, PulledTrack, RemoteTrackRef, SfuApi,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Scripted SFU that records every call and fabricates SDP answers.
    #[derive(Default)]
    pub struct MockSfu {
        session_counter: AtomicU64,
        pub fail_new_session: AtomicBool,
        pub fail_push: AtomicBool,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockSfu {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn record(&self, call: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|c| c.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl SfuApi for MockSfu {
        async fn new_session(&self) -> Result<String, ExternalServiceError> {
            self.record("new_session".to_string());
            if self.fail_new_session.load(Ordering::SeqCst) {
                return Err(ExternalServiceError::SessionCreationFailed(
                    "scripted failure".to_string(),
                ));
            }
            let n = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("sfu-session-{n}"))
        }

        async fn push_local_tracks(
            &self,
            session_id: &str,
            _offer_sdp: &str,
            tracks: &[LocalTrackBinding],
        ) -> Result<String, ExternalServiceError> {
            self.record(format!("push_local:{session_id}:{}", tracks.len()));
            if self.fail_push.load(Ordering::SeqCst) {
                return Err(ExternalServiceError::TrackPushFailed(
                    "scripted failure".to_string(),
                ));
            }
            Ok(format!("v=0 answer for {session_id}"))
        }

        async fn pull_remote_tracks(
            &self,
            session_id: &str,
            tracks: &[RemoteTrackRef],
        ) -> Result<PullOutcome, ExternalServiceError> {
            self.record(format!("pull_remote:{session_id}:{}", tracks.len()));
            let granted = tracks
                .iter()
                .enumerate()
                .map(|(i, t)| PulledTrack {
                    mid: format!("pulled-{i}"),
                    name: t.name.clone(),
                    session_id: t.session_id.clone(),
                })
                .collect();
            Ok(PullOutcome {
                granted,
                offer_sdp: Some(format!("v=0 offer for {session_id}")),
            })
        }

        async fn renegotiate(
            &self,
            session_id: &str,
            _answer_sdp: &str,
        ) -> Result<(), ExternalServiceError> {
            self.record(format!("renegotiate:{session_id}"));
            Ok(())
        }

        async fn close_tracks(
            &self,
            session_id: &str,
            offer_sdp: Option<&str>,
            mids: &[String],
        ) -> Result<Option<String>, ExternalServiceError> {
            self.record(format!("close:{session_id}:{}", mids.len()));
            Ok(offer_sdp.map(|_| format!("v=0 answer for {session_id}")))
        }
    }
}
