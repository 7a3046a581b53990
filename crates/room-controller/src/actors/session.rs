//! `PeerSessionActor` - per-participant actor guarding the SFU session
//! lifecycle.
//!
//! Each participant gets at most one SFU session, ever. The actor serializes
//! all SFU calls for its participant, and the session id is persisted through
//! [`SessionStore`] before the creating operation reports success, so the
//! exactly-once guard holds across restarts.

use super::messages::SessionMessage;
use crate::errors::{ConflictError, SignalError};
use crate::sfu::{LocalTrackBinding, PullOutcome, RemoteTrackRef, SfuApi};
use crate::store::SessionStore;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 64;

/// Handle to a `PeerSessionActor`.
#[derive(Clone)]
pub struct PeerSessionHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
}

impl PeerSessionHandle {
    /// Create the SFU session without publishing (HTTP bootstrap). Returns
    /// the new session id.
    pub async fn create_session(&self) -> Result<String, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::CreateSession { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// First publication: create the SFU session and push the tracks.
    /// Returns `(answer_sdp, sfu_session_id)`.
    pub async fn push_local_tracks(
        &self,
        offer_sdp: String,
        tracks: Vec<LocalTrackBinding>,
    ) -> Result<(String, String), SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::PushLocalTracks {
                offer_sdp,
                tracks,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Publish additional tracks into the existing session.
    pub async fn add_local_tracks(
        &self,
        offer_sdp: String,
        tracks: Vec<LocalTrackBinding>,
    ) -> Result<String, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::AddLocalTracks {
                offer_sdp,
                tracks,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Pull remote tracks into the existing session.
    pub async fn push_remote_tracks(
        &self,
        tracks: Vec<RemoteTrackRef>,
    ) -> Result<PullOutcome, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::PushRemoteTracks {
                tracks,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Deliver the client's answer to complete a renegotiation.
    pub async fn renegotiate(&self, answer_sdp: String) -> Result<(), SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Renegotiate {
                answer_sdp,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Close tracks by mid.
    pub async fn close_tracks(
        &self,
        offer_sdp: Option<String>,
        mids: Vec<String>,
    ) -> Result<Option<String>, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::CloseTracks {
                offer_sdp,
                mids,
                respond_to: tx,
            })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// Best-effort cleanup on disconnect.
    pub async fn teardown(&self) -> Result<(), SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::Teardown { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))?
    }

    /// The SFU session id, if the session was created.
    pub async fn session_id(&self) -> Result<Option<String>, SignalError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(SessionMessage::GetSessionId { respond_to: tx })
            .await
            .map_err(|e| SignalError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `PeerSessionActor` implementation.
pub struct PeerSessionActor {
    /// Room this participant joined.
    room: String,
    /// The participant's stable id (WebSocket connection id or the
    /// `userSessionId` of an HTTP bootstrap).
    participant_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<SessionMessage>,
    /// Cancellation token (child of the hub's token).
    cancel_token: CancellationToken,
    /// The SFU session id, once created.
    sfu_session_id: Option<String>,
    /// Mids this session published; closed best-effort on teardown.
    local_mids: Vec<String>,
    /// SFU client.
    sfu: Arc<dyn SfuApi>,
    /// Persistence for the exactly-once guard.
    store: Arc<dyn SessionStore>,
}

impl PeerSessionActor {
    /// Spawn a new peer-session actor, reloading any persisted session id so
    /// the exactly-once guard survives restarts.
    ///
    /// Returns a handle and the task join handle.
    pub async fn spawn(
        room: String,
        participant_id: String,
        cancel_token: CancellationToken,
        sfu: Arc<dyn SfuApi>,
        store: Arc<dyn SessionStore>,
    ) -> (PeerSessionHandle, JoinHandle<()>) {
        let persisted = match store.load(&room, &participant_id).await {
            Ok(id) => id,
            Err(e) => {
                // Treat an unreadable record as absent; the save path will
                // surface persistent storage trouble.
                warn!(
                    target: "rc.actor.session",
                    room = %room,
                    participant_id = %participant_id,
                    error = %e,
                    "failed to load persisted session id"
                );
                None
            }
        };

        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            room,
            participant_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sfu_session_id: persisted,
            local_mids: Vec::new(),
            sfu,
            store,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerSessionHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "rc.actor.session",
        fields(room = %self.room, participant_id = %self.participant_id)
    )]
    async fn run(mut self) {
        info!(
            target: "rc.actor.session",
            room = %self.room,
            participant_id = %self.participant_id,
            resumed = self.sfu_session_id.is_some(),
            "PeerSessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.session",
                        participant_id = %self.participant_id,
                        "PeerSessionActor cancelled"
                    );
                    break;
                }
                message = self.receiver.recv() => {
                    match message {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::CreateSession { respond_to } => {
                let result = self.create_session().await;
                let _ = respond_to.send(result);
            }
            SessionMessage::PushLocalTracks {
                offer_sdp,
                tracks,
                respond_to,
            } => {
                let result = self.push_local_tracks(&offer_sdp, tracks).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::AddLocalTracks {
                offer_sdp,
                tracks,
                respond_to,
            } => {
                let result = self.add_local_tracks(&offer_sdp, tracks).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::PushRemoteTracks { tracks, respond_to } => {
                let result = self.push_remote_tracks(tracks).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Renegotiate {
                answer_sdp,
                respond_to,
            } => {
                let result = self.renegotiate(&answer_sdp).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::CloseTracks {
                offer_sdp,
                mids,
                respond_to,
            } => {
                let result = self.close_tracks(offer_sdp.as_deref(), mids).await;
                let _ = respond_to.send(result);
            }
            SessionMessage::Teardown { respond_to } => {
                let result = self.teardown().await;
                let _ = respond_to.send(result);
            }
            SessionMessage::GetSessionId { respond_to } => {
                let _ = respond_to.send(self.sfu_session_id.clone());
            }
        }
    }

    /// Require the session to exist, returning its id.
    fn require_session(&self) -> Result<String, SignalError> {
        self.sfu_session_id
            .clone()
            .ok_or_else(|| ConflictError::NotInitialized.into())
    }

    async fn create_session(&mut self) -> Result<String, SignalError> {
        if self.sfu_session_id.is_some() {
            return Err(ConflictError::AlreadyInitialized.into());
        }

        let session_id = self.sfu.new_session().await?;

        // Persist before reporting success, so a crash between here and the
        // reply can never mint a second session for this participant.
        self.store
            .save(&self.room, &self.participant_id, &session_id)
            .await
            .map_err(|e| SignalError::Internal(e.to_string()))?;
        self.sfu_session_id = Some(session_id.clone());

        info!(
            target: "rc.actor.session",
            participant_id = %self.participant_id,
            sfu_session_id = %session_id,
            "SFU session created"
        );

        Ok(session_id)
    }

    async fn push_local_tracks(
        &mut self,
        offer_sdp: &str,
        tracks: Vec<LocalTrackBinding>,
    ) -> Result<(String, String), SignalError> {
        let session_id = self.create_session().await?;

        let answer_sdp = self
            .sfu
            .push_local_tracks(&session_id, offer_sdp, &tracks)
            .await?;

        self.local_mids.extend(tracks.into_iter().map(|t| t.mid));

        Ok((answer_sdp, session_id))
    }

    async fn add_local_tracks(
        &mut self,
        offer_sdp: &str,
        tracks: Vec<LocalTrackBinding>,
    ) -> Result<String, SignalError> {
        let session_id = self.require_session()?;
        let answer_sdp = self
            .sfu
            .push_local_tracks(&session_id, offer_sdp, &tracks)
            .await?;
        self.local_mids.extend(tracks.into_iter().map(|t| t.mid));
        Ok(answer_sdp)
    }

    async fn push_remote_tracks(
        &mut self,
        tracks: Vec<RemoteTrackRef>,
    ) -> Result<PullOutcome, SignalError> {
        let session_id = self.require_session()?;
        Ok(self.sfu.pull_remote_tracks(&session_id, &tracks).await?)
    }

    async fn renegotiate(&mut self, answer_sdp: &str) -> Result<(), SignalError> {
        let session_id = self.require_session()?;
        Ok(self.sfu.renegotiate(&session_id, answer_sdp).await?)
    }

    async fn close_tracks(
        &mut self,
        offer_sdp: Option<&str>,
        mids: Vec<String>,
    ) -> Result<Option<String>, SignalError> {
        let session_id = self.require_session()?;
        let answer = self.sfu.close_tracks(&session_id, offer_sdp, &mids).await?;
        self.local_mids.retain(|mid| !mids.contains(mid));
        Ok(answer)
    }

    /// Close this session's publications at the SFU without an offer (the
    /// peer connection is gone, there is nobody to renegotiate with).
    async fn teardown(&mut self) -> Result<(), SignalError> {
        let Some(session_id) = self.sfu_session_id.clone() else {
            return Ok(());
        };

        if !self.local_mids.is_empty() {
            if let Err(e) = self
                .sfu
                .close_tracks(&session_id, None, &self.local_mids)
                .await
            {
                // Best effort: the SFU reaps orphaned sessions on its own.
                warn!(
                    target: "rc.actor.session",
                    participant_id = %self.participant_id,
                    error = %e,
                    "teardown close failed"
                );
            }
            self.local_mids.clear();
        }

        if let Err(e) = self.store.remove(&self.room, &self.participant_id).await {
            warn!(
                target: "rc.actor.session",
                participant_id = %self.participant_id,
                error = %e,
                "failed to remove persisted session id"
            );
        }

        debug!(
            target: "rc.actor.session",
            participant_id = %self.participant_id,
            sfu_session_id = %session_id,
            "session torn down"
        );
        Ok(())
    }
}
