//! The diff-and-renegotiate loop.
//!
//! The reconciler owns the participant's lifecycle: permission check, media
//! acquisition, the join, and then an endless converge loop. Convergence is
//! version-driven: the server's listing carries a registry version, the
//! reconciler remembers the last version it fully applied (the watermark),
//! and a sync pass that fetches the watermarked version is a no-op with zero
//! server calls beyond the fetch itself.
//!
//! Pokes are hints, not commands: they only ever raise the remembered server
//! version. The periodic timer resyncs unconditionally, so a dropped poke
//! delays convergence by at most one interval.

use crate::api::{ClientError, RoomEvent, SignalingApi};
use crate::diff::find_diff;
use crate::media::{MediaError, MediaSession, MediaSource, PermissionState};

use signaling_protocol::{RemoteTrackEntry, TrackSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed resync interval while idle.
pub const RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle states, in rough order of progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    DeterminingPermission,
    PermissionDenied,
    UnableToGetMediaStream,
    JoiningRoom,
    SyncWithRoom,
    RoomInSync,
}

/// A remote track we currently receive.
#[derive(Debug, Clone)]
struct SyncedTrack {
    name: String,
    session_id: String,
    /// Receiving mid in our own session.
    mid: String,
}

pub struct Reconciler {
    api: Arc<dyn SignalingApi>,
    media: Arc<dyn MediaSession>,
    source: Arc<dyn MediaSource>,
    state: ReconcilerState,
    token: Option<String>,
    synced: Vec<SyncedTrack>,
    /// Last registry version fully applied.
    watermark: u64,
    /// Highest version the server has hinted at; never lowered.
    server_version: u64,
}

impl Reconciler {
    #[must_use]
    pub fn new(
        api: Arc<dyn SignalingApi>,
        media: Arc<dyn MediaSession>,
        source: Arc<dyn MediaSource>,
    ) -> Self {
        Self {
            api,
            media,
            source,
            state: ReconcilerState::DeterminingPermission,
            token: None,
            synced: Vec::new(),
            watermark: 0,
            server_version: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> ReconcilerState {
        self.state
    }

    #[must_use]
    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    /// Names of the tracks currently received, for diagnostics and tests.
    #[must_use]
    pub fn synced_names(&self) -> Vec<String> {
        self.synced.iter().map(|t| t.name.clone()).collect()
    }

    /// Check permission, acquire media, publish, and converge once.
    ///
    /// # Errors
    ///
    /// Permission and acquisition failures are terminal (the state records
    /// which); signaling failures leave the reconciler joinable again.
    pub async fn join(&mut self) -> Result<(), ClientError> {
        self.state = ReconcilerState::DeterminingPermission;
        match self.source.query_permission().await {
            PermissionState::Denied => {
                self.state = ReconcilerState::PermissionDenied;
                return Err(ClientError::PermissionDenied);
            }
            // Pending means acquisition will prompt; proceed either way.
            PermissionState::Granted | PermissionState::Pending => {}
        }

        let local_tracks = match self.source.acquire_tracks().await {
            Ok(tracks) if !tracks.is_empty() => tracks,
            Ok(_) => {
                self.state = ReconcilerState::UnableToGetMediaStream;
                return Err(MediaError::Acquisition("no local tracks".to_string()).into());
            }
            Err(e) => {
                self.state = ReconcilerState::UnableToGetMediaStream;
                return Err(e.into());
            }
        };

        self.state = ReconcilerState::JoiningRoom;
        let offer_sdp = self.media.create_offer().await?;
        let specs: Vec<TrackSpec> = local_tracks
            .iter()
            .map(|t| TrackSpec {
                mid: t.mid.clone(),
                name: t.name.clone(),
            })
            .collect();

        let grant = self.api.push_track(&offer_sdp, &specs).await?;
        self.media.apply_answer(&grant.answer_sdp).await?;
        self.token = Some(grant.token);

        info!(target: "client.reconciler", "joined; starting initial sync");
        self.sync().await
    }

    /// Run sync passes until a fetch comes back at the watermark.
    ///
    /// # Errors
    ///
    /// Returns the first signaling or media failure; the caller retries on
    /// the next tick rather than immediately.
    pub async fn sync(&mut self) -> Result<(), ClientError> {
        self.state = ReconcilerState::SyncWithRoom;
        // The server may move while we renegotiate, so loop until a fetch
        // matches what we already applied.
        while self.sync_once().await? {}
        self.state = ReconcilerState::RoomInSync;
        Ok(())
    }

    /// One fetch-diff-apply pass. Returns whether anything was applied.
    async fn sync_once(&mut self) -> Result<bool, ClientError> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| ClientError::Protocol("sync before join".to_string()))?;

        let listing = self.api.local_tracks(&token).await?;
        self.server_version = self.server_version.max(listing.version);

        if listing.version == self.watermark {
            return Ok(false);
        }

        let synced_names: Vec<String> = self.synced.iter().map(|t| t.name.clone()).collect();
        let diff = find_diff(&synced_names, &listing.tracks);
        debug!(
            target: "client.reconciler",
            version = listing.version,
            watermark = self.watermark,
            to_add = diff.to_add.len(),
            to_remove = diff.to_remove.len(),
            "sync pass"
        );

        if !diff.to_add.is_empty() {
            let refs: Vec<RemoteTrackEntry> = diff
                .to_add
                .iter()
                .map(|t| RemoteTrackEntry {
                    session_id: t.session_id.clone(),
                    track_name: t.name.clone(),
                })
                .collect();

            let grant = self.api.pull_tracks(&token, &refs).await?;
            if let Some(offer_sdp) = grant.offer_sdp {
                let answer_sdp = self.media.apply_offer_and_answer(&offer_sdp).await?;
                self.api.renegotiate(&token, &answer_sdp).await?;
            }
            for granted in grant.granted {
                self.synced.push(SyncedTrack {
                    name: granted.name,
                    session_id: granted.session_id,
                    mid: granted.mid,
                });
            }
        }

        if !diff.to_remove.is_empty() {
            let mids: Vec<String> = self
                .synced
                .iter()
                .filter(|t| diff.to_remove.contains(&t.name))
                .map(|t| t.mid.clone())
                .collect();

            self.media.stop_transceivers(&mids).await?;
            let offer_sdp = self.media.create_offer().await?;
            if let Some(answer_sdp) = self.api.close_tracks(&token, &offer_sdp, &mids).await? {
                self.media.apply_answer(&answer_sdp).await?;
            }
            self.synced.retain(|t| !diff.to_remove.contains(&t.name));
        }

        self.watermark = listing.version;
        Ok(true)
    }

    /// Absorb a server event. Pokes only raise the remembered version;
    /// presence toggles the matching received track.
    pub fn handle_event(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Poke { version } => {
                self.server_version = self.server_version.max(version);
            }
            RoomEvent::PauseRemoteVideo { name, session_id } => {
                self.set_remote_enabled(&name, &session_id, false);
            }
            RoomEvent::ResumeRemoteVideo { name, session_id } => {
                self.set_remote_enabled(&name, &session_id, true);
            }
        }
    }

    fn set_remote_enabled(&self, name: &str, session_id: &str, enabled: bool) {
        let Some(track) = self
            .synced
            .iter()
            .find(|t| t.name == name && t.session_id == session_id)
        else {
            debug!(
                target: "client.reconciler",
                name = %name,
                session_id = %session_id,
                "presence for unknown track"
            );
            return;
        };
        self.media.set_track_enabled(&track.mid, enabled);
    }

    /// Join, then converge forever: sync on pokes that outrun the watermark
    /// and unconditionally on the 1-second timer.
    pub async fn run(mut self, mut events: mpsc::Receiver<RoomEvent>, cancel: CancellationToken) {
        if let Err(e) = self.join().await {
            warn!(target: "client.reconciler", error = %e, "join failed");
            return;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let is_poke = matches!(event, RoomEvent::Poke { .. });
                    self.handle_event(event);
                    if is_poke && self.server_version > self.watermark {
                        if let Err(e) = self.sync().await {
                            warn!(
                                target: "client.reconciler",
                                error = %e,
                                "sync failed; retrying on next tick"
                            );
                        }
                    }
                }
                () = tokio::time::sleep(RESYNC_INTERVAL) => {
                    if let Err(e) = self.sync().await {
                        warn!(
                            target: "client.reconciler",
                            error = %e,
                            "periodic sync failed; retrying on next tick"
                        );
                    }
                }
            }
        }
    }
}
