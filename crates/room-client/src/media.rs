//! Seams around the platform's media machinery.
//!
//! The reconciler never talks to WebRTC directly; an embedder supplies a
//! [`MediaSource`] (camera/microphone acquisition and permission state) and
//! a [`MediaSession`] (the peer connection) and the reconciler drives them.

use async_trait::async_trait;
use thiserror::Error;

/// Camera/microphone permission as reported before acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Granted,
    Denied,
    /// The user has not decided yet; acquisition will prompt.
    Pending,
}

/// A local media track bound to a transceiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    /// SDP media line id of the sending transceiver.
    pub mid: String,
    /// Room-unique name this track publishes under.
    pub name: String,
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media permission denied")]
    PermissionDenied,

    #[error("failed to acquire media stream: {0}")]
    Acquisition(String),

    #[error("peer connection error: {0}")]
    PeerConnection(String),
}

/// Source of the participant's own media.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Permission state without prompting.
    async fn query_permission(&self) -> PermissionState;

    /// Acquire the local tracks, prompting the user if permission is
    /// pending.
    async fn acquire_tracks(&self) -> Result<Vec<LocalTrack>, MediaError>;
}

/// The peer connection, reduced to the operations the reconciler needs.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Create a local offer and set it as the local description.
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Apply a remote answer.
    async fn apply_answer(&self, sdp: &str) -> Result<(), MediaError>;

    /// Apply a remote offer, create an answer, set it locally, return it.
    async fn apply_offer_and_answer(&self, sdp: &str) -> Result<String, MediaError>;

    /// Stop the receiving transceivers for the given mids.
    async fn stop_transceivers(&self, mids: &[String]) -> Result<(), MediaError>;

    /// Enable or disable rendering of a received track (presence pause).
    fn set_track_enabled(&self, mid: &str, enabled: bool);
}
