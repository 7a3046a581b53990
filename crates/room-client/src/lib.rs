//! Roomcast client-side reconciliation.
//!
//! A participant's view of the room is eventually consistent: the server
//! pokes a version number, and the client owns a loop that fetches the
//! published-track listing, diffs it against what it already receives, and
//! renegotiates its peer connection until the two match. WebRTC itself is
//! behind the [`media::MediaSession`] trait; this crate contains no browser
//! or native media code.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod diff;
pub mod media;
pub mod reconciler;

pub use api::{ClientError, RoomEvent, SignalingApi};
pub use diff::{find_diff, TrackDiff};
pub use reconciler::{Reconciler, ReconcilerState};
