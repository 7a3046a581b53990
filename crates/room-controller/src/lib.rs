//! Roomcast room controller.
//!
//! Signaling backend for many-to-many room broadcast over an external
//! managed SFU. The controller never touches media: it owns the per-room
//! track registry (with its monotonic version), guards the per-participant
//! SFU session lifecycle, and relays SDP between clients and the SFU over a
//! WebSocket hub and a small HTTP surface.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod actors;
pub mod config;
pub mod errors;
pub mod http;
pub mod hub;
pub mod sfu;
pub mod store;
