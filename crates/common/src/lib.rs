//! Common utilities shared across Roomcast components.

#![warn(clippy::pedantic)]

/// Module for session identity tokens (issue, verify, claim contract)
pub mod identity;

/// Module for secret types that prevent accidental logging
pub mod secret;
