//! Room controller error types.
//!
//! Errors are split by origin so callers can map them uniformly onto the two
//! client surfaces:
//!
//! - WebSocket: `{"type":"error","code":N,"message":...}` frames
//! - HTTP: JSON bodies with a matching status code
//!
//! Internal detail (SFU response bodies, channel failures) stays in the
//! server logs; clients get the stable code and a short message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::identity::AuthError;
use serde_json::json;
use thiserror::Error;

/// Conflicts with existing room or session state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    /// A local track with this name already exists in the room.
    #[error("track name already in use: {0}")]
    DuplicateName(String),

    /// The participant already created its SFU session.
    #[error("session already initialized")]
    AlreadyInitialized,

    /// The operation requires an SFU session that was never created.
    #[error("session not initialized")]
    NotInitialized,
}

/// Failures talking to the external SFU.
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("SFU session creation failed: {0}")]
    SessionCreationFailed(String),

    #[error("SFU track push failed: {0}")]
    TrackPushFailed(String),

    #[error("SFU accepted the offer but returned no answer")]
    MissingAnswer,

    #[error("SFU renegotiation failed: {0}")]
    RenegotiationFailed(String),

    #[error("SFU transport error: {0}")]
    Transport(String),
}

/// Top-level error for every signaling operation.
#[derive(Debug, Error)]
pub enum SignalError {
    /// Token missing, invalid, or bound to a different room/connection.
    #[error("unauthorized: {0}")]
    Auth(#[from] AuthError),

    /// Request failed schema or semantic validation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Request conflicts with existing state.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The external SFU rejected or failed the operation.
    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    /// An internal invariant did not hold; the operation was aborted with no
    /// state change.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Infrastructure failure (actor channel closed, task gone).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SignalError {
    /// Stable numeric code carried in WebSocket error frames.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Auth(_) => 2,
            Self::Validation(_) => 3,
            Self::Conflict(_) => 5,
            Self::ExternalService(_) => 6,
            Self::InvariantViolation(_) | Self::Internal(_) => 7,
        }
    }

    /// Short message safe to send to clients. Internal variants are
    /// deliberately vague; details go to the logs.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            Self::Auth(e) => e.to_string(),
            Self::Validation(msg) => msg.clone(),
            Self::Conflict(e) => e.to_string(),
            Self::ExternalService(_) => "upstream media service error".to_string(),
            Self::InvariantViolation(_) | Self::Internal(_) => "internal error".to_string(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ExternalService(_) => StatusCode::BAD_GATEWAY,
            Self::InvariantViolation(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SignalError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "code": self.error_code(),
                "message": self.client_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}
