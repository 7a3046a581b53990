//! Session identity tokens.
//!
//! A session identity token is a signed, expiring claim binding a signaling
//! connection id, an external SFU session id, and a room together. The
//! physical WebSocket connection id and the SFU session id are logically
//! distinct; only the token ties them to each other, so every state-mutating
//! operation triggered by a message must verify the token first instead of
//! trusting the connection id alone.
//!
//! Tokens are HS256 JWTs with a fixed 24 hour expiry. A token is issued once
//! per join and never refreshed mid-session; reconnection issues a new token.

use crate::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token lifetime: 24 hours.
pub const TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;

/// Claims carried by a session identity token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTokenPayload {
    /// Subject: the signaling connection id.
    pub sub: String,
    /// The external SFU session id bound to this connection.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// The room this connection joined.
    pub room: String,
    /// Expiry as a unix timestamp (seconds).
    pub exp: i64,
}

/// Token verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    /// Signature did not verify against the configured secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Token expiry is in the past.
    #[error("token expired")]
    Expired,

    /// Token is not a structurally valid JWT or its claims do not match the
    /// expected shape.
    #[error("malformed token")]
    Malformed,
}

/// Sign a new identity token binding `(connection_id, session_id, room)`.
///
/// The expiry is fixed at [`TOKEN_TTL_SECONDS`] from now. Signing has no
/// side effects beyond the cryptographic operation itself.
///
/// # Errors
///
/// Returns [`AuthError::Malformed`] if the payload cannot be encoded, which
/// indicates a programming bug rather than bad input.
pub fn issue(
    secret: &SecretString,
    connection_id: &str,
    session_id: &str,
    room: &str,
) -> Result<String, AuthError> {
    let payload = IdentityTokenPayload {
        sub: connection_id.to_string(),
        session_id: session_id.to_string(),
        room: room.to_string(),
        exp: chrono::Utc::now().timestamp() + TOKEN_TTL_SECONDS,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &payload,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|_| AuthError::Malformed)
}

/// Verify a token and return its payload.
///
/// # Errors
///
/// - [`AuthError::Expired`] when `exp` is in the past
/// - [`AuthError::InvalidSignature`] when the signature does not verify
/// - [`AuthError::Malformed`] for anything that is not a well-formed HS256
///   JWT with the expected claims
pub fn verify(secret: &SecretString, token: &str) -> Result<IdentityTokenPayload, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.validate_exp = true;

    let data = decode::<IdentityTokenPayload>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::Expired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::Malformed,
    })?;

    Ok(data.claims)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_secret() -> SecretString {
        SecretString::from("test-signing-secret-0123456789")
    }

    #[test]
    fn test_issue_then_verify_round_trip() {
        let secret = test_secret();
        let token = issue(&secret, "conn-1", "sfu-session-1", "lobby").unwrap();

        let payload = verify(&secret, &token).unwrap();
        assert_eq!(payload.sub, "conn-1");
        assert_eq!(payload.session_id, "sfu-session-1");
        assert_eq!(payload.room, "lobby");
        assert!(payload.exp > chrono::Utc::now().timestamp());
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = issue(&test_secret(), "conn-1", "s-1", "lobby").unwrap();

        let other = SecretString::from("a-completely-different-secret");
        assert_eq!(verify(&other, &token), Err(AuthError::InvalidSignature));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let secret = test_secret();

        // Hand-roll a token with an expiry in the past.
        let payload = IdentityTokenPayload {
            sub: "conn-1".to_string(),
            session_id: "s-1".to_string(),
            room: "lobby".to_string(),
            exp: chrono::Utc::now().timestamp() - 120,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &payload,
            &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
        )
        .unwrap();

        assert_eq!(verify(&secret, &token), Err(AuthError::Expired));
    }

    #[test]
    fn test_verify_rejects_garbage() {
        assert_eq!(
            verify(&test_secret(), "not-a-jwt"),
            Err(AuthError::Malformed)
        );
        assert_eq!(
            verify(&test_secret(), "a.b.c"),
            Err(AuthError::Malformed)
        );
    }

    #[test]
    fn test_claims_wire_names() {
        let payload = IdentityTokenPayload {
            sub: "conn-1".to_string(),
            session_id: "s-1".to_string(),
            room: "lobby".to_string(),
            exp: 1,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("sessionId").is_some());
        assert!(json.get("session_id").is_none());
    }
}
