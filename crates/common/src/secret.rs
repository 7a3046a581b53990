//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values like JWT signing secrets and SFU API tokens.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that contains one gets safe logging behavior for free, and the
//! wrapped value is zeroized on drop. Accessing the actual value requires an
//! explicit `expose_secret()` call.
//!
//! # Roomcast Usage Guidelines
//!
//! Use `SecretString` for:
//! - The identity-token signing secret (`JWT_SECRET`)
//! - The SFU bearer token (`SFU_API_TOKEN`)

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("sfu-api-token");
        assert_eq!(secret.expose_secret(), "sfu-api-token");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct SfuCredentials {
            app_id: String,
            api_token: SecretString,
        }

        let creds = SfuCredentials {
            app_id: "app-123".to_string(),
            api_token: SecretString::from("super-secret"),
        };

        let debug_str = format!("{creds:?}");

        assert!(debug_str.contains("app-123"));
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            app_id: String,
            api_token: SecretString,
        }

        let json = r#"{"app_id": "app-1", "api_token": "my-secret-value"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.api_token.expose_secret(), "my-secret-value");

        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }
}
