//! Room controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default bind address for the signaling server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8787";

/// Default base URL of the managed SFU HTTP API.
pub const DEFAULT_SFU_BASE_URL: &str = "https://rtc.live.cloudflare.com/v1";

/// Room controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// Signaling server bind address (default: "0.0.0.0:8787").
    pub bind_address: String,

    /// Base URL of the managed SFU HTTP API.
    pub sfu_base_url: String,

    /// SFU application id, interpolated into the SFU URL path.
    pub sfu_app_id: String,

    /// Bearer token for the SFU API.
    /// Protected by `SecretString` to prevent accidental logging.
    pub sfu_api_token: SecretString,

    /// HS256 signing secret for session identity tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub jwt_secret: SecretString,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("sfu_base_url", &self.sfu_base_url)
            .field("sfu_app_id", &self.sfu_app_id)
            .field("sfu_api_token", &"[REDACTED]")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when a required variable is
    /// unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when a required variable is
    /// absent from `vars`.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let sfu_app_id = vars
            .get("SFU_APP_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("SFU_APP_ID".to_string()))?
            .clone();

        let sfu_api_token = SecretString::from(
            vars.get("SFU_API_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("SFU_API_TOKEN".to_string()))?
                .clone(),
        );

        let jwt_secret = SecretString::from(
            vars.get("JWT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("JWT_SECRET".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("RC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let sfu_base_url = vars
            .get("SFU_BASE_URL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SFU_BASE_URL.to_string());

        Ok(Self {
            bind_address,
            sfu_base_url,
            sfu_app_id,
            sfu_api_token,
            jwt_secret,
        })
    }
}
