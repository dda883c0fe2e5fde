//! Configuration module for environment variable parsing.
//!
//! Everything the relay needs is read once at startup into [`Config`] and
//! handed to the web layer explicitly. Required values are checked by
//! [`Config::validate`] so a half-configured relay never starts serving.

use std::env;

use thiserror::Error;
use tracing::warn;
use url::Url;

/// Default outbound request timeout in milliseconds.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 10_000;

/// Default inbound body limit. Mailgun accepts messages up to 25 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Base URL of the forum that owns `/admin/email/handle_mail`
    pub base_url: String,

    /// API key sent along with every forwarded message
    pub api_key: String,

    /// API username sent along with every forwarded message
    pub api_username: String,

    /// Mailgun signing key for HMAC signature verification
    pub mailgun_signing_key: String,

    /// Maximum age in seconds for webhook timestamps; `None` disables the check
    pub signature_max_age: Option<u64>,

    /// Outbound forward timeout in milliseconds
    pub forward_timeout_ms: u64,

    /// Largest inbound webhook body accepted, in bytes
    pub max_body_bytes: usize,
}

/// Configuration problems detected before the server starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// One or more required variables are unset or blank.
    #[error("missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    /// The base URL cannot be used to build the forward destination.
    #[error("invalid DISCOURSE_BASE_URL {url:?}: {reason}")]
    InvalidBaseUrl {
        /// Value as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Never fails; call [`Config::validate`] before using the result.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            base_url: env::var("DISCOURSE_BASE_URL").unwrap_or_default(),

            api_key: env::var("DISCOURSE_API_KEY").unwrap_or_default(),

            api_username: env::var("DISCOURSE_API_USERNAME").unwrap_or_default(),

            mailgun_signing_key: env::var("MAILGUN_API_KEY").unwrap_or_default(),

            signature_max_age: parse_optional("MAILGUN_SIGNATURE_MAX_AGE"),

            forward_timeout_ms: parse_optional("FORWARD_TIMEOUT_MS")
                .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS),

            max_body_bytes: parse_optional("MAX_BODY_BYTES").unwrap_or(DEFAULT_MAX_BODY_BYTES),
        }
    }

    /// Check that every required value is present and usable.
    ///
    /// All missing variables are reported together so an operator can fix
    /// the deployment in one pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("DISCOURSE_BASE_URL", &self.base_url),
            ("DISCOURSE_API_KEY", &self.api_key),
            ("DISCOURSE_API_USERNAME", &self.api_username),
            ("MAILGUN_API_KEY", &self.mailgun_signing_key),
        ];

        let missing: Vec<&'static str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let parsed = Url::parse(self.base_url.trim()).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme {}", parsed.scheme()),
            });
        }

        Ok(())
    }
}

/// Parse an optional numeric variable, warning when it is set but unusable.
fn parse_optional<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid numeric value, ignoring");
            None
        }
    }
}
