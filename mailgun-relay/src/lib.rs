//! Mailgun relay - verifies inbound Mailgun webhooks and forwards them.
//!
//! Mailgun inbound routes post each received message to this service. The
//! relay checks the webhook's HMAC-SHA256 signature, rebuilds a minimal
//! plain-text email from the posted fields and hands it to a forum's
//! `/admin/email/handle_mail` endpoint together with API credentials.
//!
//! ## Architecture
//!
//! ```text
//! Mailgun → POST /mailgun/incoming → verify → RelayMessage → POST /admin/email/handle_mail
//! ```

pub mod config;
pub mod relay;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use relay::{
    verify_mailgun_signature, Credentials, ForwardError, Forwarder, Relay, RelayMessage,
    RelayResponse, WebhookRequest,
};
pub use web::{router, AppState};
