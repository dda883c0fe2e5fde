//! Webhook relay core.
//!
//! Framework independent: [`Relay::handle`] takes a normalized
//! [`WebhookRequest`] and returns a normalized [`RelayResponse`].
//!
//! ## Request Flow
//!
//! ```text
//! Received → Verifying → Rejected (401)
//!                      → Forwarding → Responded ("done")
//! ```

pub mod forward;
pub mod message;
pub mod signature;

use std::collections::HashMap;
use std::fmt;

use tracing::{error, info};

use crate::Config;

pub use forward::{Credentials, ForwardError, ForwardOutcome, Forwarder, HANDLE_MAIL_PATH};
pub use message::RelayMessage;
pub use signature::{compute_signature, is_timestamp_fresh, unix_now, verify_mailgun_signature};

/// Fields of one inbound Mailgun webhook. Missing fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookRequest {
    pub timestamp: String,
    pub token: String,
    pub signature: String,
    pub to: String,
    pub from: String,
    pub date: String,
    pub subject: String,
    pub body: String,
}

impl WebhookRequest {
    /// Pick the relayed fields out of a decoded form, using Mailgun's field names.
    pub fn from_fields(fields: &HashMap<String, String>) -> Self {
        let field = |name: &str| fields.get(name).cloned().unwrap_or_default();

        Self {
            timestamp: field("timestamp"),
            token: field("token"),
            signature: field("signature"),
            to: field("To"),
            from: field("From"),
            date: field("Date"),
            subject: field("subject"),
            body: field("body-plain"),
        }
    }
}

/// What the webhook sender gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayResponse {
    /// Signature check failed; nothing was forwarded.
    Unauthorized,
    /// Signature verified and a forward was attempted.
    Done,
}

/// Verifies webhooks and forwards the verified ones.
#[derive(Clone)]
pub struct Relay {
    signing_key: String,
    signature_max_age: Option<u64>,
    forwarder: Forwarder,
}

impl fmt::Debug for Relay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relay")
            .field("signing_key", &"<redacted>")
            .field("signature_max_age", &self.signature_max_age)
            .field("forwarder", &self.forwarder)
            .finish()
    }
}

impl Relay {
    pub fn new(signing_key: impl Into<String>, forwarder: Forwarder) -> Self {
        Self {
            signing_key: signing_key.into(),
            signature_max_age: None,
            forwarder,
        }
    }

    /// Also reject webhooks whose timestamp is more than `max_age` seconds off.
    pub fn with_signature_max_age(mut self, max_age: Option<u64>) -> Self {
        self.signature_max_age = max_age;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self, ForwardError> {
        let forwarder = Forwarder::from_config(config)?;
        Ok(Self::new(config.mailgun_signing_key.clone(), forwarder)
            .with_signature_max_age(config.signature_max_age))
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Whether `request` carries a valid, and if configured, fresh signature.
    pub fn authenticate(&self, request: &WebhookRequest) -> bool {
        if let Some(max_age) = self.signature_max_age {
            if !is_timestamp_fresh(&request.timestamp, max_age, unix_now()) {
                return false;
            }
        }

        verify_mailgun_signature(
            &request.timestamp,
            &request.token,
            &request.signature,
            &self.signing_key,
        )
    }

    /// Run one webhook through verification and forwarding.
    ///
    /// A failed forward is logged but still answered with
    /// [`RelayResponse::Done`]: Mailgun only needs to know the webhook was
    /// accepted, and there is nothing to retry here.
    pub async fn handle(&self, request: WebhookRequest) -> RelayResponse {
        if !self.authenticate(&request) {
            return RelayResponse::Unauthorized;
        }

        let message = RelayMessage::from_request(&request);

        match self.forwarder.forward(&message).await {
            Ok(outcome) => {
                info!(
                    to = %message.to,
                    status_code = outcome.status_code,
                    "relay_forwarded"
                );
            }
            Err(e) => {
                error!(
                    to = %message.to,
                    destination = %self.forwarder.destination(),
                    error_kind = e.kind(),
                    error = %e,
                    "relay_forward_failed"
                );
            }
        }

        RelayResponse::Done
    }
}
