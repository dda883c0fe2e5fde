//! Outbound relay to the admin mail-handling endpoint.
//!
//! One form-encoded POST per message, no retries. Failures are reported to
//! the caller as [`ForwardError`]; deciding what the webhook sender sees is
//! left to [`Relay`](super::Relay).

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::info;
use url::Url;

use super::message::RelayMessage;
use crate::Config;

/// Path appended to the configured base URL.
pub const HANDLE_MAIL_PATH: &str = "/admin/email/handle_mail";

/// Downstream error bodies are truncated to this many bytes in errors.
const MAX_ERROR_BODY_BYTES: usize = 512;

/// API credentials forwarded with every message.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub api_username: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_username", &self.api_username)
            .finish()
    }
}

/// Why a forward did not reach a successful response.
#[derive(Debug, Clone, Error)]
pub enum ForwardError {
    /// The base URL does not yield a usable destination.
    #[error("invalid destination url {url:?}: {reason}")]
    InvalidUrl {
        /// URL that was rejected
        url: String,
        /// Parser message
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {message}")]
    Client {
        /// Underlying error message
        message: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("forward timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },

    /// Connection, TLS or protocol failure.
    #[error("forward request failed: {message}")]
    Network {
        /// Underlying error message
        message: String,
    },

    /// The endpoint answered with a non-2xx status.
    #[error("downstream returned HTTP {status_code}")]
    Status {
        /// HTTP status code
        status_code: u16,
        /// Leading part of the response body
        body: String,
    },
}

impl ForwardError {
    /// Short label for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::InvalidUrl { .. } => "invalid_url",
            ForwardError::Client { .. } => "client",
            ForwardError::Timeout { .. } => "timeout",
            ForwardError::Network { .. } => "network",
            ForwardError::Status { .. } => "status",
        }
    }
}

/// Result of a forward that reached the endpoint and got a 2xx back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardOutcome {
    pub status_code: u16,
}

/// HTTP forwarder bound to one destination and one set of credentials.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    destination: Url,
    credentials: Credentials,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder posting to `<base_url>/admin/email/handle_mail`.
    pub fn new(
        base_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, ForwardError> {
        let destination = destination_url(base_url)?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Client {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            destination,
            credentials,
            timeout,
        })
    }

    /// Create a forwarder from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self, ForwardError> {
        Self::new(
            &config.base_url,
            Credentials {
                api_key: config.api_key.clone(),
                api_username: config.api_username.clone(),
            },
            Duration::from_millis(config.forward_timeout_ms),
        )
    }

    /// Full URL every message is posted to.
    pub fn destination(&self) -> &Url {
        &self.destination
    }

    /// Domain used for generated `Message-ID`s.
    pub fn message_id_domain(&self) -> &str {
        self.destination.host_str().unwrap_or("localhost")
    }

    /// Serialize `message` and post it downstream.
    pub async fn forward(&self, message: &RelayMessage) -> Result<ForwardOutcome, ForwardError> {
        let email = message.to_email_string(self.message_id_domain());
        self.post_email(&email).await
    }

    /// Post already-serialized email text downstream.
    pub async fn post_email(&self, email: &str) -> Result<ForwardOutcome, ForwardError> {
        info!(
            destination = %self.destination,
            email_length = email.len(),
            "relay_forward_starting"
        );

        let form = [
            ("email", email),
            ("api_key", self.credentials.api_key.as_str()),
            ("api_username", self.credentials.api_username.as_str()),
        ];

        // `form` sets Content-Type: application/x-www-form-urlencoded.
        let response = self
            .client
            .post(self.destination.clone())
            .form(&form[..])
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            truncate_on_char_boundary(&mut body, MAX_ERROR_BODY_BYTES);
            return Err(ForwardError::Status {
                status_code: status.as_u16(),
                body,
            });
        }

        info!(
            destination = %self.destination,
            status_code = status.as_u16(),
            "relay_forward_complete"
        );

        Ok(ForwardOutcome {
            status_code: status.as_u16(),
        })
    }

    fn classify(&self, error: reqwest::Error) -> ForwardError {
        if error.is_timeout() {
            ForwardError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            ForwardError::Network {
                message: error.to_string(),
            }
        }
    }
}

/// Build the handler URL, tolerating trailing slashes and sub-path installs.
pub fn destination_url(base_url: &str) -> Result<Url, ForwardError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    let joined = format!("{trimmed}{HANDLE_MAIL_PATH}");

    Url::parse(&joined).map_err(|e| ForwardError::InvalidUrl {
        url: joined.clone(),
        reason: e.to_string(),
    })
}

fn truncate_on_char_boundary(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn credentials() -> Credentials {
        Credentials {
            api_key: "secret-api-key".to_string(),
            api_username: "system".to_string(),
        }
    }

    fn message() -> RelayMessage {
        RelayMessage {
            to: "user@example.com".to_string(),
            from: "sender@example.com".to_string(),
            date: "Mon, 1 Jan 2024 00:00:00 +0000".to_string(),
            subject: "Test".to_string(),
            body: "Hello".to_string(),
        }
    }

    #[test]
    fn test_destination_url() {
        assert_eq!(
            destination_url("https://forum.example.com").unwrap().as_str(),
            "https://forum.example.com/admin/email/handle_mail"
        );
        assert_eq!(
            destination_url("https://forum.example.com/").unwrap().as_str(),
            "https://forum.example.com/admin/email/handle_mail"
        );
        assert_eq!(
            destination_url("https://example.com/forum/").unwrap().as_str(),
            "https://example.com/forum/admin/email/handle_mail"
        );
        assert!(matches!(
            destination_url("not a url"),
            Err(ForwardError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_message_id_domain_from_destination() {
        let forwarder = Forwarder::new(
            "https://forum.example.com",
            credentials(),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(forwarder.message_id_domain(), "forum.example.com");
    }

    #[test]
    fn test_truncate_on_char_boundary() {
        let mut text = "ééé".to_string();
        truncate_on_char_boundary(&mut text, 3);
        assert_eq!(text, "é");
    }

    #[tokio::test]
    async fn test_forward_posts_form_with_three_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(HANDLE_MAIL_PATH))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder =
            Forwarder::new(&server.uri(), credentials(), Duration::from_secs(5)).unwrap();

        let outcome = forwarder.forward(&message()).await.unwrap();
        assert_eq!(outcome, ForwardOutcome { status_code: 200 });

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);

        let fields: HashMap<String, String> = url::form_urlencoded::parse(&requests[0].body)
            .into_owned()
            .collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields["api_key"], "secret-api-key");
        assert_eq!(fields["api_username"], "system");

        let email = &fields["email"];
        assert!(email.contains("To: user@example.com\r\n"));
        assert!(email.contains("From: sender@example.com\r\n"));
        assert!(email.contains("Date: Mon, 1 Jan 2024 00:00:00 +0000\r\n"));
        assert!(email.contains("Subject: Test\r\n"));
        assert!(email.ends_with("\r\n\r\nHello"));
    }

    #[tokio::test]
    async fn test_forward_reports_downstream_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(HANDLE_MAIL_PATH))
            .and(body_string_contains("api_username=system"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .expect(1)
            .mount(&server)
            .await;

        let forwarder =
            Forwarder::new(&server.uri(), credentials(), Duration::from_secs(5)).unwrap();

        match forwarder.forward(&message()).await {
            Err(ForwardError::Status { status_code, body }) => {
                assert_eq!(status_code, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forward_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let forwarder =
            Forwarder::new(&server.uri(), credentials(), Duration::from_millis(100)).unwrap();

        let err = forwarder.post_email("Subject: x\r\n\r\nbody").await.unwrap_err();
        assert!(matches!(err, ForwardError::Timeout { timeout_ms: 100 }));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_forward_network_error() {
        // Nothing listens on the discard port.
        let forwarder = Forwarder::new(
            "http://127.0.0.1:9",
            credentials(),
            Duration::from_secs(5),
        )
        .unwrap();

        let err = forwarder.forward(&message()).await.unwrap_err();
        assert!(matches!(err, ForwardError::Network { .. }));
        assert_eq!(err.kind(), "network");
    }
}
