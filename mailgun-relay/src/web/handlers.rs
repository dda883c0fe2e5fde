//! Webhook endpoint handlers.
//!
//! These handlers only adapt HTTP to the relay core:
//! 1. Decode the Mailgun form (urlencoded or multipart)
//! 2. Hand the fields to [`Relay::handle`]
//! 3. Map the outcome to a status code and body

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::relay::{ForwardError, Relay, RelayResponse, WebhookRequest};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Relay,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, ForwardError> {
        let relay = Relay::from_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            relay,
        })
    }
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        match self {
            RelayResponse::Unauthorized => (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response(),
            RelayResponse::Done => (StatusCode::OK, "done").into_response(),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Mailgun Webhook
// =============================================================================

/// Mailgun inbound route endpoint.
///
/// Mailgun posts `application/x-www-form-urlencoded` for plain messages and
/// `multipart/form-data` when attachments are present. Both are accepted;
/// attachments themselves are not relayed.
pub async fn mailgun_incoming(State(state): State<AppState>, request: Request) -> Response {
    // An unreadable body carries no verifiable signature.
    let Some(fields) = read_form_fields(request, &state).await else {
        return RelayResponse::Unauthorized.into_response();
    };

    let webhook = WebhookRequest::from_fields(&fields);

    info!(
        to = %webhook.to,
        field_count = fields.len(),
        body_length = webhook.body.len(),
        has_signature = !webhook.signature.is_empty(),
        "mailgun_incoming_received"
    );

    let response = state.relay.handle(webhook).await;

    if response == RelayResponse::Unauthorized {
        warn!(
            timestamp = fields.get("timestamp").map(String::as_str).unwrap_or_default(),
            signature_length = fields.get("signature").map(String::len).unwrap_or(0),
            "mailgun_signature_invalid"
        );
    }

    response.into_response()
}

/// Decode the request body into a flat field map.
///
/// Returns `None`, after logging why, when the body is not a form at all.
async fn read_form_fields(request: Request, state: &AppState) -> Option<HashMap<String, String>> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        return match Form::<HashMap<String, String>>::from_request(request, state).await {
            Ok(Form(fields)) => Some(fields),
            Err(rejection) => {
                warn!(
                    error = %rejection,
                    status_code = rejection.status().as_u16(),
                    "mailgun_form_rejected"
                );
                None
            }
        };
    }

    let mut multipart = match Multipart::from_request(request, state).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!(error = %rejection, "mailgun_multipart_rejected");
            return None;
        }
    };

    let mut fields = HashMap::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "mailgun_multipart_invalid");
                return None;
            }
        };

        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if field.file_name().is_some() {
            info!(field = %name, "mailgun_attachment_skipped");
            continue;
        }

        match field.text().await {
            Ok(value) => {
                fields.insert(name, value);
            }
            Err(e) => {
                warn!(field = %name, error = %e, "mailgun_multipart_field_invalid");
                return None;
            }
        }
    }

    Some(fields)
}
