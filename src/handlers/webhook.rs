//! Webhook endpoint for billing authority push notifications.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::rate_limit::Endpoint;
use crate::webhook::{decode_push, process_notification};

use super::enforce_rate_limit;

const SIGNATURE_HEADER: &str = "x-signature";

/// POST /subscriptions/webhook
///
/// Raw-body handler: the signature covers the exact bytes on the wire, so
/// no extractor may touch the body first. Responses are deliberately
/// terse; details go to logs only.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str)> {
    let identifier = client_identifier(&headers);
    enforce_rate_limit(&state, Endpoint::Webhook, &identifier)?;

    if let Some(verifier) = &state.webhook_verifier {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::WebhookSignatureInvalid)?;
        if !verifier.verify(&body, signature) {
            tracing::warn!(identifier, "Webhook signature verification failed");
            return Err(AppError::WebhookSignatureInvalid);
        }
    }

    let validated = decode_push(&body)?;
    process_notification(&state, &validated)
}

/// Sender identity for rate limiting: the nearest client in the forwarding
/// chain. The push origin does not authenticate per-caller, so the address
/// is the only handle available.
fn client_identifier(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
