pub mod subscriptions;
pub mod webhook;

use axum::http::HeaderValue;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::rate_limit::{Endpoint, RateLimitDecision};

/// Build the subscription API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subscriptions/initiate", post(subscriptions::initiate))
        .route(
            "/subscriptions/verify-purchase",
            post(subscriptions::verify_purchase),
        )
        .route("/subscriptions/status", get(subscriptions::status))
        .route("/subscriptions/cancel", post(subscriptions::cancel))
        .route("/subscriptions/webhook", post(webhook::receive))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}

/// Enforce the endpoint budget for an identifier. Returns the decision so
/// the handler can attach `X-RateLimit-*` headers.
pub(crate) fn enforce_rate_limit(
    state: &AppState,
    endpoint: Endpoint,
    identifier: &str,
) -> Result<RateLimitDecision> {
    let decision = state.limiter.check_or_open(endpoint, identifier);
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }
    Ok(decision)
}

/// Attach rate limit headers to a response.
pub(crate) fn apply_rate_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}
