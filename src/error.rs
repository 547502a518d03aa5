use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Reason a purchase verification response was rejected before persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseRejection {
    /// Provider reports the purchase already expired.
    Expired,
    /// Provider reports a cancellation marker on the purchase.
    Cancelled,
    /// Payment is not in a completed state.
    Incomplete,
}

impl PurchaseRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for PurchaseRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Unknown SKU: {0}")]
    InvalidSku(String),

    /// The purchase token is already bound to a subscription. Idempotent
    /// success from the caller's perspective, never a retryable failure.
    #[error("Purchase token already verified")]
    DuplicateToken { subscription_id: String },

    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// Circuit breaker is open; no network attempt was made.
    #[error("Billing provider unavailable")]
    ProviderUnavailable,

    #[error("Purchase not valid: {0}")]
    PurchaseNotValid(PurchaseRejection),

    #[error("Purchase rejected by fraud screening")]
    FraudSuspected,

    #[error("Malformed webhook message")]
    WebhookMalformed,

    /// Signature header missing or not valid for the raw body. Rejected
    /// before any parsing.
    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Stale webhook message")]
    WebhookStale,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut subscription_id = None;
        let mut retry_after = None;

        // External responses are sanitized: no tokens, no raw provider
        // payloads, no internal detail. Full context goes to the logs.
        let (status, error, details) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone()))
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized", None),
            AppError::InvalidSku(sku) => {
                (StatusCode::BAD_REQUEST, "Unknown SKU", Some(sku.clone()))
            }
            AppError::DuplicateToken {
                subscription_id: id,
            } => {
                subscription_id = Some(id.clone());
                (
                    StatusCode::CONFLICT,
                    "Purchase token already verified",
                    None,
                )
            }
            AppError::RateLimited { retry_after_secs } => {
                retry_after = Some(*retry_after_secs);
                (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded", None)
            }
            AppError::ProviderUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Billing provider temporarily unavailable",
                None,
            ),
            AppError::PurchaseNotValid(reason) => (
                StatusCode::PAYMENT_REQUIRED,
                "Purchase not valid",
                Some(reason.as_str().to_string()),
            ),
            AppError::FraudSuspected => {
                (StatusCode::FORBIDDEN, "Purchase could not be verified", None)
            }
            AppError::WebhookMalformed => {
                (StatusCode::BAD_REQUEST, "Invalid webhook message", None)
            }
            AppError::WebhookSignatureInvalid => {
                (StatusCode::BAD_REQUEST, "Invalid webhook signature", None)
            }
            AppError::WebhookStale => (StatusCode::BAD_REQUEST, "Stale webhook message", None),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", None)
            }
            AppError::Http(e) => {
                tracing::error!("HTTP client error: {}", e);
                (StatusCode::BAD_GATEWAY, "Upstream request failed", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: error.to_string(),
                details,
                subscription_id,
                retry_after_secs: retry_after,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Shorthand for `Option -> AppError::NotFound` conversions in handlers.
pub trait OptionExt<T> {
    fn or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(msg.to_string()))
    }
}

/// Centralized user-facing message constants.
pub mod msg {
    pub const SUBSCRIPTION_NOT_FOUND: &str = "Subscription not found";
    pub const UNKNOWN_BUSINESS_TYPE: &str = "Unknown business type";
}
