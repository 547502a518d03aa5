//! HTTP surface for the subscription lifecycle.

use std::str::FromStr;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, Result};
use crate::extractors::{Json, UserId};
use crate::models::{BusinessType, Sku, SubscriptionStatus};
use crate::rate_limit::Endpoint;
use crate::verify::{self, VerifyPurchaseRequest};

use super::{apply_rate_headers, enforce_rate_limit};

#[derive(Debug, Deserialize)]
pub struct InitiateRequest {
    pub business_type: String,
}

#[derive(Debug, Serialize)]
pub struct PricingOption {
    pub sku_id: &'static str,
    pub period: &'static str,
    pub price_amount_micros: i64,
    pub currency_code: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InitiateResponse {
    pub business_type: BusinessType,
    pub options: Vec<PricingOption>,
}

/// POST /subscriptions/initiate
///
/// Returns the pricing options for a business type so the client can start
/// a purchase flow. No state is written.
pub async fn initiate(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<InitiateRequest>,
) -> Result<Response> {
    let decision = enforce_rate_limit(&state, Endpoint::Initiate, &user_id)?;

    let business_type = BusinessType::from_str(&request.business_type)
        .map_err(|_| AppError::BadRequest(msg::UNKNOWN_BUSINESS_TYPE.into()))?;

    let options = Sku::for_business_type(business_type)
        .into_iter()
        .map(|sku| PricingOption {
            sku_id: sku.id,
            period: sku.period.as_str(),
            price_amount_micros: sku.price_amount_micros,
            currency_code: sku.currency_code,
        })
        .collect();

    let mut response = Json(InitiateResponse {
        business_type,
        options,
    })
    .into_response();
    apply_rate_headers(&mut response, &decision);
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub sku_id: String,
    pub purchase_token: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Unix seconds; forwarded by the gateway when the profile carries it.
    #[serde(default)]
    pub account_created_at: Option<i64>,
}

/// POST /subscriptions/verify-purchase
///
/// The main entry point: verifies the token against the billing authority
/// and creates the subscription. The verification flow performs its own
/// rate check as the first of its ordered gates, so none is repeated here.
pub async fn verify_purchase(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<VerifyRequest>,
) -> Result<Response> {
    let verified = verify::verify_purchase(
        &state,
        VerifyPurchaseRequest {
            user_id,
            sku_id: request.sku_id,
            purchase_token: request.purchase_token,
            email: request.email,
            account_created_at: request.account_created_at,
        },
    )
    .await?;

    Ok(Json(verified).into_response())
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub has_subscription: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_type: Option<BusinessType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_renew: Option<bool>,
}

/// GET /subscriptions/status
///
/// Reports the caller's latest subscription with the effective status
/// (stored status plus lazy expiry). Never writes.
pub async fn status(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Response> {
    let decision = enforce_rate_limit(&state, Endpoint::Status, &user_id)?;

    let subscription = {
        let conn = state.db.get()?;
        queries::get_latest_subscription_for_user(&conn, &user_id)?
    };

    let body = match subscription {
        Some(sub) => {
            let now = Utc::now().timestamp();
            StatusResponse {
                has_subscription: true,
                subscription_id: Some(sub.id.clone()),
                status: Some(sub.effective_status(now)),
                business_type: Some(sub.business_type),
                sku_id: Some(sub.sku_id.clone()),
                expiry_date: Some(sub.expiry_date),
                days_remaining: Some(sub.days_remaining(now)),
                auto_renew: Some(sub.auto_renew),
            }
        }
        None => StatusResponse {
            has_subscription: false,
            subscription_id: None,
            status: None,
            business_type: None,
            sku_id: None,
            expiry_date: None,
            days_remaining: None,
            auto_renew: None,
        },
    };

    let mut response = Json(body).into_response();
    apply_rate_headers(&mut response, &decision);
    Ok(response)
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub expiry_date: i64,
    pub days_remaining: i64,
}

/// POST /subscriptions/cancel
///
/// Marks the caller's subscription CANCELLED. Access persists until the
/// paid-through date; the response makes that explicit.
pub async fn cancel(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(request): Json<CancelRequest>,
) -> Result<Response> {
    let decision = enforce_rate_limit(&state, Endpoint::Cancel, &user_id)?;

    let subscription = verify::cancel_subscription(&state, &user_id, request.reason.clone())?;
    let now = Utc::now().timestamp();

    let mut response = Json(CancelResponse {
        subscription_id: subscription.id.clone(),
        status: subscription.status,
        expiry_date: subscription.expiry_date,
        days_remaining: subscription.days_remaining(now),
    })
    .into_response();
    apply_rate_headers(&mut response, &decision);
    Ok(response)
}
