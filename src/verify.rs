//! Purchase verification: the synchronous half of the subscription engine.
//!
//! Orchestrates the ordered gates of a verification request: SKU check,
//! rate limit, duplicate-token short-circuit, breaker-guarded provider
//! verification, response validation, fraud gate, transactional persist,
//! then best-effort acknowledgement. Steps up to persistence are hard
//! gates with no partial writes; acknowledgement failure is soft and never
//! rolls back committed state.

use chrono::Utc;
use rusqlite::ErrorCode;

use crate::billing::token_fingerprint;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::fraud::{score_purchase, PurchaseValidationContext, RiskLevel};
use crate::models::{
    CreatePurchaseEvent, CreateSubscription, PurchaseEventType, Sku, SubscriptionStatus,
};
use crate::rate_limit::Endpoint;

/// Outcome returned to the caller after a successful verification.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifiedSubscription {
    pub subscription_id: String,
    pub status: SubscriptionStatus,
    pub expires_at: i64,
    pub auto_renew: bool,
}

/// A verification request, with the optional profile fields the upstream
/// gateway forwards for fraud scoring.
#[derive(Debug, Clone)]
pub struct VerifyPurchaseRequest {
    pub user_id: String,
    pub sku_id: String,
    pub purchase_token: String,
    pub email: Option<String>,
    /// Unix seconds; absent when the gateway has no profile claim.
    pub account_created_at: Option<i64>,
}

pub async fn verify_purchase(
    state: &AppState,
    request: VerifyPurchaseRequest,
) -> Result<VerifiedSubscription> {
    // 0. The SKU catalog is closed; reject unknowns before anything else.
    let sku = Sku::from_id(&request.sku_id)
        .ok_or_else(|| AppError::InvalidSku(request.sku_id.clone()))?;

    // 1. Rate limit. Limiter failure fails open inside check_or_open.
    let decision = state
        .limiter
        .check_or_open(Endpoint::VerifyPurchase, &request.user_id);
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    // 2. Duplicate-token short-circuit: idempotent from the caller's
    //    perspective, carrying the existing subscription id.
    {
        let conn = state.db.get()?;
        if let Some(existing) =
            queries::get_subscription_by_token(&conn, &request.purchase_token)?
        {
            tracing::info!(
                token = token_fingerprint(&request.purchase_token),
                subscription_id = %existing.id,
                "Verification replay for already-bound token"
            );
            return Err(AppError::DuplicateToken {
                subscription_id: existing.id,
            });
        }
    }

    // 3. Breaker-guarded call to the billing authority. OPEN fails fast
    //    with no network attempt.
    if !state.breaker.allow_request() {
        return Err(AppError::ProviderUnavailable);
    }
    let purchase = match state.billing.verify(sku.id, &request.purchase_token).await {
        Ok(purchase) => {
            state.breaker.record_success();
            purchase
        }
        Err(e) => {
            state.breaker.record_failure();
            return Err(e);
        }
    };

    // 4. Validate the canonical purchase state.
    let now = Utc::now();
    purchase
        .validate(now.timestamp_millis())
        .map_err(AppError::PurchaseNotValid)?;

    let purchase_date = purchase.start_time_millis / 1000;
    // Authoritative expiry from the provider; never recomputed locally.
    let expiry_date = purchase.expiry_time_millis / 1000;
    if expiry_date <= purchase_date {
        tracing::error!(
            token = token_fingerprint(&request.purchase_token),
            purchase_date,
            expiry_date,
            "Provider response violates expiry-after-purchase invariant"
        );
        return Err(AppError::Internal(
            "Provider returned inconsistent purchase dates".into(),
        ));
    }

    // 5. Fraud gate. CRITICAL rejects; HIGH proceeds flagged for review.
    let prior_purchases = {
        let conn = state.db.get()?;
        queries::count_subscriptions_for_user(&conn, &request.user_id)?
    };
    let account_age_days = request
        .account_created_at
        .map(|created| (now.timestamp() - created).max(0) / 86400)
        .unwrap_or(i64::MAX);
    let price_amount_micros = purchase
        .price_amount_micros
        .unwrap_or(sku.price_amount_micros);

    let fraud = score_purchase(&PurchaseValidationContext {
        account_age_days,
        prior_purchase_count: prior_purchases,
        purchase_token: request.purchase_token.clone(),
        price_amount_micros,
        email: request.email.clone(),
        business_type: sku.business_type,
    });

    if fraud.risk_level == RiskLevel::Critical {
        tracing::warn!(
            user_id = %request.user_id,
            token = token_fingerprint(&request.purchase_token),
            score = fraud.score,
            reasons = ?fraud.reasons,
            "Purchase rejected by fraud screening"
        );
        return Err(AppError::FraudSuspected);
    }
    let manual_review = fraud.risk_level == RiskLevel::High;
    if manual_review {
        tracing::warn!(
            user_id = %request.user_id,
            score = fraud.score,
            reasons = ?fraud.reasons,
            "High fraud score; purchase flagged for manual review"
        );
    }

    // 6. Persist subscription + PURCHASE event in one transaction.
    let currency_code = purchase
        .price_currency_code
        .clone()
        .unwrap_or_else(|| sku.currency_code.to_string());

    let create = CreateSubscription {
        user_id: request.user_id.clone(),
        business_type: sku.business_type,
        sku_id: sku.id.to_string(),
        purchase_token: request.purchase_token.clone(),
        order_id: purchase.order_id.clone(),
        status: SubscriptionStatus::Active,
        purchase_date,
        expiry_date,
        auto_renew: purchase.auto_renewing,
        price_amount_micros,
        currency_code,
        raw_provider_response: purchase.raw_response.clone(),
    };

    let event_data = serde_json::json!({
        "sku_id": sku.id,
        "order_id": purchase.order_id,
        "fraud_score": fraud.score,
        "fraud_risk_level": fraud.risk_level.as_str(),
        "fraud_reasons": fraud.reasons,
        "manual_review": manual_review,
    });

    let subscription = {
        let mut conn = state.db.get()?;
        let tx = conn.transaction()?;
        let subscription = match queries::create_subscription(&tx, &create) {
            Ok(sub) => sub,
            // Lost a race with a concurrent verification of the same
            // token; report the winner's row.
            Err(AppError::Database(rusqlite::Error::SqliteFailure(e, _)))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                drop(tx);
                let existing =
                    queries::get_subscription_by_token(&conn, &request.purchase_token)?;
                return match existing {
                    Some(sub) => Err(AppError::DuplicateToken {
                        subscription_id: sub.id,
                    }),
                    None => Err(AppError::Internal("Subscription insert conflict".into())),
                };
            }
            Err(e) => return Err(e),
        };
        queries::insert_purchase_event(
            &tx,
            &CreatePurchaseEvent {
                subscription_id: subscription.id.clone(),
                user_id: request.user_id.clone(),
                event_type: PurchaseEventType::Purchase,
                event_data,
            },
        )?;
        tx.commit()?;
        subscription
    };

    tracing::info!(
        subscription_id = %subscription.id,
        user_id = %request.user_id,
        sku_id = sku.id,
        expiry_date,
        "Purchase verified and subscription created"
    );

    // 7. Acknowledge, best-effort and non-blocking. Failure is logged and
    //    the committed state stands.
    let billing = state.billing.clone();
    let sku_id = sku.id.to_string();
    let token = request.purchase_token.clone();
    tokio::spawn(async move {
        if let Err(e) = billing.acknowledge(&sku_id, &token).await {
            tracing::warn!(
                sku_id,
                token = token_fingerprint(&token),
                "Failed to acknowledge purchase: {}",
                e
            );
        }
    });

    Ok(VerifiedSubscription {
        subscription_id: subscription.id,
        status: subscription.status,
        expires_at: subscription.expiry_date,
        auto_renew: subscription.auto_renew,
    })
}

/// User-initiated cancellation. Stored status moves to CANCELLED; access
/// persists until the expiry date (grace semantics).
pub fn cancel_subscription(
    state: &AppState,
    user_id: &str,
    reason: Option<String>,
) -> Result<crate::models::Subscription> {
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    let subscription = queries::get_latest_subscription_for_user(&conn, user_id)?
        .ok_or_else(|| AppError::NotFound(crate::error::msg::SUBSCRIPTION_NOT_FOUND.into()))?;

    if subscription.status == SubscriptionStatus::Cancelled {
        return Ok(subscription);
    }
    if subscription.effective_status(now) == SubscriptionStatus::Expired {
        return Err(AppError::BadRequest("Subscription already expired".into()));
    }

    let update = queries::TransitionUpdate {
        status: Some(SubscriptionStatus::Cancelled),
        cancellation_date: Some(now),
        cancellation_reason: reason.clone(),
        auto_renew: Some(false),
        ..Default::default()
    };

    let tx = conn.transaction()?;
    if !queries::apply_transition(&tx, &subscription.id, subscription.version, &update)? {
        return Err(AppError::Internal("Concurrent subscription update".into()));
    }
    queries::insert_purchase_event(
        &tx,
        &CreatePurchaseEvent {
            subscription_id: subscription.id.clone(),
            user_id: user_id.to_string(),
            event_type: PurchaseEventType::Cancellation,
            event_data: serde_json::json!({
                "source": "user_request",
                "reason": reason,
            }),
        },
    )?;
    tx.commit()?;

    let refreshed = queries::get_subscription_by_id(&conn, &subscription.id)?
        .ok_or_else(|| AppError::Internal("Subscription vanished mid-cancel".into()))?;

    tracing::info!(
        subscription_id = %refreshed.id,
        user_id,
        expiry_date = refreshed.expiry_date,
        "Subscription cancelled; access persists until expiry"
    );

    Ok(refreshed)
}
