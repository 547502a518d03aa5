use chrono::Utc;
use rusqlite::{params, Connection};

use crate::id::EntityType;
use crate::models::*;

use super::from_row::{query_all, query_one, PURCHASE_EVENT_COLS, SUBSCRIPTION_COLS};
use crate::error::Result;

fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Subscriptions ============

/// Persist a freshly verified subscription.
///
/// The UNIQUE index on `purchase_token` is the last line of defense for
/// token uniqueness; callers short-circuit duplicates before getting here.
pub fn create_subscription(conn: &Connection, input: &CreateSubscription) -> Result<Subscription> {
    let id = EntityType::Subscription.gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO subscriptions (id, user_id, business_type, sku_id, purchase_token, order_id,
            status, purchase_date, expiry_date, renewal_date, auto_renew, price_amount_micros,
            currency_code, cancellation_date, cancellation_reason, raw_provider_response,
            version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?11, ?12, NULL, NULL, ?13, 1, ?14, ?14)",
        params![
            &id,
            &input.user_id,
            input.business_type.as_str(),
            &input.sku_id,
            &input.purchase_token,
            &input.order_id,
            input.status.as_str(),
            input.purchase_date,
            input.expiry_date,
            input.auto_renew as i64,
            input.price_amount_micros,
            &input.currency_code,
            &input.raw_provider_response,
            now,
        ],
    )?;

    Ok(Subscription {
        id,
        user_id: input.user_id.clone(),
        business_type: input.business_type,
        sku_id: input.sku_id.clone(),
        purchase_token: input.purchase_token.clone(),
        order_id: input.order_id.clone(),
        status: input.status,
        purchase_date: input.purchase_date,
        expiry_date: input.expiry_date,
        renewal_date: None,
        auto_renew: input.auto_renew,
        price_amount_micros: input.price_amount_micros,
        currency_code: input.currency_code.clone(),
        cancellation_date: None,
        cancellation_reason: None,
        raw_provider_response: input.raw_provider_response.clone(),
        version: 1,
        created_at: now,
        updated_at: now,
    })
}

/// Locate a subscription by its purchase token (the canonical lookup for
/// webhook dispatch - notification-embedded user ids are not trusted).
pub fn get_subscription_by_token(conn: &Connection, token: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {SUBSCRIPTION_COLS} FROM subscriptions WHERE purchase_token = ?1"),
        &[&token],
    )
}

pub fn get_subscription_by_id(conn: &Connection, id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!("SELECT {SUBSCRIPTION_COLS} FROM subscriptions WHERE id = ?1"),
        &[&id],
    )
}

/// Most recently created subscription for a user (the one the status
/// endpoint reports on).
pub fn get_latest_subscription_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {SUBSCRIPTION_COLS} FROM subscriptions
             WHERE user_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
        ),
        &[&user_id],
    )
}

/// Number of subscriptions a user has ever verified (fraud signal input).
pub fn count_subscriptions_for_user(conn: &Connection, user_id: &str) -> Result<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM subscriptions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Partial update applied by a lifecycle transition. `None` leaves the
/// column untouched.
#[derive(Debug, Default, Clone)]
pub struct TransitionUpdate {
    pub status: Option<SubscriptionStatus>,
    pub expiry_date: Option<i64>,
    pub renewal_date: Option<i64>,
    pub auto_renew: Option<bool>,
    pub cancellation_date: Option<i64>,
    pub cancellation_reason: Option<String>,
}

/// Apply a transition with an optimistic version check.
///
/// Returns `false` when the row moved under us (version mismatch); the
/// caller re-reads and retries. Every successful write bumps `version`.
pub fn apply_transition(
    conn: &Connection,
    subscription_id: &str,
    expected_version: i64,
    update: &TransitionUpdate,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions SET
            status = COALESCE(?1, status),
            expiry_date = COALESCE(?2, expiry_date),
            renewal_date = COALESCE(?3, renewal_date),
            auto_renew = COALESCE(?4, auto_renew),
            cancellation_date = COALESCE(?5, cancellation_date),
            cancellation_reason = COALESCE(?6, cancellation_reason),
            version = version + 1,
            updated_at = ?7
         WHERE id = ?8 AND version = ?9",
        params![
            update.status.map(|s| s.as_str()),
            update.expiry_date,
            update.renewal_date,
            update.auto_renew.map(|b| b as i64),
            update.cancellation_date,
            &update.cancellation_reason,
            now(),
            subscription_id,
            expected_version,
        ],
    )?;
    Ok(affected > 0)
}

// ============ Purchase events ============

/// Append an audit event. Called inside the same transaction as the
/// subscription write it describes.
pub fn insert_purchase_event(
    conn: &Connection,
    input: &CreatePurchaseEvent,
) -> Result<PurchaseEvent> {
    let id = EntityType::PurchaseEvent.gen_id();
    let now = now();
    let event_data = serde_json::to_string(&input.event_data)?;

    conn.execute(
        "INSERT INTO purchase_events (id, subscription_id, user_id, event_type, event_data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &id,
            &input.subscription_id,
            &input.user_id,
            input.event_type.as_str(),
            &event_data,
            now,
        ],
    )?;

    Ok(PurchaseEvent {
        id,
        subscription_id: input.subscription_id.clone(),
        user_id: input.user_id.clone(),
        event_type: input.event_type,
        event_data: input.event_data.clone(),
        created_at: now,
    })
}

pub fn list_purchase_events(
    conn: &Connection,
    subscription_id: &str,
) -> Result<Vec<PurchaseEvent>> {
    query_all(
        conn,
        &format!(
            "SELECT {PURCHASE_EVENT_COLS} FROM purchase_events
             WHERE subscription_id = ?1 ORDER BY created_at, id"
        ),
        &[&subscription_id],
    )
}

// ============ Webhook idempotency ============

/// Record a webhook message id as seen. Returns `true` when the id is new,
/// `false` when it was already recorded (duplicate delivery).
pub fn try_record_webhook_event(conn: &Connection, message_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (message_id, first_seen_at) VALUES (?1, ?2)",
        params![message_id, now()],
    )?;
    Ok(affected > 0)
}

/// Drop idempotency records older than the retention window.
pub fn purge_old_webhook_events(conn: &Connection, retention_secs: i64) -> Result<usize> {
    let affected = conn.execute(
        "DELETE FROM webhook_events WHERE first_seen_at < ?1",
        params![now() - retention_secs],
    )?;
    Ok(affected)
}
