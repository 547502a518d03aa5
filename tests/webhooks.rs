//! Webhook ingestion and lifecycle transition tests

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use common::*;
use rxbill::webhook::{decode_push, process_notification};

fn deliver(state: &AppState, body: &[u8]) -> rxbill::error::Result<(StatusCode, &'static str)> {
    let validated = decode_push(body)?;
    process_notification(state, &validated)
}

#[tokio::test]
async fn test_renewal_advances_expiry() {
    let state = test_state(Arc::new(MockBilling::new()));
    let old_expiry = future_timestamp(5);
    let new_expiry = future_timestamp(35);
    {
        let conn = state.db.get().unwrap();
        insert_subscription(&conn, "user-1", "tok-renew", SubscriptionStatus::Active, old_expiry);
    }

    let body = push_body(
        2,
        "tok-renew",
        "msg-renew-1",
        Some(&fresh_publish_time()),
        Some(new_expiry * 1000),
    );
    let (status, _) = deliver(&state, &body).unwrap();
    assert_eq!(status, StatusCode::OK);

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-renew")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.expiry_date, new_expiry);
    assert!(sub.renewal_date.is_some());
    assert_eq!(sub.version, 2);

    let events = queries::list_purchase_events(&conn, &sub.id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, PurchaseEventType::Renewal);
}

#[tokio::test]
async fn test_renewal_without_expiry_advances_one_cycle() {
    let state = test_state(Arc::new(MockBilling::new()));
    let old_expiry = future_timestamp(5);
    {
        let conn = state.db.get().unwrap();
        insert_subscription(&conn, "user-1", "tok-renew", SubscriptionStatus::Active, old_expiry);
    }

    let body = push_body(2, "tok-renew", "msg-renew-1", Some(&fresh_publish_time()), None);
    deliver(&state, &body).unwrap();

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-renew")
        .unwrap()
        .unwrap();
    // pharmacy_monthly: one 30-day cycle past the stored expiry
    assert_eq!(sub.expiry_date, old_expiry + 30 * 86400);
}

#[tokio::test]
async fn test_duplicate_message_id_processed_exactly_once() {
    let state = test_state(Arc::new(MockBilling::new()));
    let old_expiry = future_timestamp(5);
    {
        let conn = state.db.get().unwrap();
        insert_subscription(&conn, "user-1", "tok-replay", SubscriptionStatus::Active, old_expiry);
    }

    // Renewal without an authoritative expiry: reprocessing would advance
    // the expiry a second time, so the replay must not dispatch.
    let body = push_body(2, "tok-replay", "msg-dup-1", Some(&fresh_publish_time()), None);

    let (first, _) = deliver(&state, &body).unwrap();
    assert_eq!(first, StatusCode::OK);
    let (second, detail) = deliver(&state, &body).unwrap();
    assert_eq!(second, StatusCode::OK);
    assert_eq!(detail, "Already processed");

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-replay")
        .unwrap()
        .unwrap();
    assert_eq!(sub.expiry_date, old_expiry + 30 * 86400);
    assert_eq!(sub.version, 2);

    let events = queries::list_purchase_events(&conn, &sub.id).unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_cancellation_preserves_access_until_expiry() {
    let state = test_state(Arc::new(MockBilling::new()));
    let expiry = future_timestamp(10);
    {
        let conn = state.db.get().unwrap();
        insert_subscription(&conn, "user-1", "tok-cancel", SubscriptionStatus::Active, expiry);
    }

    let body = push_body(3, "tok-cancel", "msg-cancel-1", Some(&fresh_publish_time()), None);
    deliver(&state, &body).unwrap();

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-cancel")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    assert!(!sub.auto_renew);
    assert!(sub.cancellation_date.is_some());
    // Paid-through date untouched; access persists until then.
    assert_eq!(sub.expiry_date, expiry);
    assert!(sub.grants_access(now()));
}

#[tokio::test]
async fn test_hold_and_recovery_round_trip() {
    let state = test_state(Arc::new(MockBilling::new()));
    {
        let conn = state.db.get().unwrap();
        insert_subscription(
            &conn,
            "user-1",
            "tok-hold",
            SubscriptionStatus::Active,
            future_timestamp(10),
        );
    }

    let body = push_body(5, "tok-hold", "msg-hold-1", Some(&fresh_publish_time()), None);
    deliver(&state, &body).unwrap();
    {
        let conn = state.db.get().unwrap();
        let sub = queries::get_subscription_by_token(&conn, "tok-hold")
            .unwrap()
            .unwrap();
        assert_eq!(sub.status, SubscriptionStatus::OnHold);
        assert!(!sub.grants_access(now()));
    }

    let body = push_body(1, "tok-hold", "msg-recover-1", Some(&fresh_publish_time()), None);
    deliver(&state, &body).unwrap();
    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-hold")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert!(sub.grants_access(now()));
}

#[tokio::test]
async fn test_unknown_token_acknowledged_without_dispatch() {
    let state = test_state(Arc::new(MockBilling::new()));

    let body = push_body(2, "tok-ghost", "msg-ghost-1", Some(&fresh_publish_time()), None);
    let (status, detail) = deliver(&state, &body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail, "No matching subscription");

    let conn = state.db.get().unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM purchase_events", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_expired_subscription_is_terminal() {
    let state = test_state(Arc::new(MockBilling::new()));
    {
        let conn = state.db.get().unwrap();
        insert_subscription(
            &conn,
            "user-1",
            "tok-dead",
            SubscriptionStatus::Expired,
            past_timestamp(5),
        );
    }

    // A late renewal must not resurrect the row.
    let body = push_body(
        2,
        "tok-dead",
        "msg-late-1",
        Some(&fresh_publish_time()),
        Some(future_timestamp(30) * 1000),
    );
    let (status, detail) = deliver(&state, &body).unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail, "Subscription already expired");

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-dead")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);
    assert_eq!(sub.expiry_date, past_timestamp(5));
}

#[tokio::test]
async fn test_stale_publish_time_rejected_before_idempotency() {
    let state = test_state(Arc::new(MockBilling::new()));
    {
        let conn = state.db.get().unwrap();
        insert_subscription(
            &conn,
            "user-1",
            "tok-stale",
            SubscriptionStatus::Active,
            future_timestamp(10),
        );
    }

    // Ten minutes old against a 60-second window
    let body = push_body(2, "tok-stale", "msg-stale-1", Some(&aged_publish_time(600)), None);
    let result = deliver(&state, &body);
    assert!(matches!(result, Err(AppError::WebhookStale)));

    // The message id was never recorded, so a fresh redelivery of the same
    // id would still be processable.
    let conn = state.db.get().unwrap();
    assert!(queries::try_record_webhook_event(&conn, "msg-stale-1").unwrap());

    let sub = queries::get_subscription_by_token(&conn, "tok-stale")
        .unwrap()
        .unwrap();
    assert_eq!(sub.version, 1);
}

#[tokio::test]
async fn test_expiry_notification_finalizes_subscription() {
    let state = test_state(Arc::new(MockBilling::new()));
    {
        let conn = state.db.get().unwrap();
        insert_subscription(
            &conn,
            "user-1",
            "tok-expire",
            SubscriptionStatus::GracePeriod,
            future_timestamp(1),
        );
    }

    let body = push_body(11, "tok-expire", "msg-exp-1", Some(&fresh_publish_time()), None);
    deliver(&state, &body).unwrap();

    let conn = state.db.get().unwrap();
    let sub = queries::get_subscription_by_token(&conn, "tok-expire")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Expired);

    let events = queries::list_purchase_events(&conn, &sub.id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, PurchaseEventType::Expiry);
}
