//! Webhook ingestion pipeline for billing authority lifecycle notifications.
//!
//! Delivery is at-least-once and not strictly ordered. The pipeline is:
//! signature check (before any parsing), structural validation, freshness
//! check, idempotency gate, then transition dispatch. The message id is
//! recorded BEFORE dispatch so a crash mid-dispatch cannot cause unbounded
//! reprocessing on redelivery - an occasional missed side effect is
//! accepted over duplicate side effects.
//!
//! The processor prefers 200 responses: a notification for an unknown
//! purchase token is acknowledged and logged, never an error, because the
//! notification may race ahead of purchase-flow completion.

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use rusqlite::Connection;
use sha1::{Digest, Sha1};

use crate::billing::token_fingerprint;
use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::{
    CreatePurchaseEvent, LifecycleNotification, NotificationType, PushEnvelope, Sku,
};

/// Response tuple the webhook handler sends back to the push origin.
pub type WebhookResult = (StatusCode, &'static str);

/// Future clock-skew tolerance on publish times, seconds.
const FUTURE_SKEW_TOLERANCE_SECS: i64 = 60;

// ============ Signature verification ============

/// RSA-SHA1 verifier over the canonical (raw) message body, per the
/// billing authority's webhook contract. Configured from a PEM public key;
/// absent configuration disables the check (dev mode only).
pub struct WebhookSignatureVerifier {
    public_key: RsaPublicKey,
}

impl WebhookSignatureVerifier {
    pub fn from_pem(pem: &str) -> Result<Self> {
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| AppError::Internal(format!("Invalid webhook public key: {}", e)))?;
        Ok(Self { public_key })
    }

    /// Verify a base64 signature over the raw body.
    pub fn verify(&self, body: &[u8], signature_b64: &str) -> bool {
        let Ok(signature) = BASE64.decode(signature_b64.trim()) else {
            return false;
        };
        let hashed = Sha1::digest(body);
        self.public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), &hashed, &signature)
            .is_ok()
    }
}

// ============ Structural validation ============

/// A structurally valid notification, decoded and ready for dispatch.
#[derive(Debug)]
pub struct ValidatedNotification {
    pub message_id: String,
    pub publish_time: Option<i64>,
    pub notification_type: NotificationType,
    pub notification: LifecycleNotification,
}

/// Decode and validate the raw push body. Any violation maps to a generic
/// 400 without echoing the payload.
pub fn decode_push(body: &[u8]) -> Result<ValidatedNotification> {
    let envelope: PushEnvelope =
        serde_json::from_slice(body).map_err(|_| AppError::WebhookMalformed)?;

    if envelope.message.message_id.is_empty() {
        return Err(AppError::WebhookMalformed);
    }

    let payload = BASE64
        .decode(envelope.message.data.as_bytes())
        .map_err(|_| AppError::WebhookMalformed)?;
    let notification: LifecycleNotification =
        serde_json::from_slice(&payload).map_err(|_| AppError::WebhookMalformed)?;

    if notification.purchase_token.is_empty() || notification.subscription_id.is_empty() {
        return Err(AppError::WebhookMalformed);
    }

    let notification_type = NotificationType::from_code(notification.notification_type)
        .ok_or(AppError::WebhookMalformed)?;

    let publish_time = envelope
        .message
        .publish_time
        .as_deref()
        .map(|t| {
            DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.timestamp())
                .map_err(|_| AppError::WebhookMalformed)
        })
        .transpose()?;

    Ok(ValidatedNotification {
        message_id: envelope.message.message_id,
        publish_time,
        notification_type,
        notification,
    })
}

/// Freshness gate: reject messages whose declared publish time falls
/// outside the acceptance window. Defends against stale replays being fed
/// back in.
pub fn check_freshness(publish_time: Option<i64>, window_secs: i64, now: i64) -> Result<()> {
    let Some(published) = publish_time else {
        // Authority contract always includes publishTime; tolerate absence
        // rather than dropping a live notification.
        return Ok(());
    };
    let age = now - published;
    if age > window_secs || age < -FUTURE_SKEW_TOLERANCE_SECS {
        tracing::warn!(age_secs = age, window_secs, "Webhook rejected by freshness check");
        return Err(AppError::WebhookStale);
    }
    Ok(())
}

// ============ Dispatch ============

/// Apply a validated notification end to end. Returns the response the
/// handler should send.
pub fn process_notification(
    state: &AppState,
    validated: &ValidatedNotification,
) -> Result<WebhookResult> {
    let now = Utc::now().timestamp();
    check_freshness(validated.publish_time, state.freshness_window_secs, now)?;

    let mut conn = state.db.get()?;

    // Idempotency: record the message id before any side effect. A
    // duplicate delivery is acknowledged without re-dispatching.
    if !queries::try_record_webhook_event(&conn, &validated.message_id)? {
        tracing::debug!(
            message_id = %validated.message_id,
            "Duplicate webhook delivery; already processed"
        );
        return Ok((StatusCode::OK, "Already processed"));
    }

    dispatch_transition(&mut conn, validated, now)
}

fn dispatch_transition(
    conn: &mut Connection,
    validated: &ValidatedNotification,
    now: i64,
) -> Result<WebhookResult> {
    let notification = &validated.notification;
    let notification_type = validated.notification_type;

    // Lookup strictly by purchase token; notification-embedded identifiers
    // are not guaranteed present or trustworthy.
    let Some(subscription) =
        queries::get_subscription_by_token(conn, &notification.purchase_token)?
    else {
        tracing::info!(
            token = token_fingerprint(&notification.purchase_token),
            notification_type = notification_type.code(),
            "Notification for unknown purchase token; acknowledging without dispatch"
        );
        return Ok((StatusCode::OK, "No matching subscription"));
    };

    if subscription.status.is_terminal() {
        tracing::info!(
            subscription_id = %subscription.id,
            notification_type = notification_type.code(),
            "Notification for expired subscription ignored"
        );
        return Ok((StatusCode::OK, "Subscription already expired"));
    }

    let mut update = queries::TransitionUpdate {
        status: notification_type.target_status(),
        ..Default::default()
    };

    let mut new_expiry = None;
    if notification_type.advances_expiry() {
        // Authoritative expiry when the notification carries one, otherwise
        // one billing cycle from the stored expiry.
        let advanced = notification
            .expiry_time_millis
            .map(|ms| ms / 1000)
            .unwrap_or_else(|| {
                let cycle = Sku::from_id(&subscription.sku_id)
                    .map(|s| s.period.cycle_secs())
                    .unwrap_or(30 * 86400);
                subscription.expiry_date + cycle
            });
        new_expiry = Some(advanced);
        update.expiry_date = new_expiry;
        update.renewal_date = Some(now);
    }

    if notification_type == NotificationType::Cancelled {
        update.cancellation_date = Some(now);
        update.auto_renew = Some(false);
    }

    let event_data = serde_json::json!({
        "message_id": validated.message_id,
        "notification_type": notification_type.code(),
        "notification_version": notification.version,
        "provider_subscription_id": notification.subscription_id,
        "new_expiry_date": new_expiry,
    });

    // Subscription update and event append commit together or not at all.
    let tx = conn.transaction()?;
    let mut applied = true;

    if update.status.is_some() || update.expiry_date.is_some() {
        applied = queries::apply_transition(&tx, &subscription.id, subscription.version, &update)?;
        if !applied {
            // Row moved under us; retry once against the fresh version.
            if let Some(fresh) =
                queries::get_subscription_by_token(&tx, &notification.purchase_token)?
            {
                if fresh.status.is_terminal() {
                    return Ok((StatusCode::OK, "Subscription already expired"));
                }
                applied = queries::apply_transition(&tx, &fresh.id, fresh.version, &update)?;
            }
        }
    }

    if !applied {
        tracing::error!(
            subscription_id = %subscription.id,
            "Transition lost optimistic concurrency race twice; dropping"
        );
        return Err(AppError::Internal("Concurrent subscription update".into()));
    }

    queries::insert_purchase_event(
        &tx,
        &CreatePurchaseEvent {
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            event_type: notification_type.event_type(),
            event_data,
        },
    )?;

    tx.commit()?;

    tracing::info!(
        subscription_id = %subscription.id,
        notification_type = notification_type.code(),
        new_status = ?update.status.map(|s| s.as_str()),
        "Lifecycle notification applied"
    );

    Ok((StatusCode::OK, "OK"))
}

#[cfg(test)]
mod tests {
    use super::*;

    use rsa::pkcs8::{EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;

    fn keypair() -> (RsaPrivateKey, WebhookSignatureVerifier) {
        // Small key keeps generation fast; the padding path is identical.
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        (key, WebhookSignatureVerifier::from_pem(&pem).unwrap())
    }

    fn sign(key: &RsaPrivateKey, body: &[u8]) -> String {
        let hashed = Sha1::digest(body);
        BASE64.encode(key.sign(Pkcs1v15Sign::new::<Sha1>(), &hashed).unwrap())
    }

    #[test]
    fn test_signature_verifies_exact_body() {
        let (key, verifier) = keypair();
        let body = br#"{"message":{"messageId":"m-1"}}"#;
        let signature = sign(&key, body);
        assert!(verifier.verify(body, &signature));
        // Whitespace-padded header value still verifies
        assert!(verifier.verify(body, &format!(" {} ", signature)));
    }

    #[test]
    fn test_signature_rejects_tampered_body() {
        let (key, verifier) = keypair();
        let signature = sign(&key, br#"{"message":{"messageId":"m-1"}}"#);
        assert!(!verifier.verify(br#"{"message":{"messageId":"m-2"}}"#, &signature));
    }

    #[test]
    fn test_signature_rejects_malformed_signature() {
        let (_, verifier) = keypair();
        assert!(!verifier.verify(b"body", "!!not-base64!!"));
        assert!(!verifier.verify(b"body", &BASE64.encode([0u8; 128])));
    }

    #[test]
    fn test_signature_rejects_foreign_key() {
        let (other_key, _) = keypair();
        let (_, verifier) = keypair();
        let body = br#"{"message":{"messageId":"m-1"}}"#;
        assert!(!verifier.verify(body, &sign(&other_key, body)));
    }

    #[test]
    fn test_verifier_rejects_invalid_pem() {
        assert!(WebhookSignatureVerifier::from_pem("not a pem").is_err());
    }

    fn envelope(data: &str, message_id: &str, publish_time: Option<&str>) -> Vec<u8> {
        let mut message = serde_json::json!({
            "data": BASE64.encode(data),
            "messageId": message_id,
        });
        if let Some(pt) = publish_time {
            message["publishTime"] = serde_json::json!(pt);
        }
        serde_json::to_vec(&serde_json::json!({ "message": message })).unwrap()
    }

    fn notification_json(notification_type: i64) -> String {
        serde_json::json!({
            "version": "1.0",
            "notificationType": notification_type,
            "purchaseToken": "tok-1",
            "subscriptionId": "pharmacy_monthly",
        })
        .to_string()
    }

    #[test]
    fn test_decode_valid_push() {
        let body = envelope(&notification_json(2), "m-1", Some("2026-08-27T10:00:00Z"));
        let validated = decode_push(&body).unwrap();
        assert_eq!(validated.message_id, "m-1");
        assert_eq!(validated.notification_type, NotificationType::Renewed);
        assert_eq!(validated.notification.purchase_token, "tok-1");
        assert!(validated.publish_time.is_some());
    }

    #[test]
    fn test_decode_rejects_missing_message_id() {
        let body = envelope(&notification_json(2), "", None);
        assert!(matches!(
            decode_push(&body),
            Err(AppError::WebhookMalformed)
        ));
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let body = serde_json::to_vec(&serde_json::json!({
            "message": { "data": "!!not-base64!!", "messageId": "m-1" }
        }))
        .unwrap();
        assert!(matches!(
            decode_push(&body),
            Err(AppError::WebhookMalformed)
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_notification_type() {
        let body = envelope(&notification_json(10), "m-1", None);
        assert!(matches!(
            decode_push(&body),
            Err(AppError::WebhookMalformed)
        ));
    }

    #[test]
    fn test_decode_rejects_non_json_payload() {
        let body = envelope("plainly not json", "m-1", None);
        assert!(matches!(
            decode_push(&body),
            Err(AppError::WebhookMalformed)
        ));
    }

    #[test]
    fn test_freshness_window() {
        let now = 1_000_000;
        assert!(check_freshness(Some(now - 30), 60, now).is_ok());
        assert!(matches!(
            check_freshness(Some(now - 300), 60, now),
            Err(AppError::WebhookStale)
        ));
        // Missing publish time tolerated
        assert!(check_freshness(None, 60, now).is_ok());
        // Far-future timestamps are also rejected
        assert!(matches!(
            check_freshness(Some(now + 300), 60, now),
            Err(AppError::WebhookStale)
        ));
    }
}
