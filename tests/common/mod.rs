//! Test utilities and fixtures for rxbill integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use rusqlite::Connection;
use sha1::{Digest, Sha1};

pub use rxbill::billing::{BillingAuthority, ProviderPurchase};
pub use rxbill::breaker::{BreakerConfig, CircuitBreaker};
pub use rxbill::db::{init_db, queries, AppState};
pub use rxbill::error::{AppError, PurchaseRejection};
pub use rxbill::models::*;
pub use rxbill::rate_limit::{RateBudgets, RateLimiter};
pub use rxbill::webhook::WebhookSignatureVerifier;

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Get a future timestamp (days from now)
pub fn future_timestamp(days: i64) -> i64 {
    now() + (days * 86400)
}

/// Get a past timestamp (days ago)
pub fn past_timestamp(days: i64) -> i64 {
    now() - (days * 86400)
}

/// Create an in-memory test database with schema initialized
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

// ============ Scripted billing authority ============

/// One scripted response from the mock billing authority.
pub enum ScriptedVerify {
    Purchase(ProviderPurchase),
    Unavailable,
}

/// Billing authority double: plays back a scripted queue of responses and
/// counts calls. An empty queue yields a default paid purchase.
pub struct MockBilling {
    script: Mutex<VecDeque<ScriptedVerify>>,
    pub verify_calls: AtomicUsize,
    pub ack_calls: AtomicUsize,
}

impl MockBilling {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            verify_calls: AtomicUsize::new(0),
            ack_calls: AtomicUsize::new(0),
        }
    }

    pub fn push(&self, response: ScriptedVerify) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn verify_count(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn ack_count(&self) -> usize {
        self.ack_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BillingAuthority for MockBilling {
    async fn verify(
        &self,
        _sku_id: &str,
        _purchase_token: &str,
    ) -> rxbill::error::Result<ProviderPurchase> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedVerify::Purchase(p)) => Ok(p),
            Some(ScriptedVerify::Unavailable) => {
                Err(AppError::Internal("Billing authority unreachable".into()))
            }
            None => Ok(paid_purchase(30)),
        }
    }

    async fn acknowledge(&self, _sku_id: &str, _purchase_token: &str) -> rxbill::error::Result<()> {
        self.ack_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A completed, auto-renewing purchase expiring `days` from now.
pub fn paid_purchase(days: i64) -> ProviderPurchase {
    let now_millis = now() * 1000;
    ProviderPurchase {
        order_id: Some("GPA.TEST.1".to_string()),
        payment_state: Some(1),
        start_time_millis: now_millis,
        expiry_time_millis: now_millis + days * 86400 * 1000,
        auto_renewing: true,
        price_amount_micros: Some(1_500_000_000),
        price_currency_code: Some("LKR".to_string()),
        cancel_reason: None,
        raw_response: None,
    }
}

// ============ App state ============

/// AppState backed by a single-connection in-memory database and the given
/// billing double. Signature verification is disabled.
pub fn test_state(billing: Arc<dyn BillingAuthority>) -> AppState {
    test_state_with_budgets(billing, RateBudgets::default())
}

pub fn test_state_with_budgets(
    billing: Arc<dyn BillingAuthority>,
    budgets: RateBudgets,
) -> AppState {
    let manager = SqliteConnectionManager::memory();
    // One connection: the in-memory database is per-connection.
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        billing,
        breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default())),
        limiter: Arc::new(RateLimiter::new(budgets)),
        webhook_verifier: None,
        freshness_window_secs: 60,
    }
}

// ============ Fixtures ============

/// Insert a subscription row directly, bypassing the verification flow.
pub fn insert_subscription(
    conn: &Connection,
    user_id: &str,
    purchase_token: &str,
    status: SubscriptionStatus,
    expiry_date: i64,
) -> Subscription {
    let input = CreateSubscription {
        user_id: user_id.to_string(),
        business_type: BusinessType::Pharmacy,
        sku_id: "pharmacy_monthly".to_string(),
        purchase_token: purchase_token.to_string(),
        order_id: Some("GPA.TEST.1".to_string()),
        status,
        purchase_date: expiry_date - 30 * 86400,
        expiry_date,
        auto_renew: true,
        price_amount_micros: 1_500_000_000,
        currency_code: "LKR".to_string(),
        raw_provider_response: None,
    };
    queries::create_subscription(conn, &input).expect("Failed to insert test subscription")
}

/// Build a raw push body for a lifecycle notification.
pub fn push_body(
    notification_type: i64,
    purchase_token: &str,
    message_id: &str,
    publish_time: Option<&str>,
    expiry_time_millis: Option<i64>,
) -> Vec<u8> {
    let mut notification = serde_json::json!({
        "version": "1.0",
        "notificationType": notification_type,
        "purchaseToken": purchase_token,
        "subscriptionId": "pharmacy_monthly",
    });
    if let Some(expiry) = expiry_time_millis {
        notification["expiryTimeMillis"] = serde_json::json!(expiry);
    }

    let mut message = serde_json::json!({
        "data": BASE64.encode(notification.to_string()),
        "messageId": message_id,
    });
    if let Some(pt) = publish_time {
        message["publishTime"] = serde_json::json!(pt);
    }

    serde_json::to_vec(&serde_json::json!({ "message": message })).unwrap()
}

/// Keypair for signed-webhook tests: the verifier goes into `AppState`,
/// the private key signs request bodies.
pub fn webhook_keypair() -> (RsaPrivateKey, WebhookSignatureVerifier) {
    // Small key keeps generation fast; the padding path is identical.
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("Failed to generate key");
    let pem = key
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("Failed to encode public key");
    let verifier = WebhookSignatureVerifier::from_pem(&pem).expect("Failed to build verifier");
    (key, verifier)
}

/// Base64 RSA-SHA1 signature over the raw body, as the push origin sends it.
pub fn sign_webhook_body(key: &RsaPrivateKey, body: &[u8]) -> String {
    let hashed = Sha1::digest(body);
    BASE64.encode(
        key.sign(Pkcs1v15Sign::new::<Sha1>(), &hashed)
            .expect("Failed to sign body"),
    )
}

/// Current time as the RFC 3339 publish time the push envelope carries.
pub fn fresh_publish_time() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// A publish time `secs` seconds in the past.
pub fn aged_publish_time(secs: i64) -> String {
    chrono::DateTime::from_timestamp(now() - secs, 0)
        .unwrap()
        .to_rfc3339()
}
