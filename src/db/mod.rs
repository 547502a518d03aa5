mod from_row;
pub mod queries;
mod schema;

pub use from_row::{FromRow, PURCHASE_EVENT_COLS, SUBSCRIPTION_COLS};
pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::billing::BillingAuthority;
use crate::breaker::CircuitBreaker;
use crate::rate_limit::RateLimiter;
use crate::webhook::WebhookSignatureVerifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared across handlers.
///
/// Clients and guards are constructed once per process and passed by
/// reference; nothing here is a lazily initialized global.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub billing: Arc<dyn BillingAuthority>,
    pub breaker: Arc<CircuitBreaker>,
    pub limiter: Arc<RateLimiter>,
    /// RSA public key for webhook signature verification; `None` disables
    /// the check (dev mode only).
    pub webhook_verifier: Option<Arc<WebhookSignatureVerifier>>,
    /// Maximum accepted age of a webhook publish time, in seconds.
    pub freshness_window_secs: i64,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
