use rusqlite::Connection;

/// Initialize the database schema.
///
/// Both producers (purchase flow, webhook flow) commit a subscription write
/// and its purchase event in one transaction, so everything lives in a
/// single database file.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Subscriptions (one row per purchase lineage)
        -- purchase_token is globally unique: a token binds to at most one row, ever.
        -- version: monotonic write counter for optimistic CAS on transitions.
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            business_type TEXT NOT NULL CHECK (business_type IN ('pharmacy', 'laboratory')),
            sku_id TEXT NOT NULL,
            purchase_token TEXT NOT NULL UNIQUE,
            order_id TEXT,
            status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'PAUSED', 'ON_HOLD', 'GRACE_PERIOD', 'CANCELLED', 'EXPIRED')),
            purchase_date INTEGER NOT NULL,
            expiry_date INTEGER NOT NULL,
            renewal_date INTEGER,
            auto_renew INTEGER NOT NULL DEFAULT 1,
            price_amount_micros INTEGER NOT NULL,
            currency_code TEXT NOT NULL,
            cancellation_date INTEGER,
            cancellation_reason TEXT,
            raw_provider_response TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,

            CHECK (expiry_date > purchase_date)
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_subscriptions_token ON subscriptions(purchase_token);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions(user_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_subscriptions_status ON subscriptions(status);

        -- Purchase events (append-only audit trail; never updated or deleted)
        CREATE TABLE IF NOT EXISTS purchase_events (
            id TEXT PRIMARY KEY,
            subscription_id TEXT NOT NULL REFERENCES subscriptions(id),
            user_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            event_data TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_purchase_events_subscription ON purchase_events(subscription_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_purchase_events_user ON purchase_events(user_id);

        -- Webhook idempotency ledger (at-least-once delivery safety)
        -- Rows older than the retention window are purged by a background task.
        CREATE TABLE IF NOT EXISTS webhook_events (
            message_id TEXT PRIMARY KEY,
            first_seen_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_webhook_events_seen ON webhook_events(first_seen_at);
        "#,
    )?;
    Ok(())
}
