use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rxbill::billing::{BillingAuthority, DevBillingAuthority, HttpBillingClient};
use rxbill::breaker::CircuitBreaker;
use rxbill::config::Config;
use rxbill::db::{create_pool, init_db, queries, AppState};
use rxbill::handlers;
use rxbill::models::{BusinessType, CreateSubscription, SubscriptionStatus};
use rxbill::rate_limit::RateLimiter;
use rxbill::webhook::WebhookSignatureVerifier;

#[derive(Parser, Debug)]
#[command(name = "rxbill")]
#[command(about = "Purchase verification and subscription state engine")]
struct Cli {
    /// Seed the database with a dev subscription
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with one active dev subscription so the status and
/// cancel endpoints have something to work with. Only runs in dev mode and
/// when the user has no subscription yet.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let existing = queries::get_latest_subscription_for_user(&conn, "dev-user")
        .expect("Failed to query dev subscription");
    if existing.is_some() {
        tracing::info!("Dev subscription already exists, skipping seed");
        return;
    }

    let now = chrono::Utc::now().timestamp();
    let create = CreateSubscription {
        user_id: "dev-user".to_string(),
        business_type: BusinessType::Pharmacy,
        sku_id: "pharmacy_monthly".to_string(),
        purchase_token: format!("dev-token-{}", uuid::Uuid::new_v4().as_simple()),
        order_id: Some("DEV.SEED.1".to_string()),
        status: SubscriptionStatus::Active,
        purchase_date: now,
        expiry_date: now + 30 * 86400,
        auto_renew: true,
        price_amount_micros: 1_500_000_000,
        currency_code: "LKR".to_string(),
        raw_provider_response: None,
    };
    let subscription =
        queries::create_subscription(&conn, &create).expect("Failed to create dev subscription");

    tracing::info!("============================================");
    tracing::info!("DEV SUBSCRIPTION SEEDED");
    tracing::info!("User ID: dev-user");
    tracing::info!("Subscription: {}", subscription.id);
    tracing::info!("Purchase Token: {}", subscription.purchase_token);
    tracing::info!("============================================");
}

/// Spawns a background task that periodically purges processed webhook
/// message ids older than the retention window.
fn spawn_purge_task(state: AppState, retention_secs: i64) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(15 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => match queries::purge_old_webhook_events(&conn, retention_secs) {
                    Ok(count) => {
                        if count > 0 {
                            tracing::debug!("Purged {} processed webhook message ids", count);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to purge webhook events: {}", e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to get db connection for purge: {}", e);
                }
            }
        }
    });

    tracing::info!("Background webhook purge task started (runs every 15 minutes)");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rxbill=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    // Billing authority: real HTTP client when credentials are configured,
    // a loud stub in dev mode, refusal to start otherwise.
    let billing: Arc<dyn BillingAuthority> = match config
        .service_account()
        .expect("Failed to load billing credentials")
    {
        Some(account) => {
            let base_url = config
                .billing_base_url
                .clone()
                .expect("RXBILL_BILLING_BASE_URL is required with billing credentials");
            Arc::new(
                HttpBillingClient::new(base_url, account)
                    .expect("Failed to build billing client"),
            )
        }
        None if config.dev_mode => {
            tracing::warn!("No billing credentials configured; using DEV billing stub");
            Arc::new(DevBillingAuthority)
        }
        None => {
            panic!("Billing credentials are required outside dev mode (set RXBILL_BILLING_CLIENT_EMAIL and RXBILL_BILLING_PRIVATE_KEY_FILE)")
        }
    };

    let webhook_verifier = match config
        .webhook_public_key_pem()
        .expect("Failed to load webhook public key")
    {
        Some(pem) => Some(Arc::new(
            WebhookSignatureVerifier::from_pem(&pem)
                .expect("Failed to parse webhook public key"),
        )),
        None if config.dev_mode => {
            tracing::warn!("No webhook public key configured; signature check disabled");
            None
        }
        None => {
            panic!("Webhook public key is required outside dev mode (set RXBILL_WEBHOOK_PUBLIC_KEY_FILE)")
        }
    };

    let state = AppState {
        db: db_pool,
        billing,
        breaker: Arc::new(CircuitBreaker::new(config.breaker.clone())),
        limiter: Arc::new(RateLimiter::new(config.rate_budgets.clone())),
        webhook_verifier,
        freshness_window_secs: config.freshness_window_secs,
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set RXBILL_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    spawn_purge_task(state.clone(), config.webhook_retention_secs);

    let app = Router::new()
        .merge(handlers::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("rxbill server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
