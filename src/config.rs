use std::env;
use std::fs;
use std::time::Duration;

use crate::billing::ServiceAccount;
use crate::breaker::BreakerConfig;
use crate::error::{AppError, Result};
use crate::rate_limit::RateBudgets;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub base_url: String,
    pub database_path: String,
    pub dev_mode: bool,
    /// Maximum accepted age of a webhook publish time, seconds.
    pub freshness_window_secs: i64,
    /// How long processed webhook message ids are retained, seconds.
    pub webhook_retention_secs: i64,
    pub billing_base_url: Option<String>,
    pub billing_client_email: Option<String>,
    pub billing_private_key_file: Option<String>,
    pub billing_token_url: String,
    pub billing_scope: String,
    pub webhook_public_key_file: Option<String>,
    pub rate_budgets: RateBudgets,
    pub breaker: BreakerConfig,
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("RXBILL_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let defaults = RateBudgets::default();
        let rate_budgets = RateBudgets {
            initiate: env_u32("RXBILL_RATE_INITIATE", defaults.initiate),
            verify_purchase: env_u32("RXBILL_RATE_VERIFY", defaults.verify_purchase),
            status: env_u32("RXBILL_RATE_STATUS", defaults.status),
            cancel: env_u32("RXBILL_RATE_CANCEL", defaults.cancel),
            webhook: env_u32("RXBILL_RATE_WEBHOOK", defaults.webhook),
        };

        let breaker_defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            failure_threshold: env_u32(
                "RXBILL_BREAKER_FAILURES",
                breaker_defaults.failure_threshold,
            ),
            success_threshold: env_u32(
                "RXBILL_BREAKER_SUCCESSES",
                breaker_defaults.success_threshold,
            ),
            cooldown: Duration::from_secs(env_i64("RXBILL_BREAKER_COOLDOWN_SECS", 30).max(1) as u64),
        };

        Self {
            host,
            port,
            base_url,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "rxbill.db".to_string()),
            dev_mode,
            freshness_window_secs: env_i64("RXBILL_WEBHOOK_FRESHNESS_SECS", 60),
            webhook_retention_secs: env_i64("RXBILL_WEBHOOK_RETENTION_SECS", 24 * 3600),
            billing_base_url: env::var("RXBILL_BILLING_BASE_URL").ok(),
            billing_client_email: env::var("RXBILL_BILLING_CLIENT_EMAIL").ok(),
            billing_private_key_file: env::var("RXBILL_BILLING_PRIVATE_KEY_FILE").ok(),
            billing_token_url: env::var("RXBILL_BILLING_TOKEN_URL")
                .unwrap_or_else(|_| "https://oauth2.googleapis.com/token".to_string()),
            billing_scope: env::var("RXBILL_BILLING_SCOPE").unwrap_or_else(|_| {
                "https://www.googleapis.com/auth/androidpublisher".to_string()
            }),
            webhook_public_key_file: env::var("RXBILL_WEBHOOK_PUBLIC_KEY_FILE").ok(),
            rate_budgets,
            breaker,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Service account credentials, when fully configured.
    pub fn service_account(&self) -> Result<Option<ServiceAccount>> {
        let (Some(email), Some(key_file)) =
            (&self.billing_client_email, &self.billing_private_key_file)
        else {
            return Ok(None);
        };
        let private_key_pem = fs::read_to_string(key_file).map_err(|e| {
            AppError::Internal(format!("Failed to read billing key file: {}", e))
        })?;
        Ok(Some(ServiceAccount {
            client_email: email.clone(),
            private_key_pem,
            token_url: self.billing_token_url.clone(),
            scope: self.billing_scope.clone(),
        }))
    }

    /// PEM contents for webhook signature verification, when configured.
    pub fn webhook_public_key_pem(&self) -> Result<Option<String>> {
        match &self.webhook_public_key_file {
            Some(path) => fs::read_to_string(path).map(Some).map_err(|e| {
                AppError::Internal(format!("Failed to read webhook key file: {}", e))
            }),
            None => Ok(None),
        }
    }
}
