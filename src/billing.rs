//! Client for the external billing authority.
//!
//! Authentication uses a short-lived bearer credential obtained by posting
//! an RS256-signed assertion to the authority's token endpoint; the
//! credential is cached and refreshed ~60 seconds before expiry.

use std::sync::RwLock;
use std::time::{Duration, Instant};

use jwt_simple::algorithms::{RS256KeyPair, RSAKeyPairLike};
use jwt_simple::claims::Claims;
use jwt_simple::reexports::coarsetime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AppError, PurchaseRejection, Result};

/// How long before credential expiry a refresh is forced.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Bound on any single request to the authority.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Short, loggable fingerprint of a purchase token. Raw tokens never
/// appear in logs or responses.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..6])
}

/// Canonical purchase state as reported by the billing authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPurchase {
    #[serde(default)]
    pub order_id: Option<String>,
    /// 1 = payment received. Anything else is not a completed payment.
    #[serde(default)]
    pub payment_state: Option<i64>,
    pub start_time_millis: i64,
    pub expiry_time_millis: i64,
    #[serde(default)]
    pub auto_renewing: bool,
    #[serde(default)]
    pub price_amount_micros: Option<i64>,
    #[serde(default)]
    pub price_currency_code: Option<String>,
    /// Present when the user or the authority cancelled the purchase.
    #[serde(default)]
    pub cancel_reason: Option<i64>,
    /// Verbatim authority response, kept for forensics only.
    #[serde(skip)]
    pub raw_response: Option<String>,
}

impl ProviderPurchase {
    /// Validate the canonical state for a fresh verification: payment
    /// completed, expiry in the future, no cancellation marker.
    pub fn validate(&self, now_millis: i64) -> std::result::Result<(), PurchaseRejection> {
        if self.payment_state != Some(1) {
            return Err(PurchaseRejection::Incomplete);
        }
        if self.expiry_time_millis <= now_millis {
            return Err(PurchaseRejection::Expired);
        }
        if self.cancel_reason.is_some() {
            return Err(PurchaseRejection::Cancelled);
        }
        Ok(())
    }
}

/// Seam between the verification flow and the wire. The production
/// implementation is [`HttpBillingClient`]; tests script their own.
#[async_trait::async_trait]
pub trait BillingAuthority: Send + Sync {
    /// Fetch the canonical purchase state for a token.
    async fn verify(&self, sku_id: &str, purchase_token: &str) -> Result<ProviderPurchase>;

    /// Acknowledge receipt of a purchase. Best-effort from the caller's
    /// perspective; failures are logged, never surfaced.
    async fn acknowledge(&self, sku_id: &str, purchase_token: &str) -> Result<()>;
}

/// Service-account credentials for minting bearer tokens.
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key_pem: String,
    pub token_url: String,
    pub scope: String,
}

#[derive(Serialize, Deserialize)]
struct AssertionClaims {
    scope: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// HTTP implementation backed by reqwest.
pub struct HttpBillingClient {
    client: Client,
    base_url: String,
    account: ServiceAccount,
    key_pair: RS256KeyPair,
    cached: RwLock<Option<CachedToken>>,
}

impl HttpBillingClient {
    pub fn new(base_url: String, account: ServiceAccount) -> Result<Self> {
        let key_pair = RS256KeyPair::from_pem(&account.private_key_pem)
            .map_err(|e| AppError::Internal(format!("Invalid service account key: {}", e)))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            account,
            key_pair,
            cached: RwLock::new(None),
        })
    }

    fn cached_token(&self) -> Option<String> {
        let guard = self.cached.read().ok()?;
        guard.as_ref().and_then(|c| {
            // Refresh ahead of expiry so in-flight requests never carry a
            // credential about to lapse.
            if c.expires_at.saturating_duration_since(Instant::now()) > TOKEN_REFRESH_MARGIN {
                Some(c.token.clone())
            } else {
                None
            }
        })
    }

    async fn bearer_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let claims = Claims::with_custom_claims(
            AssertionClaims {
                scope: self.account.scope.clone(),
            },
            coarsetime::Duration::from_secs(3600),
        )
        .with_issuer(&self.account.client_email)
        .with_audience(&self.account.token_url);

        let assertion = self
            .key_pair
            .sign(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign assertion: {}", e)))?;

        let response = self
            .client
            .post(&self.account.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Token endpoint returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response.json().await?;
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);

        if let Ok(mut guard) = self.cached.write() {
            *guard = Some(CachedToken {
                token: token.access_token.clone(),
                expires_at,
            });
        }

        Ok(token.access_token)
    }

    fn purchase_url(&self, sku_id: &str, purchase_token: &str) -> String {
        format!(
            "{}/purchases/subscriptions/{}/tokens/{}",
            self.base_url, sku_id, purchase_token
        )
    }
}

#[async_trait::async_trait]
impl BillingAuthority for HttpBillingClient {
    async fn verify(&self, sku_id: &str, purchase_token: &str) -> Result<ProviderPurchase> {
        let bearer = self.bearer_token().await?;
        let response = self
            .client
            .get(self.purchase_url(sku_id, purchase_token))
            .bearer_auth(bearer)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                sku_id,
                token = token_fingerprint(purchase_token),
                %status,
                "Billing authority rejected verification request"
            );
            return Err(AppError::Internal(format!(
                "Billing authority returned {}",
                status
            )));
        }

        let raw = response.text().await?;
        let mut purchase: ProviderPurchase = serde_json::from_str(&raw)?;
        purchase.raw_response = Some(raw);
        Ok(purchase)
    }

    async fn acknowledge(&self, sku_id: &str, purchase_token: &str) -> Result<()> {
        let bearer = self.bearer_token().await?;
        let url = format!("{}:acknowledge", self.purchase_url(sku_id, purchase_token));
        let response = self.client.post(url).bearer_auth(bearer).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "Acknowledge returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Dev-mode stand-in that accepts any token and reports a paid purchase
/// one billing cycle out. Never wired up outside dev mode.
pub struct DevBillingAuthority;

#[async_trait::async_trait]
impl BillingAuthority for DevBillingAuthority {
    async fn verify(&self, sku_id: &str, purchase_token: &str) -> Result<ProviderPurchase> {
        tracing::warn!(
            sku_id,
            token = token_fingerprint(purchase_token),
            "DEV billing stub: accepting purchase without verification"
        );
        let now = chrono::Utc::now().timestamp_millis();
        let cycle_millis = crate::models::Sku::from_id(sku_id)
            .map(|s| s.period.cycle_secs() * 1000)
            .unwrap_or(30 * 86400 * 1000);
        Ok(ProviderPurchase {
            order_id: Some(format!("DEV.{}", token_fingerprint(purchase_token))),
            payment_state: Some(1),
            start_time_millis: now,
            expiry_time_millis: now + cycle_millis,
            auto_renewing: true,
            price_amount_micros: None,
            price_currency_code: None,
            cancel_reason: None,
            raw_response: None,
        })
    }

    async fn acknowledge(&self, _sku_id: &str, _purchase_token: &str) -> Result<()> {
        Ok(())
    }
}
