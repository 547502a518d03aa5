use serde::{Deserialize, Serialize};

use super::BusinessType;

const SECONDS_PER_DAY: i64 = 86400;

/// Last durably written lifecycle state of a subscription.
///
/// The *effective* status exposed to callers additionally derives `Expired`
/// when the expiry timestamp has passed (lazy expiry) - see
/// [`Subscription::effective_status`]. Stored and effective status may
/// diverge until the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Paused,
    OnHold,
    GracePeriod,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Paused => "PAUSED",
            Self::OnHold => "ON_HOLD",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Stored `EXPIRED` is terminal; no notification moves a row out of it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "PAUSED" => Ok(Self::Paused),
            "ON_HOLD" => Ok(Self::OnHold),
            "GRACE_PERIOD" => Ok(Self::GracePeriod),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One active-or-historical subscription row per purchase lineage.
///
/// `purchase_token` is globally unique: at most one row may ever bind to a
/// given token. All timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub business_type: BusinessType,
    pub sku_id: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub status: SubscriptionStatus,
    pub purchase_date: i64,
    pub expiry_date: i64,
    pub renewal_date: Option<i64>,
    pub auto_renew: bool,
    pub price_amount_micros: i64,
    pub currency_code: String,
    pub cancellation_date: Option<i64>,
    pub cancellation_reason: Option<String>,
    /// Opaque audit blob from the billing authority. Forensics only,
    /// never consulted by the state machine.
    pub raw_provider_response: Option<String>,
    /// Monotonic write counter used for optimistic concurrency on
    /// transition writes.
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Status as reported to callers: stored status plus lazy expiry.
    pub fn effective_status(&self, now: i64) -> SubscriptionStatus {
        if self.expiry_date < now && !self.status.is_terminal() {
            SubscriptionStatus::Expired
        } else {
            self.status
        }
    }

    /// Whole days of access left, `ceil((expiry - now) / day)`, floored at 0.
    pub fn days_remaining(&self, now: i64) -> i64 {
        let secs = self.expiry_date - now;
        if secs <= 0 {
            0
        } else {
            (secs + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY
        }
    }

    /// A cancelled-but-not-yet-expired subscription remains usable until
    /// its expiry date (grace semantics).
    pub fn grants_access(&self, now: i64) -> bool {
        !matches!(
            self.effective_status(now),
            SubscriptionStatus::Expired | SubscriptionStatus::OnHold
        )
    }
}

/// Data required to persist a freshly verified subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscription {
    pub user_id: String,
    pub business_type: BusinessType,
    pub sku_id: String,
    pub purchase_token: String,
    pub order_id: Option<String>,
    pub status: SubscriptionStatus,
    pub purchase_date: i64,
    pub expiry_date: i64,
    pub auto_renew: bool,
    pub price_amount_micros: i64,
    pub currency_code: String,
    pub raw_provider_response: Option<String>,
}
