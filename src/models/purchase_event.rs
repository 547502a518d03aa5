use serde::{Deserialize, Serialize};

/// Lifecycle event recorded in the append-only audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseEventType {
    Purchase,
    Renewal,
    Cancellation,
    Recovery,
    OnHold,
    GracePeriod,
    Restart,
    PriceChangeConfirmed,
    Deferral,
    Expiry,
}

impl PurchaseEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "PURCHASE",
            Self::Renewal => "RENEWAL",
            Self::Cancellation => "CANCELLATION",
            Self::Recovery => "RECOVERY",
            Self::OnHold => "ON_HOLD",
            Self::GracePeriod => "GRACE_PERIOD",
            Self::Restart => "RESTART",
            Self::PriceChangeConfirmed => "PRICE_CHANGE_CONFIRMED",
            Self::Deferral => "DEFERRAL",
            Self::Expiry => "EXPIRY",
        }
    }
}

impl std::str::FromStr for PurchaseEventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PURCHASE" => Ok(Self::Purchase),
            "RENEWAL" => Ok(Self::Renewal),
            "CANCELLATION" => Ok(Self::Cancellation),
            "RECOVERY" => Ok(Self::Recovery),
            "ON_HOLD" => Ok(Self::OnHold),
            "GRACE_PERIOD" => Ok(Self::GracePeriod),
            "RESTART" => Ok(Self::Restart),
            "PRICE_CHANGE_CONFIRMED" => Ok(Self::PriceChangeConfirmed),
            "DEFERRAL" => Ok(Self::Deferral),
            "EXPIRY" => Ok(Self::Expiry),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for PurchaseEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit record, written in the same transaction as the
/// subscription mutation it describes. Never updated, never deleted, and
/// never read back by the state machine itself.
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseEvent {
    pub id: String,
    pub subscription_id: String,
    pub user_id: String,
    pub event_type: PurchaseEventType,
    /// Structured JSON payload (fraud reasons, notification codes, ...).
    pub event_data: serde_json::Value,
    pub created_at: i64,
}

/// Data required to append a purchase event.
#[derive(Debug, Clone)]
pub struct CreatePurchaseEvent {
    pub subscription_id: String,
    pub user_id: String,
    pub event_type: PurchaseEventType,
    pub event_data: serde_json::Value,
}
