use serde::{Deserialize, Serialize};

use super::{PurchaseEventType, SubscriptionStatus};

/// Lifecycle notification codes from the billing authority.
///
/// The authority sends these as small integers; they are decoded into this
/// closed enum at the webhook boundary so every dispatch site is an
/// exhaustive match and a new code is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationType {
    /// (1) Subscription recovered from hold or pause.
    Recovered,
    /// (2) Subscription renewed; expiry advances.
    Renewed,
    /// (3) Cancelled; access persists until expiry.
    Cancelled,
    /// (4) New purchase observed by the authority.
    Purchased,
    /// (5) Entered account hold.
    OnHold,
    /// (6) Entered grace period.
    InGracePeriod,
    /// (7) Restarted by the user after cancellation.
    Restarted,
    /// (8) Price change confirmed by the user.
    PriceChangeConfirmed,
    /// (9) Renewal deferred; informational.
    Deferred,
    /// (11) Subscription expired.
    Expired,
}

impl NotificationType {
    /// Decode the authority's integer code. Unknown codes (including the
    /// never-assigned 10) are rejected at the boundary.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Recovered),
            2 => Some(Self::Renewed),
            3 => Some(Self::Cancelled),
            4 => Some(Self::Purchased),
            5 => Some(Self::OnHold),
            6 => Some(Self::InGracePeriod),
            7 => Some(Self::Restarted),
            8 => Some(Self::PriceChangeConfirmed),
            9 => Some(Self::Deferred),
            11 => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::Recovered => 1,
            Self::Renewed => 2,
            Self::Cancelled => 3,
            Self::Purchased => 4,
            Self::OnHold => 5,
            Self::InGracePeriod => 6,
            Self::Restarted => 7,
            Self::PriceChangeConfirmed => 8,
            Self::Deferred => 9,
            Self::Expired => 11,
        }
    }

    /// The audit event logged when this notification is applied.
    pub fn event_type(&self) -> PurchaseEventType {
        match self {
            Self::Recovered => PurchaseEventType::Recovery,
            Self::Renewed => PurchaseEventType::Renewal,
            Self::Cancelled => PurchaseEventType::Cancellation,
            Self::Purchased => PurchaseEventType::Purchase,
            Self::OnHold => PurchaseEventType::OnHold,
            Self::InGracePeriod => PurchaseEventType::GracePeriod,
            Self::Restarted => PurchaseEventType::Restart,
            Self::PriceChangeConfirmed => PurchaseEventType::PriceChangeConfirmed,
            Self::Deferred => PurchaseEventType::Deferral,
            Self::Expired => PurchaseEventType::Expiry,
        }
    }

    /// Status transition this notification drives, if any.
    ///
    /// Notifications arrive at-least-once and not strictly ordered, so
    /// transitions are applied by target state rather than guarded by an
    /// expected source state. The single hard guard lives in the processor:
    /// a stored `EXPIRED` row is terminal and ignores further transitions.
    pub fn target_status(&self) -> Option<SubscriptionStatus> {
        match self {
            Self::Recovered => Some(SubscriptionStatus::Active),
            Self::Renewed => Some(SubscriptionStatus::Active),
            Self::Cancelled => Some(SubscriptionStatus::Cancelled),
            Self::Purchased => Some(SubscriptionStatus::Active),
            Self::OnHold => Some(SubscriptionStatus::OnHold),
            Self::InGracePeriod => Some(SubscriptionStatus::GracePeriod),
            Self::Restarted => Some(SubscriptionStatus::Active),
            Self::PriceChangeConfirmed => None,
            Self::Deferred => None,
            Self::Expired => Some(SubscriptionStatus::Expired),
        }
    }

    /// Whether this notification advances the expiry date.
    pub fn advances_expiry(&self) -> bool {
        matches!(self, Self::Renewed)
    }
}

/// Push envelope delivered to the webhook endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct PushEnvelope {
    pub message: PushMessage,
    #[serde(default)]
    pub subscription: Option<String>,
}

/// Inner push message: base64 payload plus delivery metadata.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Base64-encoded JSON `LifecycleNotification`.
    pub data: String,
    pub message_id: String,
    /// RFC 3339 publish time, checked against the freshness window.
    #[serde(default)]
    pub publish_time: Option<String>,
}

/// Decoded notification payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleNotification {
    pub version: String,
    pub notification_type: i64,
    pub purchase_token: String,
    /// The authority's product identifier for the affected subscription.
    pub subscription_id: String,
    /// Authoritative new expiry for renewals, when the authority sends one.
    #[serde(default)]
    pub expiry_time_millis: Option<i64>,
}
