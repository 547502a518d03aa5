use serde::{Deserialize, Serialize};

/// Line of business a subscription belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessType {
    Pharmacy,
    Laboratory,
}

impl BusinessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pharmacy => "pharmacy",
            Self::Laboratory => "laboratory",
        }
    }
}

impl std::str::FromStr for BusinessType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pharmacy" => Ok(Self::Pharmacy),
            "laboratory" => Ok(Self::Laboratory),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for BusinessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cycle encoded in the SKU suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingPeriod {
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    /// Nominal cycle length in seconds, used only when a lifecycle
    /// notification carries no authoritative expiry of its own.
    pub fn cycle_secs(&self) -> i64 {
        match self {
            Self::Monthly => 30 * 86400,
            Self::Annual => 365 * 86400,
        }
    }
}

/// A known product SKU. The catalog is closed: `{pharmacy, laboratory} x
/// {monthly, annual}`. Anything else is rejected before touching the
/// billing authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sku {
    pub id: &'static str,
    pub business_type: BusinessType,
    pub period: BillingPeriod,
    /// List price in micros of `currency_code` (1 LKR = 1_000_000 micros).
    pub price_amount_micros: i64,
    pub currency_code: &'static str,
}

/// The full closed SKU catalog.
pub const SKU_CATALOG: &[Sku] = &[
    Sku {
        id: "pharmacy_monthly",
        business_type: BusinessType::Pharmacy,
        period: BillingPeriod::Monthly,
        price_amount_micros: 1_500_000_000,
        currency_code: "LKR",
    },
    Sku {
        id: "pharmacy_annual",
        business_type: BusinessType::Pharmacy,
        period: BillingPeriod::Annual,
        price_amount_micros: 15_000_000_000,
        currency_code: "LKR",
    },
    Sku {
        id: "laboratory_monthly",
        business_type: BusinessType::Laboratory,
        period: BillingPeriod::Monthly,
        price_amount_micros: 2_500_000_000,
        currency_code: "LKR",
    },
    Sku {
        id: "laboratory_annual",
        business_type: BusinessType::Laboratory,
        period: BillingPeriod::Annual,
        price_amount_micros: 25_000_000_000,
        currency_code: "LKR",
    },
];

impl Sku {
    /// Look up a SKU by its exact identifier.
    pub fn from_id(id: &str) -> Option<&'static Sku> {
        SKU_CATALOG.iter().find(|s| s.id == id)
    }

    /// SKUs offered for one business type (the `initiate` pricing options).
    pub fn for_business_type(bt: BusinessType) -> Vec<&'static Sku> {
        SKU_CATALOG
            .iter()
            .filter(|s| s.business_type == bt)
            .collect()
    }
}
