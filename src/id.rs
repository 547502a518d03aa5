//! Prefixed ID generation for rxbill entities.
//!
//! All IDs use an `rx_` brand prefix to guarantee collision avoidance with
//! the billing authority's own identifiers (order IDs, purchase tokens).
//!
//! Format: `rx_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["rx_sub_", "rx_evt_"];

/// Validate that a string is a valid rxbill prefixed ID.
///
/// Cheap check to reject garbage before hitting the database.
/// Validates format: `rx_{entity}_{32_hex_chars}`
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in rxbill.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Subscription,
    PurchaseEvent,
}

impl EntityType {
    /// Returns the prefix for this entity type.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Subscription => "rx_sub",
            Self::PurchaseEvent => "rx_evt",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_format() {
        let id = EntityType::Subscription.gen_id();
        assert!(id.starts_with("rx_sub_"));
        // rx_sub_ (7 chars) + 32 hex chars = 39 chars total
        assert_eq!(id.len(), 39);
    }

    #[test]
    fn test_ids_are_unique() {
        let id1 = EntityType::PurchaseEvent.gen_id();
        let id2 = EntityType::PurchaseEvent.gen_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_is_valid_prefixed_id() {
        assert!(is_valid_prefixed_id("rx_sub_a1b2c3d4e5f6789012345678901234ab"));
        assert!(is_valid_prefixed_id(&EntityType::Subscription.gen_id()));
        assert!(is_valid_prefixed_id(&EntityType::PurchaseEvent.gen_id()));

        assert!(!is_valid_prefixed_id(""));
        assert!(!is_valid_prefixed_id("a1b2c3d4-e5f6-7890-1234-567890123456"));
        assert!(!is_valid_prefixed_id("rx_unknown_a1b2c3d4e5f6789012345678901234ab"));
        assert!(!is_valid_prefixed_id("rx_sub_a1b2c3d4"));
        assert!(!is_valid_prefixed_id("rx_sub_a1b2c3d4e5f6789012345678901234gg"));
        assert!(!is_valid_prefixed_id("sub_a1b2c3d4e5f6789012345678901234ab"));
    }
}
