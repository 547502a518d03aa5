//! Fraud likelihood scoring for purchase verification.
//!
//! A pure, deterministic function of the purchase context. Each rule is
//! independent and additive; callers decide enforcement policy from the
//! resulting risk level. The reasons list is folded into the purchase
//! event's audit payload and never returned to external callers.

use serde::Serialize;

use crate::models::BusinessType;

/// Email domains of common consumer providers. A purchase from one of
/// these is unremarkable; the domain rule targets throwaway-looking hosts.
const CONSUMER_EMAIL_DOMAINS: &[&str] = &[
    "gmail.com",
    "yahoo.com",
    "outlook.com",
    "hotmail.com",
    "icloud.com",
    "protonmail.com",
    "proton.me",
    "live.com",
    "aol.com",
];

/// Domain keywords plausible for each business type.
const PHARMACY_KEYWORDS: &[&str] = &["pharm", "chemist", "drug", "med", "health"];
const LABORATORY_KEYWORDS: &[&str] = &["lab", "diagnostic", "patho", "med", "health"];

/// Professional top-level domains accepted without a keyword match.
const PROFESSIONAL_TLDS: &[&str] = &["lk", "org", "edu", "gov", "health"];

/// One LKR expressed in price micros.
const LKR_MICROS: i64 = 1_000_000;

/// Prices below LKR 100 are implausibly cheap for any plan.
const MIN_PLAUSIBLE_PRICE_MICROS: i64 = 100 * LKR_MICROS;
/// Prices above LKR 100,000 are implausibly expensive.
const MAX_PLAUSIBLE_PRICE_MICROS: i64 = 100_000 * LKR_MICROS;

/// Tokens from the billing authority are long and opaque; anything short
/// or containing test markers is the strongest single fraud signal.
const MIN_PLAUSIBLE_TOKEN_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    fn from_score(score: u32) -> Self {
        match score {
            80.. => Self::Critical,
            60..=79 => Self::High,
            30..=59 => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Everything the scorer looks at. Assembled by the verification service
/// from the request plus durable user history.
#[derive(Debug, Clone)]
pub struct PurchaseValidationContext {
    pub account_age_days: i64,
    pub prior_purchase_count: i64,
    pub purchase_token: String,
    /// Price in micros of LKR-equivalent.
    pub price_amount_micros: i64,
    pub email: Option<String>,
    pub business_type: BusinessType,
}

/// Ephemeral scoring result; not persisted as a first-class entity.
#[derive(Debug, Clone, Serialize)]
pub struct FraudLikelihoodScore {
    pub score: u32,
    pub risk_level: RiskLevel,
    pub reasons: Vec<String>,
}

/// Score a purchase context. Deterministic and side-effect free.
pub fn score_purchase(ctx: &PurchaseValidationContext) -> FraudLikelihoodScore {
    let mut score: u32 = 0;
    let mut reasons = Vec::new();

    // Account age: mutually exclusive bands, lower bound wins.
    if ctx.account_age_days < 1 {
        score += 20;
        reasons.push("account younger than one day".to_string());
    } else if ctx.account_age_days < 7 {
        score += 10;
        reasons.push("account younger than one week".to_string());
    }

    if ctx.prior_purchase_count > 5 {
        score += 15;
        reasons.push(format!(
            "unusually many prior purchases ({})",
            ctx.prior_purchase_count
        ));
    }

    let token_lower = ctx.purchase_token.to_lowercase();
    if ctx.purchase_token.len() < MIN_PLAUSIBLE_TOKEN_LEN
        || token_lower.contains("test")
        || token_lower.contains("mock")
    {
        score += 25;
        reasons.push("implausible purchase token shape".to_string());
    }

    if ctx.price_amount_micros < MIN_PLAUSIBLE_PRICE_MICROS {
        score += 15;
        reasons.push("price implausibly low".to_string());
    } else if ctx.price_amount_micros > MAX_PLAUSIBLE_PRICE_MICROS {
        score += 10;
        reasons.push("price implausibly high".to_string());
    }

    if let Some(email) = &ctx.email {
        if !email_domain_plausible(email, ctx.business_type) {
            score += 5;
            reasons.push("email domain implausible for business type".to_string());
        }
    }

    let score = score.min(100);
    FraudLikelihoodScore {
        score,
        risk_level: RiskLevel::from_score(score),
        reasons,
    }
}

fn email_domain_plausible(email: &str, business_type: BusinessType) -> bool {
    let Some(domain) = email.rsplit('@').next().filter(|d| d.contains('.')) else {
        // No parseable domain; the shape rule is not this rule's job.
        return false;
    };
    let domain = domain.to_lowercase();

    if CONSUMER_EMAIL_DOMAINS.contains(&domain.as_str()) {
        return true;
    }

    let keywords = match business_type {
        BusinessType::Pharmacy => PHARMACY_KEYWORDS,
        BusinessType::Laboratory => LABORATORY_KEYWORDS,
    };
    if keywords.iter().any(|k| domain.contains(k)) {
        return true;
    }

    domain
        .rsplit('.')
        .next()
        .map(|tld| PROFESSIONAL_TLDS.contains(&tld))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline() -> PurchaseValidationContext {
        PurchaseValidationContext {
            account_age_days: 30,
            prior_purchase_count: 1,
            purchase_token: "x".repeat(150),
            price_amount_micros: 1_500_000_000,
            email: Some("owner@gmail.com".to_string()),
            business_type: BusinessType::Pharmacy,
        }
    }

    #[test]
    fn test_clean_context_scores_low() {
        let result = score_purchase(&baseline());
        assert_eq!(result.score, 0);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.reasons.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let ctx = baseline();
        let a = score_purchase(&ctx);
        let b = score_purchase(&ctx);
        assert_eq!(a.score, b.score);
        assert_eq!(a.risk_level, b.risk_level);
        assert_eq!(a.reasons, b.reasons);
    }

    #[test]
    fn test_short_token_alone_scores_low() {
        // 8-char token trips the strongest single signal, still under the
        // MEDIUM band on its own.
        let mut ctx = baseline();
        ctx.purchase_token = "short123".to_string();
        let result = score_purchase(&ctx);
        assert_eq!(result.score, 25);
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result
            .reasons
            .iter()
            .any(|r| r.contains("purchase token")));
    }

    #[test]
    fn test_short_token_with_young_account_reaches_medium() {
        let mut ctx = baseline();
        ctx.purchase_token = "short123".to_string();
        ctx.account_age_days = 3;
        let result = score_purchase(&ctx);
        assert_eq!(result.score, 35);
        assert_eq!(result.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_test_marker_in_long_token_still_flagged() {
        let mut ctx = baseline();
        ctx.purchase_token = format!("{}test{}", "a".repeat(60), "b".repeat(60));
        assert_eq!(score_purchase(&ctx).score, 25);
    }

    #[test]
    fn test_account_age_bands_mutually_exclusive() {
        let mut ctx = baseline();
        ctx.account_age_days = 0;
        assert_eq!(score_purchase(&ctx).score, 20);
        ctx.account_age_days = 3;
        assert_eq!(score_purchase(&ctx).score, 10);
        ctx.account_age_days = 7;
        assert_eq!(score_purchase(&ctx).score, 0);
    }

    #[test]
    fn test_price_bands() {
        let mut ctx = baseline();
        ctx.price_amount_micros = 50 * LKR_MICROS;
        assert_eq!(score_purchase(&ctx).score, 15);
        ctx.price_amount_micros = 200_000 * LKR_MICROS;
        assert_eq!(score_purchase(&ctx).score, 10);
        ctx.price_amount_micros = 1_000 * LKR_MICROS;
        assert_eq!(score_purchase(&ctx).score, 0);
    }

    #[test]
    fn test_email_domain_rules() {
        let mut ctx = baseline();
        ctx.email = Some("owner@randomhost.xyz".to_string());
        assert_eq!(score_purchase(&ctx).score, 5);

        ctx.email = Some("owner@citypharmacy.com".to_string());
        assert_eq!(score_purchase(&ctx).score, 0);

        ctx.email = Some("owner@company.lk".to_string());
        assert_eq!(score_purchase(&ctx).score, 0);

        ctx.email = None;
        assert_eq!(score_purchase(&ctx).score, 0);
    }

    #[test]
    fn test_stacked_signals_reach_critical() {
        let ctx = PurchaseValidationContext {
            account_age_days: 0,
            prior_purchase_count: 10,
            purchase_token: "mock".to_string(),
            price_amount_micros: 10 * LKR_MICROS,
            email: Some("x@throwaway.xyz".to_string()),
            business_type: BusinessType::Laboratory,
        };
        let result = score_purchase(&ctx);
        // 20 + 15 + 25 + 15 + 5 = 80
        assert_eq!(result.score, 80);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.reasons.len(), 5);
    }

    #[test]
    fn test_score_clamped_to_100() {
        // No combination exceeds 80 today, but the clamp is contractual.
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(79), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
    }
}
