use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

use crate::errors::ServiceError;
use crate::services::commerce::pricing_service::round_money;

/// Resolves a coupon code into an absolute discount for a given subtotal.
#[async_trait]
pub trait CouponResolver: Send + Sync {
    /// Returns the discount amount, or `ServiceError::InvalidCoupon` for unknown codes.
    async fn resolve(&self, code: &str, subtotal: Decimal) -> Result<Decimal, ServiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CouponRule {
    /// Percentage of the subtotal, 0..=100
    Percent(Decimal),
    /// Absolute amount, never more than the subtotal
    Fixed(Decimal),
}

impl CouponRule {
    fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self {
            CouponRule::Percent(percent) => subtotal * (*percent / Decimal::ONE_HUNDRED),
            CouponRule::Fixed(amount) => (*amount).min(subtotal),
        };
        round_money(raw.max(Decimal::ZERO))
    }
}

/// Coupon table held in memory. Codes are matched case-insensitively.
#[derive(Debug, Clone)]
pub struct StaticCouponResolver {
    rules: HashMap<String, CouponRule>,
}

impl StaticCouponResolver {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    pub fn with_rule(mut self, code: &str, rule: CouponRule) -> Self {
        self.rules.insert(normalize_code(code), rule);
        self
    }
}

impl Default for StaticCouponResolver {
    fn default() -> Self {
        Self::new().with_rule("DISCOUNT10", CouponRule::Percent(dec!(10)))
    }
}

#[async_trait]
impl CouponResolver for StaticCouponResolver {
    async fn resolve(&self, code: &str, subtotal: Decimal) -> Result<Decimal, ServiceError> {
        self.rules
            .get(&normalize_code(code))
            .map(|rule| rule.discount_for(subtotal))
            .ok_or_else(|| ServiceError::InvalidCoupon(code.trim().to_string()))
    }
}

/// Canonical form used for lookup and storage.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn default_table_knows_discount10() {
        let resolver = StaticCouponResolver::default();
        let discount = resolver.resolve("DISCOUNT10", dec!(100.00)).await.unwrap();
        assert_eq!(discount, dec!(10.00));
    }

    #[tokio::test]
    async fn codes_are_case_insensitive_and_trimmed() {
        let resolver = StaticCouponResolver::default();
        let discount = resolver.resolve("  discount10 ", dec!(59.99)).await.unwrap();
        assert_eq!(discount, dec!(6.00));
    }

    #[tokio::test]
    async fn unknown_codes_are_rejected() {
        let resolver = StaticCouponResolver::default();
        let result = resolver.resolve("FREESTUFF", dec!(10.00)).await;
        assert_matches!(result, Err(ServiceError::InvalidCoupon(code)) if code == "FREESTUFF");
    }

    #[tokio::test]
    async fn fixed_rules_never_exceed_subtotal() {
        let resolver = StaticCouponResolver::new().with_rule("FIVEOFF", CouponRule::Fixed(dec!(5)));
        assert_eq!(resolver.resolve("FIVEOFF", dec!(3.50)).await.unwrap(), dec!(3.50));
        assert_eq!(resolver.resolve("FIVEOFF", dec!(30)).await.unwrap(), dec!(5));
    }
}
