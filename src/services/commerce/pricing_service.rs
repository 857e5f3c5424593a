use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Monetary precision of every stored amount.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// One priced cart or order line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub price: Decimal,
    pub quantity: i32,
    /// Percentage, 0..=100
    pub discount_percent: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    pub fn discount_amount(&self) -> Decimal {
        self.line_total() * (self.discount_percent / Decimal::ONE_HUNDRED)
    }
}

/// Derived cart amounts, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartTotals {
    pub subtotal: Decimal,
    pub total_discount: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    /// Coupon share of `total_discount` after capping
    pub coupon_discount: Decimal,
}

/// Pure totals calculator.
#[derive(Debug, Clone, Copy)]
pub struct TotalsCalculator {
    tax_rate: Decimal,
}

impl TotalsCalculator {
    pub fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    /// Unrounded sum of line totals.
    pub fn subtotal(&self, lines: &[PricedLine]) -> Decimal {
        lines.iter().map(PricedLine::line_total).sum()
    }

    /// Computes totals for `lines` that are already filtered to purchasable products.
    ///
    /// The coupon amount is capped at the subtotal net of line discounts so the
    /// total cannot go negative once lines are removed after a coupon was applied.
    pub fn calculate(&self, lines: &[PricedLine], coupon_discount: Decimal) -> CartTotals {
        let subtotal = self.subtotal(lines);
        let line_discount: Decimal = lines.iter().map(PricedLine::discount_amount).sum();

        let coupon_cap = (subtotal - line_discount).max(Decimal::ZERO);
        let coupon = coupon_discount.max(Decimal::ZERO).min(coupon_cap);

        let total_discount = line_discount + coupon;
        let tax = subtotal * self.tax_rate;
        let total = subtotal - total_discount + tax;

        CartTotals {
            subtotal: round_money(subtotal),
            total_discount: round_money(total_discount),
            tax: round_money(tax),
            total: round_money(total),
            coupon_discount: round_money(coupon),
        }
    }
}
