//! Server-side catalog data the router prices carts against.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use pagora_core::VariantId;

/// A variant's authoritative price and stock.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VariantPrice {
    pub id: VariantId,
    pub price: Decimal,
    pub stock: i32,
    pub active: bool,
}

/// Discount kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "checkout.coupon_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CouponKind {
    /// `value` is a percentage of the line total (0-100).
    Percentage,
    /// `value` is an absolute amount.
    Fixed,
}

/// A discount code.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Coupon {
    pub code: String,
    pub kind: CouponKind,
    pub value: Decimal,
    pub active: bool,
}

impl Coupon {
    /// Discount this coupon grants on `lines_total`, never more than the lines
    /// themselves and never negative.
    #[must_use]
    pub fn discount_for(&self, lines_total: Decimal) -> Decimal {
        let raw = match self.kind {
            CouponKind::Percentage => (lines_total * self.value / Decimal::ONE_HUNDRED).round_dp(2),
            CouponKind::Fixed => self.value,
        };
        raw.max(Decimal::ZERO).min(lines_total)
    }
}
