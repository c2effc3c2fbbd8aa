//! Server-side cart pricing.
//!
//! Client prices are never trusted: every line is priced from the catalog and
//! the coupon is re-evaluated here. The router compares the client total with
//! [`PricedCart::total`] using [`pagora_core::totals_agree`].

use rust_decimal::Decimal;
use thiserror::Error;

use pagora_core::VariantId;

use crate::models::{Coupon, OrderLine, RouterItem, VariantPrice};

/// Why a cart could not be priced.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("variant {0} does not exist")]
    UnknownVariant(VariantId),

    #[error("variant {0} is no longer available")]
    InactiveVariant(VariantId),
}

/// A cart priced from the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedCart {
    pub lines: Vec<OrderLine>,
    /// Sum of line totals.
    pub lines_total: Decimal,
    /// Coupon discount, capped at `lines_total`.
    pub discount: Decimal,
    pub shipping: Decimal,
    /// `lines_total - discount + shipping`.
    pub total: Decimal,
}

/// Price `items` against `variants`, applying `coupon` and adding `shipping`.
///
/// # Errors
///
/// Returns `PricingError` if an item refers to a missing or inactive variant.
pub fn price_cart(
    items: &[RouterItem],
    variants: &[VariantPrice],
    coupon: Option<&Coupon>,
    shipping: Decimal,
) -> Result<PricedCart, PricingError> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let variant = variants
            .iter()
            .find(|v| v.id == item.variant_id)
            .ok_or(PricingError::UnknownVariant(item.variant_id))?;
        if !variant.active {
            return Err(PricingError::InactiveVariant(item.variant_id));
        }
        lines.push(OrderLine {
            variant_id: variant.id,
            quantity: item.quantity,
            unit_price: variant.price,
        });
    }

    let lines_total: Decimal = lines.iter().map(OrderLine::total).sum();
    let discount = coupon.map_or(Decimal::ZERO, |c| c.discount_for(lines_total));
    let total = lines_total - discount + shipping;

    Ok(PricedCart {
        lines,
        lines_total,
        discount,
        shipping,
        total,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::CouponKind;

    fn item(variant_id: VariantId, quantity: i32) -> RouterItem {
        RouterItem {
            variant_id,
            quantity,
            unit_price: Some(Decimal::ONE),
        }
    }

    fn variant(id: VariantId, price: Decimal) -> VariantPrice {
        VariantPrice {
            id,
            price,
            stock: 10,
            active: true,
        }
    }

    #[test]
    fn test_prices_from_catalog_not_client() {
        let a = VariantId::random();
        let b = VariantId::random();
        let priced = price_cart(
            &[item(a, 2), item(b, 1)],
            &[variant(a, Decimal::new(2500, 2)), variant(b, Decimal::new(5000, 2))],
            None,
            Decimal::new(1500, 2),
        )
        .unwrap();

        assert_eq!(priced.lines_total, Decimal::new(10000, 2));
        assert_eq!(priced.total, Decimal::new(11500, 2));
        assert!(priced.lines.iter().all(|l| l.unit_price > Decimal::ONE));
    }

    #[test]
    fn test_coupon_discount_applied_before_shipping() {
        let a = VariantId::random();
        let coupon = Coupon {
            code: "DEZ".to_string(),
            kind: CouponKind::Percentage,
            value: Decimal::TEN,
            active: true,
        };
        let priced = price_cart(
            &[item(a, 1)],
            &[variant(a, Decimal::ONE_HUNDRED)],
            Some(&coupon),
            Decimal::TEN,
        )
        .unwrap();

        assert_eq!(priced.discount, Decimal::TEN);
        assert_eq!(priced.total, Decimal::ONE_HUNDRED);
    }

    #[test]
    fn test_unknown_and_inactive_variants() {
        let a = VariantId::random();
        assert_eq!(
            price_cart(&[item(a, 1)], &[], None, Decimal::ZERO),
            Err(PricingError::UnknownVariant(a))
        );

        let mut inactive = variant(a, Decimal::ONE);
        inactive.active = false;
        assert_eq!(
            price_cart(&[item(a, 1)], &[inactive], None, Decimal::ZERO),
            Err(PricingError::InactiveVariant(a))
        );
    }
}
