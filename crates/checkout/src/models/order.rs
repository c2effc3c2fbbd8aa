//! Order model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use pagora_core::{
    CartId, CurrencyCode, OrderId, OrderStatus, PaymentRoute, UserId, VariantId, already_charged,
};

use super::checkout::Customer;

/// A checkout order.
///
/// Orders are never deleted; they only move through [`OrderStatus`].
#[derive(Debug, Clone)]
pub struct Order {
    pub id: OrderId,
    /// Router request that created the order.
    pub request_id: String,
    pub cart_id: CartId,
    pub user_id: Option<UserId>,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
    pub currency: CurrencyCode,
    pub route: PaymentRoute,
    /// Provider charge or session reference, once one exists.
    pub transaction_id: Option<String>,
    /// Provider-hosted page for external channels.
    pub checkout_url: Option<String>,
    /// Secret that lets a guest resume or look up the order.
    pub access_token: String,
    pub customer: Option<Customer>,
    pub shipping: Option<JsonValue>,
    pub attribution: Option<JsonValue>,
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Whether the charge guard forbids starting another payment for this order.
    #[must_use]
    pub fn already_charged(&self) -> bool {
        already_charged(self.status, self.transaction_id.as_deref())
    }

    /// Whether the order can still be handed a new provider session.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Pending && !self.already_charged()
    }
}

/// One order line at the server-side price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct OrderLine {
    pub variant_id: VariantId,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl OrderLine {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Everything the store needs to create (or refresh) a pending order and its
/// stock reservations in one transaction.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    /// Existing pending order to refresh instead of inserting a new one.
    pub resume: Option<OrderId>,
    pub request_id: String,
    pub cart_id: CartId,
    pub user_id: Option<UserId>,
    pub route: PaymentRoute,
    pub currency: CurrencyCode,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total_amount: Decimal,
    pub access_token: String,
    pub customer: Option<Customer>,
    pub shipping: Option<JsonValue>,
    pub attribution: Option<JsonValue>,
    pub coupon_code: Option<String>,
    /// Lifetime of the stock holds created for this draft.
    pub reservation_ttl: chrono::Duration,
}
