//! Order and reservation status enums, and the charge guard.
//!
//! ```text
//! pending ──> processing ──> paid ──> shipped ──> delivered
//!    │            │
//!    └────────────┴──> cancelled | failed
//! ```
//!
//! `delivered`, `cancelled` and `failed` are terminal.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a checkout order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
}

/// Statuses in which the customer has been (or is being) charged.
pub const CHARGED_STATUSES: [OrderStatus; 4] = [
    OrderStatus::Processing,
    OrderStatus::Paid,
    OrderStatus::Shipped,
    OrderStatus::Delivered,
];

/// Statuses a payment outcome may still be applied to.
pub const AWAITING_PAYMENT: [OrderStatus; 2] = [OrderStatus::Pending, OrderStatus::Processing];

impl OrderStatus {
    /// Stable lowercase name, matching the database enum labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether this status is one of [`CHARGED_STATUSES`].
    #[must_use]
    pub fn is_charged(self) -> bool {
        CHARGED_STATUSES.contains(&self)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing | Self::Paid | Self::Cancelled | Self::Failed)
                | (Self::Processing, Self::Paid | Self::Cancelled | Self::Failed)
                | (Self::Paid, Self::Shipped)
                | (Self::Shipped, Self::Delivered)
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "paid" => Ok(Self::Paid),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid order status: {s}")),
        }
    }
}

/// The [`AWAITING_PAYMENT`] statuses the lifecycle allows to move to `to`.
///
/// This is the `from` set for applying a payment outcome as a conditional
/// write.
///
/// ```
/// use pagora_core::{OrderStatus, payment_sources};
///
/// assert_eq!(payment_sources(OrderStatus::Processing), [OrderStatus::Pending]);
/// assert_eq!(payment_sources(OrderStatus::Paid).len(), 2);
/// assert!(payment_sources(OrderStatus::Shipped).is_empty());
/// ```
#[must_use]
pub fn payment_sources(to: OrderStatus) -> Vec<OrderStatus> {
    AWAITING_PAYMENT
        .into_iter()
        .filter(|from| from.can_transition_to(to))
        .collect()
}

/// Whether an order has already been charged, or has a provider charge or
/// session attached.
///
/// Every payment-initiation path checks this first and returns the existing
/// result instead of calling the provider again.
///
/// ```
/// use pagora_core::{OrderStatus, already_charged};
///
/// assert!(already_charged(OrderStatus::Paid, None));
/// assert!(already_charged(OrderStatus::Pending, Some("pi_123")));
/// assert!(!already_charged(OrderStatus::Pending, Some("")));
/// assert!(!already_charged(OrderStatus::Failed, None));
/// ```
#[must_use]
pub fn already_charged(status: OrderStatus, provider_ref: Option<&str>) -> bool {
    status.is_charged() || provider_ref.is_some_and(|r| !r.trim().is_empty())
}

/// Why a reservation stopped holding stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.release_reason", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// TTL elapsed and the sweeper reclaimed it.
    Expired,
    /// The order was paid and stock was decremented.
    Consumed,
    /// The order was cancelled or failed.
    Cancelled,
}
