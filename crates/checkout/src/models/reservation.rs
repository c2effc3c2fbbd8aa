//! Stock reservations.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pagora_core::{CartId, OrderId, ReleaseReason, ReservationId, VariantId};

/// A time-limited hold on stock for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Reservation {
    pub id: ReservationId,
    pub variant_id: VariantId,
    pub cart_id: CartId,
    pub order_id: Option<OrderId>,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub release_reason: Option<ReleaseReason>,
}

impl Reservation {
    /// Whether the reservation still holds stock at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

/// Result of one sweeper run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    /// Reservations released by this run.
    pub released: u64,
    /// Distinct orders those reservations belonged to.
    pub order_ids: Vec<OrderId>,
}
