//! Order reconciliation against the provider of record.
//!
//! Catches payments whose webhook never arrived: a pending order with a
//! provider reference is settled according to what the provider reports.

use serde::Serialize;
use tracing::{info, instrument};

use pagora_core::{OrderId, OrderStatus, payment_sources};

use crate::db::CheckoutStore;
use crate::error::AppError;
use crate::gateway::{Gateways, ProviderPaymentState};
use crate::state::AppState;

/// Result of reconciling one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    /// Whether this call moved the order.
    pub changed: bool,
}

impl ReconcileOutcome {
    const fn unchanged(status: OrderStatus) -> Self {
        Self {
            ok: true,
            status: Some(status),
            changed: false,
        }
    }
}

pub struct Reconciler<'a> {
    store: &'a dyn CheckoutStore,
    gateways: &'a Gateways,
}

impl<'a> Reconciler<'a> {
    #[must_use]
    pub fn new(state: &'a AppState) -> Self {
        Self {
            store: state.store(),
            gateways: state.gateways(),
        }
    }

    /// Settle `order_id` from the provider's view of its payment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown order and
    /// `AppError::ProviderUnavailable` when the provider cannot be queried.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn reconcile(&self, order_id: OrderId) -> Result<ReconcileOutcome, AppError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id}")))?;

        let transaction_id = match order.transaction_id.as_deref() {
            Some(t) if !t.trim().is_empty() && order.status == OrderStatus::Pending => t,
            _ => return Ok(ReconcileOutcome::unchanged(order.status)),
        };

        let gateway = self.gateways.get(order.route.provider())?;
        let state = gateway.payment_state(order.route, transaction_id).await?;
        let target = match state {
            ProviderPaymentState::Succeeded => OrderStatus::Paid,
            ProviderPaymentState::Failed => OrderStatus::Failed,
            ProviderPaymentState::Canceled => OrderStatus::Cancelled,
            ProviderPaymentState::InFlight => {
                return Ok(ReconcileOutcome::unchanged(order.status));
            }
        };

        if let Some(updated) = self
            .store
            .transition_order(order.id, &payment_sources(target), target)
            .await?
        {
            info!(status = %updated.status, "Order reconciled");
            return Ok(ReconcileOutcome {
                ok: true,
                status: Some(updated.status),
                changed: true,
            });
        }

        // Lost the race to a webhook; report where it landed.
        let current = self
            .store
            .order(order.id)
            .await?
            .map_or(order.status, |o| o.status);
        Ok(ReconcileOutcome::unchanged(current))
    }

    /// Pending orders with a provider reference older than `older_than`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` when the cutoff falls outside the
    /// representable range, or `AppError::Database` if the query fails.
    pub async fn stale_orders(
        &self,
        older_than: chrono::Duration,
        limit: i64,
    ) -> Result<Vec<OrderId>, AppError> {
        let cutoff = chrono::Utc::now()
            .checked_sub_signed(older_than)
            .ok_or_else(|| AppError::BadRequest("older_than is out of range".to_string()))?;
        Ok(self.store.stale_pending_orders(cutoff, limit).await?)
    }
}
