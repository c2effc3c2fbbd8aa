//! Stale order reconciliation command.
//!
//! Lists pending orders that have a provider reference but no outcome after
//! `older_than_minutes`, and reconciles each one. Individual failures are
//! logged and counted; the sweep carries on.
//!
//! # Usage
//!
//! ```bash
//! pagora reconcile-stale --older-than-minutes 120 --limit 100
//! ```

use reqwest::Method;
use serde::Deserialize;
use serde_json::json;

use pagora_core::{OrderId, OrderStatus};

use super::client::{ClientError, ServiceClient};

const STALE_PATH: &str = "/internal/orders/stale";
const RECONCILE_PATH: &str = "/checkout/reconcile";

#[derive(Debug, Deserialize)]
struct StaleOrders {
    order_ids: Vec<OrderId>,
}

#[derive(Debug, Deserialize)]
struct ReconcileOutcome {
    ok: bool,
    #[serde(default)]
    status: Option<OrderStatus>,
    #[serde(default)]
    changed: bool,
}

/// Tally of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub attempted: usize,
    pub succeeded: usize,
    /// Orders whose status changed.
    pub changed: usize,
}

impl std::fmt::Display for SweepReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} reconciled ({} changed)",
            self.succeeded, self.attempted, self.changed
        )
    }
}

/// Reconcile every stale pending order.
///
/// # Errors
///
/// Returns `ClientError` only if the stale order list cannot be fetched.
pub async fn stale(
    client: &ServiceClient,
    older_than_minutes: u32,
    limit: u32,
) -> Result<SweepReport, ClientError> {
    let path = format!("{STALE_PATH}?older_than_minutes={older_than_minutes}&limit={limit}");
    let request = client.request(Method::GET, &path)?;
    let stale: StaleOrders = client.send(STALE_PATH, request).await?;
    tracing::info!(count = stale.order_ids.len(), "Stale pending orders found");

    let mut report = SweepReport::default();
    for order_id in stale.order_ids {
        report.attempted += 1;
        match reconcile_one(client, order_id).await {
            Ok(outcome) if outcome.ok => {
                report.succeeded += 1;
                if outcome.changed {
                    report.changed += 1;
                }
                tracing::info!(%order_id, status = ?outcome.status, changed = outcome.changed, "Order reconciled");
            }
            Ok(_) => tracing::warn!(%order_id, "Reconcile reported failure"),
            Err(e) => tracing::warn!(%order_id, error = %e, "Reconcile failed"),
        }
    }

    tracing::info!("{report}");
    Ok(report)
}

async fn reconcile_one(
    client: &ServiceClient,
    order_id: OrderId,
) -> Result<ReconcileOutcome, ClientError> {
    let request = client
        .request(Method::POST, RECONCILE_PATH)?
        .json(&json!({ "order_id": order_id }));
    client.send(RECONCILE_PATH, request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let report = SweepReport {
            attempted: 5,
            succeeded: 4,
            changed: 2,
        };
        assert_eq!(report.to_string(), "4/5 reconciled (2 changed)");
    }
}
