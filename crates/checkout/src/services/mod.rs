//! Business logic services for checkout.
//!
//! # Services
//!
//! - `router` - Cart to payment session (`POST /checkout/router`)
//! - `idempotency` - `request_id` replay cache
//! - `rate_limit` - Per cart and client IP router limits
//! - `pricing` - Server-side cart totals
//! - `reconciler` - Settle pending orders from the provider's view
//! - `reservations` - Expired stock hold sweeper
//! - `webhooks` - Verify, record and apply provider events

pub mod idempotency;
pub mod pricing;
pub mod rate_limit;
pub mod reconciler;
pub mod reservations;
pub mod router;
pub mod webhooks;

pub use idempotency::IdempotencyCache;
pub use rate_limit::CheckoutRateLimiter;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use router::CheckoutRouter;
pub use webhooks::{WebhookOutcome, WebhookProcessor};

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::state::AppState;

/// How often limiter keys and stored router responses are pruned.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically prune rate limiter keys and expired router responses.
pub fn spawn_housekeeping(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            state.limiter().prune();
            state.idempotency().run_pending_tasks().await;

            let ttl = chrono::Duration::from_std(state.idempotency().ttl())
                .unwrap_or(chrono::Duration::hours(24));
            match state.store().purge_responses(Utc::now() - ttl).await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Purged expired router responses"),
                Err(e) => warn!(error = %e, "Failed to purge router responses"),
            }
        }
    })
}
