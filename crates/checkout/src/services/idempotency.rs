//! Request-level idempotency for the checkout router.
//!
//! Two tiers keyed by `(cart_id, request_id)`, so a `request_id` only ever
//! replays for the cart that sent it:
//! - an in-process `moka` cache; `try_get_with` runs one initializer per key
//!   and parks concurrent callers until it finishes, so duplicate clicks
//!   reach the provider once
//! - the `idempotency_keys` table, shared across instances and restarts;
//!   the first stored response wins and is what every caller replays
//!
//! Failed executions are cached by neither tier.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tracing::{debug, instrument, warn};

use pagora_core::CartId;

use crate::db::CheckoutStore;
use crate::error::AppError;
use crate::models::RouterResponse;

const MAX_CACHED_RESPONSES: u64 = 100_000;

/// Replay cache for router responses.
#[derive(Clone)]
pub struct IdempotencyCache {
    cache: Cache<(CartId, String), RouterResponse>,
    ttl: Duration,
}

impl IdempotencyCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(MAX_CACHED_RESPONSES)
            .time_to_live(ttl)
            .build();
        Self { cache, ttl }
    }

    /// How long responses are replayable.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cart's response for `request_id`, running `execute` only if
    /// no response exists yet in either tier.
    ///
    /// # Errors
    ///
    /// Returns the error from `execute` (or from reading the persistent tier).
    /// Coalesced callers receive an equivalent error.
    #[instrument(skip(self, store, execute), fields(request_id = %request_id))]
    pub async fn run<F>(
        &self,
        store: &dyn CheckoutStore,
        cart_id: CartId,
        request_id: &str,
        execute: F,
    ) -> Result<RouterResponse, AppError>
    where
        F: Future<Output = Result<RouterResponse, AppError>> + Send,
    {
        let init = async {
            let not_before = Utc::now()
                - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(24));
            if let Some(stored) = store.stored_response(cart_id, request_id, not_before).await? {
                debug!(decision = "replay", "Replaying stored router response");
                return decode(stored);
            }

            let response = execute.await?;
            let value = serde_json::to_value(&response)
                .map_err(|e| AppError::Internal(format!("encode router response: {e}")))?;
            match store.store_response(cart_id, request_id, &value).await {
                Ok(winner) if winner == value => Ok(response),
                Ok(winner) => {
                    debug!(decision = "replay", "Another instance stored first");
                    decode(winner)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to persist router response");
                    Ok(response)
                }
            }
        };

        self.cache
            .try_get_with((cart_id, request_id.to_string()), init)
            .await
            .map_err(|shared: Arc<AppError>| {
                Arc::try_unwrap(shared).unwrap_or_else(|shared| shared.replay())
            })
    }

    /// Run pending evictions.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

fn decode(value: serde_json::Value) -> Result<RouterResponse, AppError> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Internal(format!("stored router response is invalid: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pagora_core::{OrderId, PaymentRoute};

    use super::*;
    use crate::db::memory::MemoryStore;

    fn response() -> RouterResponse {
        RouterResponse::for_route(
            PaymentRoute::StripeTransparent,
            OrderId::random(),
            "tok",
            Some("pi_1_secret".to_string()),
            None,
        )
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_execute_once() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let store = MemoryStore::new();
        let calls = AtomicUsize::new(0);
        let expected = response();
        let cart = CartId::random();

        let run = || {
            cache.run(&store, cart, "req-1", async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(expected.clone())
            })
        };
        let (a, b, c) = tokio::join!(run(), run(), run());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), expected);
        assert_eq!(b.unwrap(), expected);
        assert_eq!(c.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let store = MemoryStore::new();
        let cart = CartId::random();

        let first = cache
            .run(&store, cart, "req-2", async { Err(AppError::Timeout) })
            .await;
        assert!(matches!(first, Err(AppError::Timeout)));

        let expected = response();
        let second = cache
            .run(&store, cart, "req-2", async { Ok(expected.clone()) })
            .await
            .unwrap();
        assert_eq!(second, expected);
    }

    #[tokio::test]
    async fn test_persistent_tier_survives_restart() {
        let store = MemoryStore::new();
        let expected = response();
        let cart = CartId::random();
        IdempotencyCache::new(Duration::from_secs(60))
            .run(&store, cart, "req-3", async { Ok(expected.clone()) })
            .await
            .unwrap();

        // A fresh cache stands in for another instance.
        let replayed = IdempotencyCache::new(Duration::from_secs(60))
            .run(&store, cart, "req-3", async { Err(AppError::Internal("ran twice".into())) })
            .await
            .unwrap();
        assert_eq!(replayed, expected);
    }

    #[tokio::test]
    async fn test_request_id_is_scoped_to_its_cart() {
        let cache = IdempotencyCache::new(Duration::from_secs(60));
        let store = MemoryStore::new();
        let first = response();
        let second = response();

        let a = cache
            .run(&store, CartId::random(), "shared", async { Ok(first.clone()) })
            .await
            .unwrap();
        let b = cache
            .run(&store, CartId::random(), "shared", async { Ok(second.clone()) })
            .await
            .unwrap();

        assert_eq!(a, first);
        assert_eq!(b, second);
        assert_ne!(a.order_id, b.order_id);
    }
}
