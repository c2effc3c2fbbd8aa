//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::CheckoutConfig;
use crate::db::CheckoutStore;
use crate::gateway::Gateways;
use crate::services::{CheckoutRateLimiter, IdempotencyCache};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the store, the payment gateways and the in-process guards.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: CheckoutConfig,
    store: Arc<dyn CheckoutStore>,
    gateways: Gateways,
    limiter: CheckoutRateLimiter,
    idempotency: IdempotencyCache,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Checkout configuration
    /// * `store` - Persistence backend
    /// * `gateways` - Configured payment providers
    #[must_use]
    pub fn new(config: CheckoutConfig, store: Arc<dyn CheckoutStore>, gateways: Gateways) -> Self {
        let limiter =
            CheckoutRateLimiter::new(config.policy.rate_limit_max, config.policy.rate_limit_window);
        let idempotency = IdempotencyCache::new(config.policy.idempotency_ttl);

        Self {
            inner: Arc::new(AppStateInner {
                config,
                store,
                gateways,
                limiter,
                idempotency,
            }),
        }
    }

    /// Get a reference to the checkout configuration.
    #[must_use]
    pub fn config(&self) -> &CheckoutConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn CheckoutStore {
        self.inner.store.as_ref()
    }

    /// Shared handle to the store, for background tasks.
    #[must_use]
    pub fn store_handle(&self) -> Arc<dyn CheckoutStore> {
        Arc::clone(&self.inner.store)
    }

    #[must_use]
    pub fn gateways(&self) -> &Gateways {
        &self.inner.gateways
    }

    #[must_use]
    pub fn limiter(&self) -> &CheckoutRateLimiter {
        &self.inner.limiter
    }

    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyCache {
        &self.inner.idempotency
    }
}
