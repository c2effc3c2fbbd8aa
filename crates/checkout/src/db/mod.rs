//! Database operations for checkout `PostgreSQL`.
//!
//! # Schema: `checkout`
//!
//! ## Tables
//!
//! - `variants` - Server-side prices and stock
//! - `coupons` - Discount codes
//! - `settings` - Store-wide provider/channel/experience (single row)
//! - `orders` / `order_items` - Orders created by the router
//! - `reservations` - Time-limited stock holds per cart
//! - `webhook_events` - Provider deliveries, processed at most once
//! - `idempotency_keys` - Router responses by cart and `request_id`
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! cargo run -p pagora-cli -- migrate
//! ```
//!
//! Services talk to [`CheckoutStore`]; [`PgStore`] implements it over the
//! repositories below. With the `test-support` feature, [`memory::MemoryStore`]
//! implements the same contract in process.

pub mod catalog;
pub mod idempotency;
pub mod orders;
pub mod reservations;
pub mod settings;
pub mod webhooks;

#[cfg(any(test, feature = "test-support"))]
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use pagora_core::{CartId, CheckoutSettings, OrderId, OrderStatus, Provider, UserId, VariantId};

pub use catalog::CatalogRepository;
pub use idempotency::IdempotencyRepository;
pub use orders::OrderRepository;
pub use reservations::ReservationRepository;
pub use settings::SettingsRepository;
pub use webhooks::WebhookRepository;

use crate::models::{
    Coupon, NewWebhookEvent, Order, OrderDraft, OrderLine, ReleaseSummary, Reservation,
    VariantPrice, WebhookEvent,
};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),
    /// Requested entity was not found.
    #[error("not found")]
    NotFound,
    /// Constraint violation or a conditional write that lost.
    #[error("constraint violation: {0}")]
    Conflict(String),
    /// Not enough unreserved stock for a variant.
    #[error("insufficient stock for variant {variant_id}: requested {requested}, available {available}")]
    InsufficientStock {
        variant_id: VariantId,
        requested: i32,
        available: i64,
    },
}

impl RepositoryError {
    /// Map a unique-constraint violation to [`RepositoryError::Conflict`].
    pub(crate) fn from_unique(err: sqlx::Error, what: &str) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Conflict(format!("{what} already exists"))
            }
            _ => Self::Database(err),
        }
    }
}

/// Outcome of [`CheckoutStore::attach_transaction`].
#[derive(Debug, Clone)]
pub enum AttachOutcome {
    /// This call attached the reference.
    Attached(Order),
    /// Another writer got there first, or the order moved on; here is its
    /// current state.
    AlreadyAttached(Order),
}

/// Persistence contract for the checkout core.
///
/// Every status change is a conditional write: it names the statuses it may
/// start from and returns `None` when the order was no longer in one of them.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> Result<(), RepositoryError>;

    // Settings

    async fn checkout_settings(&self) -> Result<CheckoutSettings, RepositoryError>;
    async fn save_checkout_settings(
        &self,
        settings: CheckoutSettings,
    ) -> Result<CheckoutSettings, RepositoryError>;

    // Catalog

    async fn variant_prices(&self, ids: &[VariantId])
    -> Result<Vec<VariantPrice>, RepositoryError>;
    async fn coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError>;

    // Router idempotency

    /// Stored router response for the cart's `request_id`, if recorded after
    /// `not_before`.
    async fn stored_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, RepositoryError>;
    /// Insert-if-absent. Returns whichever response is stored afterwards.
    async fn store_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        response: &JsonValue,
    ) -> Result<JsonValue, RepositoryError>;
    /// Drop responses recorded before `cutoff`. Returns the number removed.
    async fn purge_responses(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;

    // Orders

    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;
    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, RepositoryError>;
    async fn order_by_request_id(&self, request_id: &str)
    -> Result<Option<Order>, RepositoryError>;
    async fn order_by_access_token(&self, token: &str) -> Result<Option<Order>, RepositoryError>;
    async fn latest_pending_order(
        &self,
        cart_id: CartId,
        user_id: Option<UserId>,
    ) -> Result<Option<Order>, RepositoryError>;
    async fn order_by_transaction(
        &self,
        provider: Provider,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Create or refresh a pending order with its lines and stock holds, in
    /// one transaction.
    ///
    /// # Errors
    ///
    /// `InsufficientStock` when another cart holds what this one needs,
    /// `Conflict` when the resumed order is no longer open.
    async fn open_order(&self, draft: &OrderDraft) -> Result<Order, RepositoryError>;

    /// Attach a provider reference, only while the order is `pending` with
    /// none attached.
    async fn attach_transaction(
        &self,
        id: OrderId,
        transaction_id: &str,
        checkout_url: Option<&str>,
    ) -> Result<AttachOutcome, RepositoryError>;

    /// Move an order to `to` if its status is one of `from`.
    ///
    /// Paying consumes the order's reservations (stock is decremented);
    /// cancelling or failing releases them.
    async fn transition_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError>;

    /// Pending orders with a provider reference created before `created_before`.
    async fn stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderId>, RepositoryError>;

    // Reservations

    async fn cart_reservations(&self, cart_id: CartId)
    -> Result<Vec<Reservation>, RepositoryError>;
    /// Release every reservation past `expires_at` at `now`.
    async fn release_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReleaseSummary, RepositoryError>;

    // Webhooks

    /// Insert-if-absent. Returns the stored row either way.
    async fn record_webhook_event(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, RepositoryError>;
    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, RepositoryError>;
    /// Set `processed_at` and clear `error_message`, only if not yet processed.
    /// Returns `false` when another worker marked it first.
    async fn mark_webhook_processed(&self, event_id: &str) -> Result<bool, RepositoryError>;
    /// Record a failed attempt.
    async fn mark_webhook_failed(&self, event_id: &str, error: &str)
    -> Result<(), RepositoryError>;
}

/// [`CheckoutStore`] backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn checkout_settings(&self) -> Result<CheckoutSettings, RepositoryError> {
        SettingsRepository::new(&self.pool).get().await
    }

    async fn save_checkout_settings(
        &self,
        settings: CheckoutSettings,
    ) -> Result<CheckoutSettings, RepositoryError> {
        SettingsRepository::new(&self.pool).save(settings).await
    }

    async fn variant_prices(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantPrice>, RepositoryError> {
        CatalogRepository::new(&self.pool).variant_prices(ids).await
    }

    async fn coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        CatalogRepository::new(&self.pool).coupon(code).await
    }

    async fn stored_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, RepositoryError> {
        IdempotencyRepository::new(&self.pool)
            .get(cart_id, request_id, not_before)
            .await
    }

    async fn store_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        response: &JsonValue,
    ) -> Result<JsonValue, RepositoryError> {
        IdempotencyRepository::new(&self.pool)
            .insert_if_absent(cart_id, request_id, response)
            .await
    }

    async fn purge_responses(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        IdempotencyRepository::new(&self.pool).purge(cutoff).await
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool).get(id).await
    }

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        OrderRepository::new(&self.pool).lines(id).await
    }

    async fn order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .get_by_request_id(request_id)
            .await
    }

    async fn order_by_access_token(&self, token: &str) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .get_by_access_token(token)
            .await
    }

    async fn latest_pending_order(
        &self,
        cart_id: CartId,
        user_id: Option<UserId>,
    ) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .latest_pending(cart_id, user_id)
            .await
    }

    async fn order_by_transaction(
        &self,
        provider: Provider,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .get_by_transaction(provider, transaction_id)
            .await
    }

    async fn open_order(&self, draft: &OrderDraft) -> Result<Order, RepositoryError> {
        OrderRepository::new(&self.pool).open(draft).await
    }

    async fn attach_transaction(
        &self,
        id: OrderId,
        transaction_id: &str,
        checkout_url: Option<&str>,
    ) -> Result<AttachOutcome, RepositoryError> {
        OrderRepository::new(&self.pool)
            .attach_transaction(id, transaction_id, checkout_url)
            .await
    }

    async fn transition_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        OrderRepository::new(&self.pool).transition(id, from, to).await
    }

    async fn stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderId>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .stale_pending(created_before, limit)
            .await
    }

    async fn cart_reservations(
        &self,
        cart_id: CartId,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        ReservationRepository::new(&self.pool)
            .list_for_cart(cart_id)
            .await
    }

    async fn release_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReleaseSummary, RepositoryError> {
        ReservationRepository::new(&self.pool)
            .release_expired(now)
            .await
    }

    async fn record_webhook_event(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, RepositoryError> {
        WebhookRepository::new(&self.pool).record(event).await
    }

    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, RepositoryError> {
        WebhookRepository::new(&self.pool).get(event_id).await
    }

    async fn mark_webhook_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        WebhookRepository::new(&self.pool)
            .mark_processed(event_id)
            .await
    }

    async fn mark_webhook_failed(
        &self,
        event_id: &str,
        error: &str,
    ) -> Result<(), RepositoryError> {
        WebhookRepository::new(&self.pool)
            .mark_failed(event_id, error)
            .await
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
