//! Reservation repository.
//!
//! Reservations are created and refreshed inside the order transaction (see
//! `orders::OrderRepository::open`); this module covers reads and the sweeper.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use pagora_core::{CartId, OrderId, ReleaseReason};

use super::RepositoryError;
use crate::models::{ReleaseSummary, Reservation};

/// Repository for `checkout.reservations`.
pub struct ReservationRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> ReservationRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// All reservations ever made for a cart, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn list_for_cart(&self, cart_id: CartId) -> Result<Vec<Reservation>, RepositoryError> {
        let rows = sqlx::query_as::<_, Reservation>(
            r"
            SELECT id, variant_id, cart_id, order_id, quantity,
                   created_at, expires_at, released_at, release_reason
            FROM checkout.reservations
            WHERE cart_id = $1
            ORDER BY created_at DESC
            ",
        )
        .bind(cart_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Release every unreleased reservation whose `expires_at` has passed.
    ///
    /// Safe to run repeatedly: already-released rows are never touched again.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[tracing::instrument(skip(self))]
    pub async fn release_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReleaseSummary, RepositoryError> {
        let (released, order_ids) = sqlx::query_as::<_, (i64, Vec<OrderId>)>(
            r"
            WITH released AS (
                UPDATE checkout.reservations
                SET released_at = $1, release_reason = $2
                WHERE released_at IS NULL AND expires_at <= $1
                RETURNING order_id
            )
            SELECT COUNT(*)::BIGINT,
                   COALESCE(
                       ARRAY_AGG(DISTINCT order_id) FILTER (WHERE order_id IS NOT NULL),
                       '{}'
                   )
            FROM released
            ",
        )
        .bind(now)
        .bind(ReleaseReason::Expired)
        .fetch_one(self.pool)
        .await?;

        Ok(ReleaseSummary {
            released: u64::try_from(released).unwrap_or_default(),
            order_ids,
        })
    }
}
