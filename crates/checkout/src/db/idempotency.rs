//! Persistent router responses keyed by cart and `request_id`.
//!
//! The in-process cache in `services::idempotency` sits in front of this
//! table; the table covers restarts and other instances.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;

use pagora_core::CartId;

use super::RepositoryError;

/// Repository for `checkout.idempotency_keys`.
pub struct IdempotencyRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> IdempotencyRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Stored response for the cart's `request_id` recorded at or after
    /// `not_before`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(
        &self,
        cart_id: CartId,
        request_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, RepositoryError> {
        let response = sqlx::query_scalar::<_, JsonValue>(
            r"
            SELECT response
            FROM checkout.idempotency_keys
            WHERE cart_id = $1 AND request_id = $2 AND created_at >= $3
            ",
        )
        .bind(cart_id)
        .bind(request_id)
        .bind(not_before)
        .fetch_optional(self.pool)
        .await?;

        Ok(response)
    }

    /// Store a response unless one already exists. The first writer wins and
    /// its response is returned to every caller.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[tracing::instrument(skip(self, response))]
    pub async fn insert_if_absent(
        &self,
        cart_id: CartId,
        request_id: &str,
        response: &JsonValue,
    ) -> Result<JsonValue, RepositoryError> {
        let inserted = sqlx::query_scalar::<_, JsonValue>(
            r"
            INSERT INTO checkout.idempotency_keys (cart_id, request_id, response)
            VALUES ($1, $2, $3)
            ON CONFLICT (cart_id, request_id) DO NOTHING
            RETURNING response
            ",
        )
        .bind(cart_id)
        .bind(request_id)
        .bind(response)
        .fetch_optional(self.pool)
        .await?;

        if let Some(response) = inserted {
            return Ok(response);
        }

        let existing = sqlx::query_scalar::<_, JsonValue>(
            "SELECT response FROM checkout.idempotency_keys WHERE cart_id = $1 AND request_id = $2",
        )
        .bind(cart_id)
        .bind(request_id)
        .fetch_one(self.pool)
        .await?;

        Ok(existing)
    }

    /// Delete responses older than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn purge(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM checkout.idempotency_keys WHERE created_at < $1")
            .bind(cutoff)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
