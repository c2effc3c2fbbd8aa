//! Webhook event log.

use sqlx::PgPool;

use super::RepositoryError;
use crate::models::{NewWebhookEvent, WebhookEvent};

/// Repository for `checkout.webhook_events`.
pub struct WebhookRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> WebhookRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert the event unless it was already received, then return the
    /// stored row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id))]
    pub async fn record(&self, event: &NewWebhookEvent) -> Result<WebhookEvent, RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO checkout.webhook_events (event_id, provider, event_type, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (event_id) DO NOTHING
            ",
        )
        .bind(&event.event_id)
        .bind(event.provider)
        .bind(&event.event_type)
        .bind(&event.payload)
        .execute(self.pool)
        .await?;

        self.get(&event.event_id)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// Get an event by provider id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, event_id: &str) -> Result<Option<WebhookEvent>, RepositoryError> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r"
            SELECT event_id, provider, event_type, payload, received_at,
                   processed_at, error_message, attempts
            FROM checkout.webhook_events
            WHERE event_id = $1
            ",
        )
        .bind(event_id)
        .fetch_optional(self.pool)
        .await?;

        Ok(event)
    }

    /// Mark processed and clear the last error. Returns `false` if the event
    /// was already processed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn mark_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE checkout.webhook_events
            SET processed_at = NOW(), error_message = NULL, attempts = attempts + 1
            WHERE event_id = $1 AND processed_at IS NULL
            ",
        )
        .bind(event_id)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn mark_failed(&self, event_id: &str, error: &str) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            UPDATE checkout.webhook_events
            SET error_message = $2, attempts = attempts + 1
            WHERE event_id = $1 AND processed_at IS NULL
            ",
        )
        .bind(event_id)
        .bind(error)
        .execute(self.pool)
        .await?;

        Ok(())
    }
}
