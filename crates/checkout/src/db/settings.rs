//! Store-wide checkout settings (single row).

use sqlx::PgPool;

use pagora_core::{Channel, CheckoutSettings, Experience, Provider};

use super::RepositoryError;

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    provider: Provider,
    channel: Channel,
    experience: Experience,
}

impl From<SettingsRow> for CheckoutSettings {
    fn from(row: SettingsRow) -> Self {
        Self {
            provider: row.provider,
            channel: row.channel,
            experience: row.experience,
        }
    }
}

/// Repository for the `checkout.settings` row.
pub struct SettingsRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SettingsRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Read the current settings.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the row was never seeded.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self) -> Result<CheckoutSettings, RepositoryError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r"
            SELECT provider, channel, experience
            FROM checkout.settings
            WHERE id = 1
            ",
        )
        .fetch_optional(self.pool)
        .await?;

        row.map(Into::into).ok_or(RepositoryError::NotFound)
    }

    /// Replace the settings row.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[tracing::instrument(skip(self))]
    pub async fn save(
        &self,
        settings: CheckoutSettings,
    ) -> Result<CheckoutSettings, RepositoryError> {
        let row = sqlx::query_as::<_, SettingsRow>(
            r"
            INSERT INTO checkout.settings (id, provider, channel, experience)
            VALUES (1, $1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET provider = EXCLUDED.provider,
                channel = EXCLUDED.channel,
                experience = EXCLUDED.experience,
                updated_at = NOW()
            RETURNING provider, channel, experience
            ",
        )
        .bind(settings.provider)
        .bind(settings.channel)
        .bind(settings.experience)
        .fetch_one(self.pool)
        .await?;

        Ok(row.into())
    }
}
