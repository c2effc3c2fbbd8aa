//! Read-only catalog lookups: variant prices and coupons.

use sqlx::PgPool;

use pagora_core::VariantId;

use super::RepositoryError;
use crate::models::{Coupon, VariantPrice};

/// Repository for `checkout.variants` and `checkout.coupons`.
pub struct CatalogRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> CatalogRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Prices and stock for the given variants. Unknown ids are simply absent.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[tracing::instrument(skip(self), fields(count = ids.len()))]
    pub async fn variant_prices(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantPrice>, RepositoryError> {
        let rows = sqlx::query_as::<_, VariantPrice>(
            r"
            SELECT id, price, stock, active
            FROM checkout.variants
            WHERE id = ANY($1)
            ",
        )
        .bind(ids)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    /// Look up a coupon by code, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    #[tracing::instrument(skip(self))]
    pub async fn coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let coupon = sqlx::query_as::<_, Coupon>(
            r"
            SELECT code, kind, value, active
            FROM checkout.coupons
            WHERE UPPER(code) = UPPER($1)
            ",
        )
        .bind(code.trim())
        .fetch_optional(self.pool)
        .await?;

        Ok(coupon)
    }
}
