//! Order repository.
//!
//! Status changes here are conditional `UPDATE ... WHERE status = ANY(...)`
//! statements; nothing reads a status and writes it back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};

use pagora_core::{
    CartId, Channel, CheckoutSettings, CurrencyCode, Experience, OrderId, OrderStatus,
    PaymentRoute, Provider, ReleaseReason, ReservationId, UserId, VariantId,
};

use super::{AttachOutcome, RepositoryError};
use crate::models::{Order, OrderDraft, OrderLine};

// =============================================================================
// Internal Row Types
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    request_id: String,
    cart_id: CartId,
    user_id: Option<UserId>,
    status: OrderStatus,
    subtotal: Decimal,
    discount_amount: Decimal,
    shipping_cost: Decimal,
    total_amount: Decimal,
    currency: String,
    provider: Provider,
    channel: Channel,
    experience: Experience,
    transaction_id: Option<String>,
    checkout_url: Option<String>,
    access_token: String,
    customer: Option<JsonValue>,
    shipping: Option<JsonValue>,
    attribution: Option<JsonValue>,
    coupon_code: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let currency = row.currency.parse::<CurrencyCode>().map_err(|e| {
            RepositoryError::DataCorruption(format!("order {}: {e}", row.id))
        })?;
        let route = PaymentRoute::try_from(CheckoutSettings {
            provider: row.provider,
            channel: row.channel,
            experience: row.experience,
        })
        .map_err(|e| RepositoryError::DataCorruption(format!("order {}: {e}", row.id)))?;
        let customer = row
            .customer
            .filter(|v| !v.is_null())
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("order {}: invalid customer: {e}", row.id))
            })?;

        Ok(Self {
            id: row.id,
            request_id: row.request_id,
            cart_id: row.cart_id,
            user_id: row.user_id,
            status: row.status,
            subtotal: row.subtotal,
            discount_amount: row.discount_amount,
            shipping_cost: row.shipping_cost,
            total_amount: row.total_amount,
            currency,
            route,
            transaction_id: row.transaction_id,
            checkout_url: row.checkout_url,
            access_token: row.access_token,
            customer,
            shipping: row.shipping,
            attribution: row.attribution,
            coupon_code: row.coupon_code,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn status_labels(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for `checkout.orders` and `checkout.order_items`.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Get an order by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    /// Returns `RepositoryError::DataCorruption` if the row is invalid.
    pub async fn get(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM checkout.orders WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Lines of an order, as priced when it was last opened.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn lines(&self, id: OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        let lines = sqlx::query_as::<_, OrderLine>(
            r"
            SELECT variant_id, quantity, unit_price
            FROM checkout.order_items
            WHERE order_id = $1
            ORDER BY variant_id
            ",
        )
        .bind(id)
        .fetch_all(self.pool)
        .await?;

        Ok(lines)
    }

    /// Get the order created by a router request.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM checkout.orders WHERE request_id = $1")
            .bind(request_id)
            .fetch_optional(self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Get an order by its guest access token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_access_token(&self, token: &str) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>("SELECT * FROM checkout.orders WHERE access_token = $1")
            .bind(token)
            .fetch_optional(self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Most recent pending order for a cart (and user, when known).
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn latest_pending(
        &self,
        cart_id: CartId,
        user_id: Option<UserId>,
    ) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>(
            r"
            SELECT * FROM checkout.orders
            WHERE cart_id = $1
              AND user_id IS NOT DISTINCT FROM $2
              AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            ",
        )
        .bind(cart_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    /// Get the order a provider reference is attached to.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get_by_transaction(
        &self,
        provider: Provider,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM checkout.orders WHERE provider = $1 AND transaction_id = $2",
        )
        .bind(provider)
        .bind(transaction_id)
        .fetch_optional(self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    /// Create a pending order, or refresh `draft.resume`, together with its
    /// lines and the cart's stock holds.
    ///
    /// Variant rows are locked in id order before availability is checked, so
    /// concurrent carts competing for the same stock serialize here. A resumed
    /// order keeps its original `request_id` and access token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::InsufficientStock` if other carts hold the stock,
    /// `RepositoryError::NotFound` for an unknown variant or resumed order,
    /// `RepositoryError::Conflict` if the resumed order is no longer open or the
    /// request id was used by another order.
    #[tracing::instrument(skip(self, draft), fields(cart_id = %draft.cart_id, request_id = %draft.request_id))]
    pub async fn open(&self, draft: &OrderDraft) -> Result<Order, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let order_id = match draft.resume {
            Some(id) => {
                let current = sqlx::query_as::<_, OrderRow>(
                    "SELECT * FROM checkout.orders WHERE id = $1 FOR UPDATE",
                )
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or(RepositoryError::NotFound)?;

                let has_reference = current
                    .transaction_id
                    .as_deref()
                    .is_some_and(|r| !r.trim().is_empty());
                if current.status != OrderStatus::Pending || has_reference {
                    return Err(RepositoryError::Conflict(format!(
                        "order {id} is no longer open"
                    )));
                }
                id
            }
            None => OrderId::random(),
        };

        hold_stock(&mut *tx, draft, order_id, now).await?;

        let customer = draft.customer.as_ref().map(Json);
        let (provider, channel, experience) = (
            draft.route.provider(),
            draft.route.channel(),
            draft.route.experience(),
        );

        let row = if draft.resume.is_some() {
            sqlx::query_as::<_, OrderRow>(
                r"
                UPDATE checkout.orders
                SET user_id = COALESCE($2, user_id),
                    subtotal = $3,
                    discount_amount = $4,
                    shipping_cost = $5,
                    total_amount = $6,
                    currency = $7,
                    provider = $8,
                    channel = $9,
                    experience = $10,
                    customer = $11,
                    shipping = $12,
                    attribution = $13,
                    coupon_code = $14,
                    updated_at = NOW()
                WHERE id = $1
                RETURNING *
                ",
            )
            .bind(order_id)
            .bind(draft.user_id)
            .bind(draft.subtotal)
            .bind(draft.discount_amount)
            .bind(draft.shipping_cost)
            .bind(draft.total_amount)
            .bind(draft.currency.to_string())
            .bind(provider)
            .bind(channel)
            .bind(experience)
            .bind(customer)
            .bind(draft.shipping.as_ref())
            .bind(draft.attribution.as_ref())
            .bind(draft.coupon_code.as_deref())
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, OrderRow>(
                r"
                INSERT INTO checkout.orders (
                    id, request_id, cart_id, user_id, status,
                    subtotal, discount_amount, shipping_cost, total_amount, currency,
                    provider, channel, experience, access_token,
                    customer, shipping, attribution, coupon_code
                )
                VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                RETURNING *
                ",
            )
            .bind(order_id)
            .bind(&draft.request_id)
            .bind(draft.cart_id)
            .bind(draft.user_id)
            .bind(draft.subtotal)
            .bind(draft.discount_amount)
            .bind(draft.shipping_cost)
            .bind(draft.total_amount)
            .bind(draft.currency.to_string())
            .bind(provider)
            .bind(channel)
            .bind(experience)
            .bind(&draft.access_token)
            .bind(customer)
            .bind(draft.shipping.as_ref())
            .bind(draft.attribution.as_ref())
            .bind(draft.coupon_code.as_deref())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| RepositoryError::from_unique(e, "order for this request"))?
        };

        sqlx::query("DELETE FROM checkout.order_items WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        for line in &draft.lines {
            sqlx::query(
                r"
                INSERT INTO checkout.order_items (order_id, variant_id, quantity, unit_price)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(order_id)
            .bind(line.variant_id)
            .bind(line.quantity)
            .bind(line.unit_price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(order_id = %order_id, resumed = draft.resume.is_some(), "Opened pending order");
        row.try_into()
    }

    /// Attach a provider reference while the order is `pending` without one.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the order does not exist, or
    /// `RepositoryError::Conflict` if the reference belongs to another order.
    #[tracing::instrument(skip(self))]
    pub async fn attach_transaction(
        &self,
        id: OrderId,
        transaction_id: &str,
        checkout_url: Option<&str>,
    ) -> Result<AttachOutcome, RepositoryError> {
        let attached = sqlx::query_as::<_, OrderRow>(
            r"
            UPDATE checkout.orders
            SET transaction_id = $2,
                checkout_url = COALESCE($3, checkout_url),
                updated_at = NOW()
            WHERE id = $1
              AND status = 'pending'
              AND (transaction_id IS NULL OR transaction_id = '')
            RETURNING *
            ",
        )
        .bind(id)
        .bind(transaction_id)
        .bind(checkout_url)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "provider reference"))?;

        if let Some(row) = attached {
            return Ok(AttachOutcome::Attached(row.try_into()?));
        }

        let current = self.get(id).await?.ok_or(RepositoryError::NotFound)?;
        Ok(AttachOutcome::AlreadyAttached(current))
    }

    /// Conditionally move an order to `to`, consuming or releasing its stock
    /// holds in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if a query fails.
    #[tracing::instrument(skip(self))]
    pub async fn transition(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, OrderRow>(
            r"
            UPDATE checkout.orders
            SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status::text = ANY($3)
            RETURNING *
            ",
        )
        .bind(id)
        .bind(to)
        .bind(status_labels(from))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        match to {
            OrderStatus::Paid => consume_holds(&mut *tx, id).await?,
            OrderStatus::Cancelled | OrderStatus::Failed => release_holds(&mut *tx, id).await?,
            _ => {}
        }

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    /// Ids of pending orders with a provider reference created before the cutoff.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, OrderId>(
            r"
            SELECT id FROM checkout.orders
            WHERE status = 'pending'
              AND transaction_id IS NOT NULL
              AND transaction_id <> ''
              AND created_at < $1
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(created_before)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        Ok(ids)
    }
}

/// Check availability and create or refresh the cart's reservations.
async fn hold_stock(
    conn: &mut PgConnection,
    draft: &OrderDraft,
    order_id: OrderId,
    now: DateTime<Utc>,
) -> Result<(), RepositoryError> {
    let mut variant_ids: Vec<VariantId> = draft.lines.iter().map(|l| l.variant_id).collect();
    variant_ids.sort();
    variant_ids.dedup();

    let stock: Vec<(VariantId, i32)> = sqlx::query_as(
        r"
        SELECT id, stock FROM checkout.variants
        WHERE id = ANY($1)
        ORDER BY id
        FOR UPDATE
        ",
    )
    .bind(&variant_ids)
    .fetch_all(&mut *conn)
    .await?;

    for line in &draft.lines {
        let on_hand = stock
            .iter()
            .find(|(id, _)| *id == line.variant_id)
            .map(|(_, stock)| *stock)
            .ok_or(RepositoryError::NotFound)?;

        let held_elsewhere = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM checkout.reservations
            WHERE variant_id = $1
              AND cart_id <> $2
              AND released_at IS NULL
              AND expires_at > $3
            ",
        )
        .bind(line.variant_id)
        .bind(draft.cart_id)
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;

        let available = i64::from(on_hand) - held_elsewhere;
        if available < i64::from(line.quantity) {
            return Err(RepositoryError::InsufficientStock {
                variant_id: line.variant_id,
                requested: line.quantity,
                available: available.max(0),
            });
        }
    }

    let expires_at = now + draft.reservation_ttl;

    sqlx::query(
        r"
        UPDATE checkout.reservations
        SET released_at = $3, release_reason = $4
        WHERE cart_id = $1
          AND released_at IS NULL
          AND NOT (variant_id = ANY($2))
        ",
    )
    .bind(draft.cart_id)
    .bind(&variant_ids)
    .bind(now)
    .bind(ReleaseReason::Cancelled)
    .execute(&mut *conn)
    .await?;

    for line in &draft.lines {
        let refreshed = sqlx::query(
            r"
            UPDATE checkout.reservations
            SET quantity = $3, expires_at = $4, order_id = $5
            WHERE cart_id = $1 AND variant_id = $2 AND released_at IS NULL
            ",
        )
        .bind(draft.cart_id)
        .bind(line.variant_id)
        .bind(line.quantity)
        .bind(expires_at)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;

        if refreshed.rows_affected() == 0 {
            sqlx::query(
                r"
                INSERT INTO checkout.reservations
                    (id, variant_id, cart_id, order_id, quantity, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ",
            )
            .bind(ReservationId::random())
            .bind(line.variant_id)
            .bind(draft.cart_id)
            .bind(order_id)
            .bind(line.quantity)
            .bind(now)
            .bind(expires_at)
            .execute(&mut *conn)
            .await?;
        }
    }

    Ok(())
}

/// Decrement stock for a paid order and mark its holds consumed.
async fn consume_holds(conn: &mut PgConnection, order_id: OrderId) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        UPDATE checkout.variants v
        SET stock = GREATEST(v.stock - i.quantity, 0), updated_at = NOW()
        FROM checkout.order_items i
        WHERE i.order_id = $1 AND v.id = i.variant_id
        ",
    )
    .bind(order_id)
    .execute(&mut *conn)
    .await?;

    mark_holds(conn, order_id, ReleaseReason::Consumed).await
}

/// Release a cancelled or failed order's holds.
async fn release_holds(conn: &mut PgConnection, order_id: OrderId) -> Result<(), RepositoryError> {
    mark_holds(conn, order_id, ReleaseReason::Cancelled).await
}

async fn mark_holds(
    conn: &mut PgConnection,
    order_id: OrderId,
    reason: ReleaseReason,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        UPDATE checkout.reservations
        SET released_at = NOW(), release_reason = $2
        WHERE order_id = $1 AND released_at IS NULL
        ",
    )
    .bind(order_id)
    .bind(reason)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
