//! Expired reservation sweeper.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument};

use crate::db::CheckoutStore;
use crate::error::AppError;
use crate::models::ReleaseSummary;

/// Release every reservation whose TTL has elapsed.
///
/// Safe to run repeatedly and concurrently; already-released rows are skipped.
///
/// # Errors
///
/// Returns `AppError::Database` if the release fails.
#[instrument(skip(store))]
pub async fn release_expired(store: &dyn CheckoutStore) -> Result<ReleaseSummary, AppError> {
    let summary = store.release_expired_reservations(Utc::now()).await?;
    if summary.released > 0 {
        info!(
            released = summary.released,
            orders = summary.order_ids.len(),
            "Released expired reservations"
        );
    }
    Ok(summary)
}

/// Run [`release_expired`] every `interval` until the task is dropped.
pub fn spawn_sweeper(
    store: Arc<dyn CheckoutStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = release_expired(store.as_ref()).await {
                error!(error = %e, "Reservation sweep failed");
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use pagora_core::{CartId, OrderId, PaymentRoute, VariantId};

    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::{OrderDraft, OrderLine};

    #[tokio::test]
    async fn test_release_expired_twice() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        store.put_variant(variant, Decimal::TEN, 5);
        let cart = CartId::random();

        let order = store
            .open_order(&OrderDraft {
                resume: None,
                request_id: "req-sweep".to_string(),
                cart_id: cart,
                user_id: None,
                route: PaymentRoute::StripeTransparent,
                currency: pagora_core::CurrencyCode::BRL,
                lines: vec![OrderLine {
                    variant_id: variant,
                    quantity: 2,
                    unit_price: Decimal::TEN,
                }],
                subtotal: Decimal::from(20),
                discount_amount: Decimal::ZERO,
                shipping_cost: Decimal::ZERO,
                total_amount: Decimal::from(20),
                access_token: format!("tok-{}", OrderId::random()),
                customer: None,
                shipping: None,
                attribution: None,
                coupon_code: None,
                reservation_ttl: chrono::Duration::minutes(15),
            })
            .await
            .unwrap();

        assert_eq!(release_expired(&store).await.unwrap().released, 0);

        store.backdate_reservations(cart, chrono::Duration::minutes(16));
        let first = release_expired(&store).await.unwrap();
        assert_eq!(first.released, 1);
        assert_eq!(first.order_ids, vec![order.id]);

        assert_eq!(release_expired(&store).await.unwrap(), ReleaseSummary::default());
    }
}
