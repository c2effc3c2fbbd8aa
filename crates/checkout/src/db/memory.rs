//! In-process [`CheckoutStore`] for tests.
//!
//! Mirrors the conditional-write semantics of [`super::PgStore`]: one mutex
//! stands in for row locks and transactions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use pagora_core::{
    CartId, CheckoutSettings, OrderId, OrderStatus, PaymentRoute, Provider, ReleaseReason,
    ReservationId, UserId, VariantId,
};

use super::{AttachOutcome, CheckoutStore, RepositoryError};
use crate::models::{
    Coupon, NewWebhookEvent, Order, OrderDraft, OrderLine, ReleaseSummary, Reservation,
    VariantPrice, WebhookEvent,
};

#[derive(Default)]
struct Inner {
    settings: Option<CheckoutSettings>,
    variants: HashMap<VariantId, VariantPrice>,
    coupons: HashMap<String, Coupon>,
    responses: HashMap<(CartId, String), (JsonValue, DateTime<Utc>)>,
    orders: HashMap<OrderId, Order>,
    items: HashMap<OrderId, Vec<OrderLine>>,
    reservations: Vec<Reservation>,
    webhooks: HashMap<String, WebhookEvent>,
}

/// Mutex-backed store with the same contract as the `PostgreSQL` one.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store configured for Stripe's embedded payment form.
    #[must_use]
    pub fn new() -> Self {
        let inner = Inner {
            settings: Some(PaymentRoute::StripeTransparent.settings()),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add (or replace) a catalog variant.
    pub fn put_variant(&self, id: VariantId, price: Decimal, stock: i32) {
        self.lock().variants.insert(
            id,
            VariantPrice {
                id,
                price,
                stock,
                active: true,
            },
        );
    }

    /// Add (or replace) a coupon.
    pub fn put_coupon(&self, coupon: Coupon) {
        self.lock()
            .coupons
            .insert(coupon.code.to_uppercase(), coupon);
    }

    /// Deactivate a variant.
    pub fn deactivate_variant(&self, id: VariantId) {
        if let Some(variant) = self.lock().variants.get_mut(&id) {
            variant.active = false;
        }
    }

    #[must_use]
    pub fn variant_stock(&self, id: VariantId) -> Option<i32> {
        self.lock().variants.get(&id).map(|v| v.stock)
    }

    #[must_use]
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    #[must_use]
    pub fn order_lines(&self, id: OrderId) -> Vec<OrderLine> {
        self.lock().items.get(&id).cloned().unwrap_or_default()
    }

    /// Shift an order's creation time into the past.
    pub fn backdate_order(&self, id: OrderId, by: chrono::Duration) {
        if let Some(order) = self.lock().orders.get_mut(&id) {
            order.created_at -= by;
        }
    }

    /// Shift every hold of a cart into the past, as if its TTL had run out.
    pub fn backdate_reservations(&self, cart_id: CartId, by: chrono::Duration) {
        for reservation in self
            .lock()
            .reservations
            .iter_mut()
            .filter(|r| r.cart_id == cart_id)
        {
            reservation.created_at -= by;
            reservation.expires_at -= by;
        }
    }

    /// Force a status, bypassing transition rules.
    pub fn force_status(&self, id: OrderId, status: OrderStatus) {
        if let Some(order) = self.lock().orders.get_mut(&id) {
            order.status = status;
        }
    }
}

impl Inner {
    fn find_order(&self, pred: impl Fn(&Order) -> bool) -> Option<Order> {
        self.orders.values().find(|o| pred(o)).cloned()
    }

    fn held_elsewhere(&self, variant_id: VariantId, cart_id: CartId, now: DateTime<Utc>) -> i64 {
        self.reservations
            .iter()
            .filter(|r| r.variant_id == variant_id && r.cart_id != cart_id && r.is_active(now))
            .map(|r| i64::from(r.quantity))
            .sum()
    }

    fn mark_holds(&mut self, order_id: OrderId, reason: ReleaseReason, now: DateTime<Utc>) {
        for reservation in self
            .reservations
            .iter_mut()
            .filter(|r| r.order_id == Some(order_id) && r.released_at.is_none())
        {
            reservation.released_at = Some(now);
            reservation.release_reason = Some(reason);
        }
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }

    async fn checkout_settings(&self) -> Result<CheckoutSettings, RepositoryError> {
        self.lock().settings.ok_or(RepositoryError::NotFound)
    }

    async fn save_checkout_settings(
        &self,
        settings: CheckoutSettings,
    ) -> Result<CheckoutSettings, RepositoryError> {
        self.lock().settings = Some(settings);
        Ok(settings)
    }

    async fn variant_prices(
        &self,
        ids: &[VariantId],
    ) -> Result<Vec<VariantPrice>, RepositoryError> {
        let inner = self.lock();
        Ok(ids
            .iter()
            .filter_map(|id| inner.variants.get(id).cloned())
            .collect())
    }

    async fn coupon(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        Ok(self.lock().coupons.get(&code.trim().to_uppercase()).cloned())
    }

    async fn stored_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        not_before: DateTime<Utc>,
    ) -> Result<Option<JsonValue>, RepositoryError> {
        Ok(self
            .lock()
            .responses
            .get(&(cart_id, request_id.to_string()))
            .filter(|(_, at)| *at >= not_before)
            .map(|(response, _)| response.clone()))
    }

    async fn store_response(
        &self,
        cart_id: CartId,
        request_id: &str,
        response: &JsonValue,
    ) -> Result<JsonValue, RepositoryError> {
        let mut inner = self.lock();
        let (stored, _) = inner
            .responses
            .entry((cart_id, request_id.to_string()))
            .or_insert_with(|| (response.clone(), Utc::now()));
        Ok(stored.clone())
    }

    async fn purge_responses(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut inner = self.lock();
        let before = inner.responses.len();
        inner.responses.retain(|_, (_, at)| *at >= cutoff);
        Ok(u64::try_from(before - inner.responses.len()).unwrap_or_default())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().orders.get(&id).cloned())
    }

    async fn order_lines(&self, id: OrderId) -> Result<Vec<OrderLine>, RepositoryError> {
        Ok(Self::order_lines(self, id))
    }

    async fn order_by_request_id(
        &self,
        request_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().find_order(|o| o.request_id == request_id))
    }

    async fn order_by_access_token(&self, token: &str) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().find_order(|o| o.access_token == token))
    }

    async fn latest_pending_order(
        &self,
        cart_id: CartId,
        user_id: Option<UserId>,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .lock()
            .orders
            .values()
            .filter(|o| {
                o.cart_id == cart_id && o.user_id == user_id && o.status == OrderStatus::Pending
            })
            .max_by_key(|o| o.created_at)
            .cloned())
    }

    async fn order_by_transaction(
        &self,
        provider: Provider,
        transaction_id: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        Ok(self.lock().find_order(|o| {
            o.route.provider() == provider && o.transaction_id.as_deref() == Some(transaction_id)
        }))
    }

    async fn open_order(&self, draft: &OrderDraft) -> Result<Order, RepositoryError> {
        let mut inner = self.lock();
        let now = Utc::now();

        let order_id = match draft.resume {
            Some(id) => {
                let current = inner.orders.get(&id).ok_or(RepositoryError::NotFound)?;
                if !current.is_open() {
                    return Err(RepositoryError::Conflict(format!(
                        "order {id} is no longer open"
                    )));
                }
                id
            }
            None => {
                if inner
                    .orders
                    .values()
                    .any(|o| o.request_id == draft.request_id)
                {
                    return Err(RepositoryError::Conflict(
                        "order for this request already exists".to_string(),
                    ));
                }
                OrderId::random()
            }
        };

        for line in &draft.lines {
            let on_hand = inner
                .variants
                .get(&line.variant_id)
                .map(|v| v.stock)
                .ok_or(RepositoryError::NotFound)?;
            let available = i64::from(on_hand) - inner.held_elsewhere(line.variant_id, draft.cart_id, now);
            if available < i64::from(line.quantity) {
                return Err(RepositoryError::InsufficientStock {
                    variant_id: line.variant_id,
                    requested: line.quantity,
                    available: available.max(0),
                });
            }
        }

        let expires_at = now + draft.reservation_ttl;
        for reservation in inner.reservations.iter_mut().filter(|r| {
            r.cart_id == draft.cart_id
                && r.released_at.is_none()
                && !draft.lines.iter().any(|l| l.variant_id == r.variant_id)
        }) {
            reservation.released_at = Some(now);
            reservation.release_reason = Some(ReleaseReason::Cancelled);
        }
        for line in &draft.lines {
            let live = inner.reservations.iter_mut().find(|r| {
                r.cart_id == draft.cart_id
                    && r.variant_id == line.variant_id
                    && r.released_at.is_none()
            });
            match live {
                Some(reservation) => {
                    reservation.quantity = line.quantity;
                    reservation.expires_at = expires_at;
                    reservation.order_id = Some(order_id);
                }
                None => inner.reservations.push(Reservation {
                    id: ReservationId::random(),
                    variant_id: line.variant_id,
                    cart_id: draft.cart_id,
                    order_id: Some(order_id),
                    quantity: line.quantity,
                    created_at: now,
                    expires_at,
                    released_at: None,
                    release_reason: None,
                }),
            }
        }

        let order = match inner.orders.get(&order_id) {
            Some(existing) => Order {
                user_id: draft.user_id.or(existing.user_id),
                subtotal: draft.subtotal,
                discount_amount: draft.discount_amount,
                shipping_cost: draft.shipping_cost,
                total_amount: draft.total_amount,
                currency: draft.currency,
                route: draft.route,
                customer: draft.customer.clone(),
                shipping: draft.shipping.clone(),
                attribution: draft.attribution.clone(),
                coupon_code: draft.coupon_code.clone(),
                updated_at: now,
                ..existing.clone()
            },
            None => Order {
                id: order_id,
                request_id: draft.request_id.clone(),
                cart_id: draft.cart_id,
                user_id: draft.user_id,
                status: OrderStatus::Pending,
                subtotal: draft.subtotal,
                discount_amount: draft.discount_amount,
                shipping_cost: draft.shipping_cost,
                total_amount: draft.total_amount,
                currency: draft.currency,
                route: draft.route,
                transaction_id: None,
                checkout_url: None,
                access_token: draft.access_token.clone(),
                customer: draft.customer.clone(),
                shipping: draft.shipping.clone(),
                attribution: draft.attribution.clone(),
                coupon_code: draft.coupon_code.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        inner.items.insert(order_id, draft.lines.clone());
        inner.orders.insert(order_id, order.clone());
        Ok(order)
    }

    async fn attach_transaction(
        &self,
        id: OrderId,
        transaction_id: &str,
        checkout_url: Option<&str>,
    ) -> Result<AttachOutcome, RepositoryError> {
        let mut inner = self.lock();
        let provider = inner
            .orders
            .get(&id)
            .map(|o| o.route.provider())
            .ok_or(RepositoryError::NotFound)?;
        if inner.orders.values().any(|o| {
            o.id != id
                && o.route.provider() == provider
                && o.transaction_id.as_deref() == Some(transaction_id)
        }) {
            return Err(RepositoryError::Conflict(
                "provider reference already exists".to_string(),
            ));
        }

        let order = inner.orders.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        let has_reference = order
            .transaction_id
            .as_deref()
            .is_some_and(|r| !r.is_empty());
        if order.status != OrderStatus::Pending || has_reference {
            return Ok(AttachOutcome::AlreadyAttached(order.clone()));
        }

        order.transaction_id = Some(transaction_id.to_string());
        if let Some(url) = checkout_url {
            order.checkout_url = Some(url.to_string());
        }
        order.updated_at = Utc::now();
        Ok(AttachOutcome::Attached(order.clone()))
    }

    async fn transition_order(
        &self,
        id: OrderId,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut inner = self.lock();
        let now = Utc::now();

        let Some(order) = inner.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&order.status) {
            return Ok(None);
        }
        order.status = to;
        order.updated_at = now;
        let updated = order.clone();

        match to {
            OrderStatus::Paid => {
                let lines = inner.items.get(&id).cloned().unwrap_or_default();
                for line in lines {
                    if let Some(variant) = inner.variants.get_mut(&line.variant_id) {
                        variant.stock = (variant.stock - line.quantity).max(0);
                    }
                }
                inner.mark_holds(id, ReleaseReason::Consumed, now);
            }
            OrderStatus::Cancelled | OrderStatus::Failed => {
                inner.mark_holds(id, ReleaseReason::Cancelled, now);
            }
            _ => {}
        }

        Ok(Some(updated))
    }

    async fn stale_pending_orders(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OrderId>, RepositoryError> {
        let inner = self.lock();
        let mut stale: Vec<&Order> = inner
            .orders
            .values()
            .filter(|o| {
                o.status == OrderStatus::Pending
                    && o.transaction_id.as_deref().is_some_and(|r| !r.is_empty())
                    && o.created_at < created_before
            })
            .collect();
        stale.sort_by_key(|o| o.created_at);
        Ok(stale
            .into_iter()
            .take(usize::try_from(limit).unwrap_or_default())
            .map(|o| o.id)
            .collect())
    }

    async fn cart_reservations(
        &self,
        cart_id: CartId,
    ) -> Result<Vec<Reservation>, RepositoryError> {
        let mut reservations: Vec<Reservation> = self
            .lock()
            .reservations
            .iter()
            .filter(|r| r.cart_id == cart_id)
            .cloned()
            .collect();
        reservations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reservations)
    }

    async fn release_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReleaseSummary, RepositoryError> {
        let mut inner = self.lock();
        let mut summary = ReleaseSummary::default();

        for reservation in inner
            .reservations
            .iter_mut()
            .filter(|r| r.released_at.is_none() && r.expires_at <= now)
        {
            reservation.released_at = Some(now);
            reservation.release_reason = Some(ReleaseReason::Expired);
            summary.released += 1;
            if let Some(order_id) = reservation.order_id
                && !summary.order_ids.contains(&order_id)
            {
                summary.order_ids.push(order_id);
            }
        }

        Ok(summary)
    }

    async fn record_webhook_event(
        &self,
        event: &NewWebhookEvent,
    ) -> Result<WebhookEvent, RepositoryError> {
        let mut inner = self.lock();
        let stored = inner
            .webhooks
            .entry(event.event_id.clone())
            .or_insert_with(|| WebhookEvent {
                event_id: event.event_id.clone(),
                provider: event.provider,
                event_type: event.event_type.clone(),
                payload: event.payload.clone(),
                received_at: Utc::now(),
                processed_at: None,
                error_message: None,
                attempts: 0,
            });
        Ok(stored.clone())
    }

    async fn webhook_event(&self, event_id: &str) -> Result<Option<WebhookEvent>, RepositoryError> {
        Ok(self.lock().webhooks.get(event_id).cloned())
    }

    async fn mark_webhook_processed(&self, event_id: &str) -> Result<bool, RepositoryError> {
        let mut inner = self.lock();
        let Some(event) = inner.webhooks.get_mut(event_id) else {
            return Ok(false);
        };
        if event.processed_at.is_some() {
            return Ok(false);
        }
        event.processed_at = Some(Utc::now());
        event.error_message = None;
        event.attempts += 1;
        Ok(true)
    }

    async fn mark_webhook_failed(
        &self,
        event_id: &str,
        error: &str,
    ) -> Result<(), RepositoryError> {
        if let Some(event) = self
            .lock()
            .webhooks
            .get_mut(event_id)
            .filter(|e| e.processed_at.is_none())
        {
            event.error_message = Some(error.to_string());
            event.attempts += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pagora_core::CurrencyCode;

    fn draft(cart_id: CartId, variant_id: VariantId, quantity: i32) -> OrderDraft {
        OrderDraft {
            resume: None,
            request_id: format!("req-{}", OrderId::random()),
            cart_id,
            user_id: None,
            route: PaymentRoute::StripeTransparent,
            currency: CurrencyCode::BRL,
            lines: vec![OrderLine {
                variant_id,
                quantity,
                unit_price: Decimal::TEN,
            }],
            subtotal: Decimal::TEN * Decimal::from(quantity),
            discount_amount: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            total_amount: Decimal::TEN * Decimal::from(quantity),
            access_token: format!("tok-{}", OrderId::random()),
            customer: None,
            shipping: None,
            attribution: None,
            coupon_code: None,
            reservation_ttl: chrono::Duration::minutes(15),
        }
    }

    #[tokio::test]
    async fn test_other_carts_cannot_oversell() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        store.put_variant(variant, Decimal::TEN, 3);

        store
            .open_order(&draft(CartId::random(), variant, 2))
            .await
            .unwrap();
        let err = store
            .open_order(&draft(CartId::random(), variant, 2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::InsufficientStock { available: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_same_cart_refreshes_its_hold() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        let cart = CartId::random();
        store.put_variant(variant, Decimal::TEN, 2);

        let first = store.open_order(&draft(cart, variant, 2)).await.unwrap();
        let mut again = draft(cart, variant, 2);
        again.resume = Some(first.id);
        store.open_order(&again).await.unwrap();

        let live: Vec<_> = store
            .cart_reservations(cart)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.released_at.is_none())
            .collect();
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_is_conditional() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        store.put_variant(variant, Decimal::TEN, 5);
        let order = store
            .open_order(&draft(CartId::random(), variant, 1))
            .await
            .unwrap();

        let first = store
            .attach_transaction(order.id, "pi_1", None)
            .await
            .unwrap();
        assert!(matches!(first, AttachOutcome::Attached(_)));

        let second = store
            .attach_transaction(order.id, "pi_2", None)
            .await
            .unwrap();
        let AttachOutcome::AlreadyAttached(current) = second else {
            panic!("second attach must not overwrite");
        };
        assert_eq!(current.transaction_id.as_deref(), Some("pi_1"));
    }

    #[tokio::test]
    async fn test_paid_consumes_stock_once() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        store.put_variant(variant, Decimal::TEN, 5);
        let order = store
            .open_order(&draft(CartId::random(), variant, 2))
            .await
            .unwrap();

        let paid = store
            .transition_order(order.id, &[OrderStatus::Pending], OrderStatus::Paid)
            .await
            .unwrap();
        assert!(paid.is_some());
        let again = store
            .transition_order(order.id, &[OrderStatus::Pending], OrderStatus::Paid)
            .await
            .unwrap();
        assert!(again.is_none());
        assert_eq!(store.variant_stock(variant), Some(3));
    }

    #[tokio::test]
    async fn test_sweeper_is_idempotent() {
        let store = MemoryStore::new();
        let variant = VariantId::random();
        let cart = CartId::random();
        store.put_variant(variant, Decimal::TEN, 5);
        let order = store.open_order(&draft(cart, variant, 1)).await.unwrap();
        store.backdate_reservations(cart, chrono::Duration::minutes(30));

        let first = store.release_expired_reservations(Utc::now()).await.unwrap();
        assert_eq!(first.released, 1);
        assert_eq!(first.order_ids, vec![order.id]);

        let second = store.release_expired_reservations(Utc::now()).await.unwrap();
        assert_eq!(second, ReleaseSummary::default());
    }
}
