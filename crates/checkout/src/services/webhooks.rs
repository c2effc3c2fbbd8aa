//! Payment webhook processing.
//!
//! Verified events are recorded before anything else, so a redelivery of a
//! processed event is a no-op and a failed one can be reprocessed later.
//! Providers may deliver before the router has committed the order; order
//! lookup therefore retries with exponential backoff before giving up.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use pagora_core::{OrderStatus, Provider, payment_sources};

use crate::config::{CheckoutConfig, CheckoutPolicy};
use crate::db::{CheckoutStore, RepositoryError};
use crate::error::AppError;
use crate::gateway::{WebhookError, stripe, yampi};
use crate::models::{NewWebhookEvent, Order, PaymentEvent, PaymentEventKind};
use crate::state::AppState;

/// Stripe's signature header.
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";
/// Yampi's signature header.
pub const YAMPI_SIGNATURE_HEADER: &str = "x-yampi-hmac-sha256";

/// Response body for webhook deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WebhookOutcome {
    pub ok: bool,
    /// The event had already been processed; nothing was applied.
    pub duplicate: bool,
}

/// Why a recorded event could not be applied.
#[derive(Debug, Error)]
enum ApplyError {
    #[error("no order found for event (order {order}, transaction {transaction})")]
    OrderNotFound { order: String, transaction: String },

    #[error("event carries no order or transaction reference")]
    Unreferenced,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct WebhookProcessor<'a> {
    config: &'a CheckoutConfig,
    store: &'a dyn CheckoutStore,
}

impl<'a> WebhookProcessor<'a> {
    #[must_use]
    pub fn new(state: &'a AppState) -> Self {
        Self {
            config: state.config(),
            store: state.store(),
        }
    }

    fn policy(&self) -> &CheckoutPolicy {
        &self.config.policy
    }

    /// Verify, record and apply a delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` when the signature does not verify,
    /// `AppError::NotFound` when the provider has no webhook secret,
    /// `AppError::BadRequest` for an unparseable body, and
    /// `AppError::WebhookFailed` when the event was recorded but could not be
    /// applied yet.
    #[instrument(skip_all, fields(provider = %provider, event_id = tracing::field::Empty))]
    pub async fn receive(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookOutcome, AppError> {
        self.verify(provider, signature, body)?;

        let payload: JsonValue = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("invalid webhook body: {e}")))?;
        let event = parse(provider, &payload)?;
        tracing::Span::current().record("event_id", event.event_id.as_str());

        let stored = self
            .store
            .record_webhook_event(&NewWebhookEvent {
                event_id: event.event_id.clone(),
                provider,
                event_type: event.event_type.clone(),
                payload,
            })
            .await?;
        if stored.is_processed() {
            info!(decision = "duplicate", "Webhook already processed");
            return Ok(WebhookOutcome {
                ok: true,
                duplicate: true,
            });
        }

        self.process(&event).await
    }

    /// Apply a recorded event again, typically one that failed earlier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown event id and
    /// `AppError::WebhookFailed` if it still cannot be applied.
    #[instrument(skip(self))]
    pub async fn reprocess(&self, event_id: &str) -> Result<WebhookOutcome, AppError> {
        let stored = self
            .store
            .webhook_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("webhook event {event_id}")))?;
        if stored.is_processed() {
            return Ok(WebhookOutcome {
                ok: true,
                duplicate: true,
            });
        }

        let event = parse(stored.provider, &stored.payload)?;
        self.process(&event).await
    }

    fn verify(
        &self,
        provider: Provider,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), AppError> {
        let not_configured = || AppError::NotFound(format!("{provider} webhooks are not configured"));
        let signature = signature.ok_or(WebhookError::MissingSignature);

        let verified = match provider {
            Provider::Stripe => {
                let secret = &self.config.stripe.as_ref().ok_or_else(not_configured)?.webhook_secret;
                signature.and_then(|header| {
                    stripe::verify_webhook(secret, header, body, Utc::now().timestamp())
                })
            }
            Provider::Yampi => {
                let secret = &self.config.yampi.as_ref().ok_or_else(not_configured)?.webhook_secret;
                signature.and_then(|header| yampi::verify_webhook(secret, header, body))
            }
        };
        verified.map_err(|e| {
            warn!(error = %e, "Webhook signature rejected");
            AppError::Unauthorized(e.to_string())
        })
    }

    async fn process(&self, event: &PaymentEvent) -> Result<WebhookOutcome, AppError> {
        match self.apply(event).await {
            Ok(()) => {
                let marked = self.store.mark_webhook_processed(&event.event_id).await?;
                if !marked {
                    info!(decision = "duplicate", "Another delivery processed this event first");
                }
                Ok(WebhookOutcome {
                    ok: true,
                    duplicate: !marked,
                })
            }
            Err(err) => {
                let message = err.to_string();
                warn!(event_id = %event.event_id, error = %message, "Webhook could not be applied");
                self.store
                    .mark_webhook_failed(&event.event_id, &message)
                    .await?;
                Err(AppError::WebhookFailed(message))
            }
        }
    }

    async fn apply(&self, event: &PaymentEvent) -> Result<(), ApplyError> {
        if event.kind == PaymentEventKind::Ignored {
            debug!(event_type = %event.event_type, "Ignoring webhook event type");
            return Ok(());
        }

        let order = self.locate(event).await?;
        let to = match event.kind {
            PaymentEventKind::Succeeded => {
                if let Some(transaction_id) = &event.transaction_id
                    && order.transaction_id.is_none()
                {
                    self.store
                        .attach_transaction(order.id, transaction_id, None)
                        .await?;
                }
                OrderStatus::Paid
            }
            PaymentEventKind::Processing => OrderStatus::Processing,
            PaymentEventKind::Failed => OrderStatus::Failed,
            PaymentEventKind::Cancelled => OrderStatus::Cancelled,
            PaymentEventKind::Ignored => return Ok(()),
        };
        let from = payment_sources(to);

        match self.store.transition_order(order.id, &from, to).await? {
            Some(updated) => info!(order_id = %updated.id, status = %updated.status, "Order updated from webhook"),
            None => debug!(order_id = %order.id, status = %order.status, target = %to, "Transition guard held; order left as is"),
        }
        Ok(())
    }

    /// Find the event's order, waiting out a router that has not committed yet.
    async fn locate(&self, event: &PaymentEvent) -> Result<Order, ApplyError> {
        if event.order_id.is_none() && event.transaction_id.is_none() {
            return Err(ApplyError::Unreferenced);
        }

        let attempts = self.policy().webhook_max_attempts.max(1);
        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = backoff(self.policy().webhook_retry_base, attempt);
                debug!(attempt, delay_ms = delay.as_millis(), "Order not found yet, retrying");
                tokio::time::sleep(delay).await;
            }
            if let Some(order) = self.find(event).await? {
                return Ok(order);
            }
        }

        Err(ApplyError::OrderNotFound {
            order: event
                .order_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
            transaction: event.transaction_id.clone().unwrap_or_else(|| "-".to_string()),
        })
    }

    async fn find(&self, event: &PaymentEvent) -> Result<Option<Order>, RepositoryError> {
        if let Some(id) = event.order_id
            && let Some(order) = self.store.order(id).await?
        {
            return Ok(Some(order));
        }
        match &event.transaction_id {
            Some(transaction_id) => {
                self.store
                    .order_by_transaction(event.provider, transaction_id)
                    .await
            }
            None => Ok(None),
        }
    }
}

fn parse(provider: Provider, payload: &JsonValue) -> Result<PaymentEvent, AppError> {
    match provider {
        Provider::Stripe => stripe::parse_event(payload),
        Provider::Yampi => yampi::parse_event(payload),
    }
    .map_err(|e| AppError::BadRequest(e.to_string()))
}

/// `base * 2^(attempt - 1)`.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.saturating_sub(1).min(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), Duration::from_millis(250));
        assert_eq!(backoff(base, 2), Duration::from_millis(500));
        assert_eq!(backoff(base, 3), Duration::from_secs(1));
    }
}
