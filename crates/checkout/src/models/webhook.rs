//! Webhook events, as stored and as normalized for processing.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use pagora_core::{OrderId, Provider};

/// A provider webhook delivery, persisted before it is applied.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct WebhookEvent {
    /// Provider-assigned id, unique across deliveries.
    pub event_id: String,
    pub provider: Provider,
    pub event_type: String,
    pub payload: JsonValue,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub attempts: i32,
}

impl WebhookEvent {
    #[must_use]
    pub const fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Insert-if-absent payload for [`WebhookEvent`].
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: String,
    pub provider: Provider,
    pub event_type: String,
    pub payload: JsonValue,
}

/// What a payment event means for the order it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    Succeeded,
    Processing,
    Failed,
    Cancelled,
    /// Event types the checkout does not act on.
    Ignored,
}

/// A provider event normalized across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    pub event_id: String,
    pub provider: Provider,
    pub event_type: String,
    pub kind: PaymentEventKind,
    /// Provider charge or session reference the event is about.
    pub transaction_id: Option<String>,
    /// Order id carried in the provider's metadata, when we set one.
    pub order_id: Option<OrderId>,
}
