//! Yampi client.
//!
//! Yampi only serves hosted checkout ([`PaymentRoute::YampiHosted`]): the
//! router creates a payment link for the order total and redirects the buyer
//! to it. Links carry our order id as `external_id` and in `metadata`, and
//! webhooks echo both back.
//!
//! Authentication uses the `User-Token` / `User-Secret-Key` header pair;
//! webhooks are signed with `X-Yampi-Hmac-SHA256` (base64 HMAC-SHA256 of the
//! raw body).

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use pagora_core::{OrderId, PaymentRoute, Provider};

use super::signature::{WebhookError, constant_time_eq, hmac_sha256};
use super::{
    PaymentGateway, ProviderError, ProviderPaymentState, ProviderSession, SessionRequest,
    http_client, read_json,
};
use crate::config::YampiConfig;
use crate::models::{PaymentEvent, PaymentEventKind};

/// Yampi API client.
#[derive(Clone)]
pub struct YampiGateway {
    client: Client,
    alias: String,
    user_token: SecretString,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for YampiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YampiGateway")
            .field("alias", &self.alias)
            .field("user_token", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct CreatePaymentLink<'a> {
    name: String,
    amount: String,
    external_id: String,
    redirect_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_email: Option<&'a str>,
    metadata: JsonValue,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct PaymentLink {
    id: JsonValue,
    #[serde(default)]
    link_url: Option<String>,
    #[serde(default)]
    status: Option<LinkStatus>,
}

/// Yampi reports status either as a bare alias or nested under `data.alias`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LinkStatus {
    Alias(String),
    Nested { data: StatusData },
}

#[derive(Debug, Deserialize)]
struct StatusData {
    alias: String,
}

impl LinkStatus {
    fn alias(&self) -> &str {
        match self {
            Self::Alias(alias) => alias,
            Self::Nested { data } => &data.alias,
        }
    }
}

/// Render a Yampi id (numeric or string) as text.
fn id_text(id: &JsonValue) -> Option<String> {
    match id {
        JsonValue::String(s) if !s.is_empty() => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl YampiGateway {
    /// Create a Yampi client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Request` if the HTTP client cannot be built.
    pub fn new(config: &YampiConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            alias: config.alias.clone(),
            user_token: config.user_token.clone(),
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("User-Token", self.user_token.expose_secret())
            .header("User-Secret-Key", self.secret_key.expose_secret())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{path}", self.api_base, self.alias)
    }

    async fn get_link(&self, id: &str) -> Result<PaymentLink, ProviderError> {
        let response = self
            .authed(self.client.get(self.url(&format!("checkout/payment-link/{id}"))))
            .send()
            .await?;
        let envelope: Envelope<PaymentLink> = read_json(response).await?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl PaymentGateway for YampiGateway {
    fn provider(&self) -> Provider {
        Provider::Yampi
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        if request.route != PaymentRoute::YampiHosted {
            return Err(ProviderError::InvalidRequest(
                "Yampi only serves hosted checkout".to_string(),
            ));
        }

        let order_id = request.order_id.to_string();
        let body = CreatePaymentLink {
            name: format!("Pedido {order_id}"),
            amount: request.amount.amount.round_dp(2).to_string(),
            external_id: order_id.clone(),
            redirect_url: &request.success_url,
            customer_email: request.customer_email.as_deref(),
            metadata: serde_json::json!({ "order_id": order_id }),
        };

        let response = self
            .authed(self.client.post(self.url("checkout/payment-link")))
            .header("Idempotency-Key", &request.idempotency_key)
            .json(&body)
            .send()
            .await?;

        let envelope: Envelope<PaymentLink> = read_json(response).await?;
        let link = envelope.data;
        let transaction_id = id_text(&link.id)
            .ok_or_else(|| ProviderError::Decode("payment link without id".to_string()))?;
        debug!(payment_link = %transaction_id, "Created Yampi payment link");

        Ok(ProviderSession {
            transaction_id,
            client_secret: None,
            redirect_url: link.link_url,
        })
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        _route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let link = self.get_link(transaction_id).await?;
        Ok(ProviderSession {
            transaction_id: transaction_id.to_string(),
            client_secret: None,
            redirect_url: link.link_url,
        })
    }

    #[instrument(skip(self))]
    async fn payment_state(
        &self,
        _route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderPaymentState, ProviderError> {
        let link = self.get_link(transaction_id).await?;
        Ok(status_state(link.status.as_ref().map(LinkStatus::alias)))
    }
}

/// Map a Yampi status alias.
#[must_use]
pub fn status_state(alias: Option<&str>) -> ProviderPaymentState {
    match alias {
        Some("paid" | "invoiced" | "shipped" | "delivered") => ProviderPaymentState::Succeeded,
        Some("cancelled" | "canceled" | "expired") => ProviderPaymentState::Canceled,
        Some("refused") => ProviderPaymentState::Failed,
        _ => ProviderPaymentState::InFlight,
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Verify an `X-Yampi-Hmac-SHA256` header against the raw body.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSignature` on mismatch.
pub fn verify_webhook(secret: &SecretString, header: &str, body: &[u8]) -> Result<(), WebhookError> {
    let expected = BASE64.encode(hmac_sha256(secret.expose_secret().as_bytes(), &[body])?);
    if constant_time_eq(expected.as_bytes(), header.trim().as_bytes()) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature("signature mismatch".to_string()))
    }
}

/// Compute an `X-Yampi-Hmac-SHA256` header value for `body`.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSignature` if the key is rejected.
pub fn sign_webhook(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    Ok(BASE64.encode(hmac_sha256(secret.as_bytes(), &[body])?))
}

#[derive(Debug, Deserialize)]
struct YampiEvent {
    event: String,
    resource: JsonValue,
}

/// Normalize a Yampi event. The event id is `yampi:{event}:{resource.id}`,
/// since Yampi deliveries carry no id of their own.
///
/// # Errors
///
/// Returns `WebhookError::Malformed` if `event` or `resource.id` is missing.
pub fn parse_event(payload: &JsonValue) -> Result<PaymentEvent, WebhookError> {
    let event: YampiEvent = serde_json::from_value(payload.clone())
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;
    let resource_id = event
        .resource
        .get("id")
        .and_then(id_text)
        .ok_or_else(|| WebhookError::Malformed("resource.id is missing".to_string()))?;

    let kind = match event.event.as_str() {
        "order.paid" => PaymentEventKind::Succeeded,
        "order.created" => PaymentEventKind::Processing,
        "order.cancelled" => PaymentEventKind::Cancelled,
        "order.refused" => PaymentEventKind::Failed,
        _ => PaymentEventKind::Ignored,
    };

    let transaction_id = event
        .resource
        .get("payment_link_id")
        .and_then(id_text);
    let order_id = event
        .resource
        .pointer("/metadata/order_id")
        .or_else(|| event.resource.get("external_id"))
        .and_then(JsonValue::as_str)
        .and_then(|raw| raw.parse::<OrderId>().ok());

    Ok(PaymentEvent {
        event_id: format!("yampi:{}:{resource_id}", event.event),
        provider: Provider::Yampi,
        event_type: event.event,
        kind,
        transaction_id,
        order_id,
    })
}
