//! Stripe client.
//!
//! - Embedded form ([`PaymentRoute::StripeTransparent`]): a `PaymentIntent`,
//!   whose `client_secret` the storefront renders the Payment Element with.
//! - Hosted ([`PaymentRoute::StripeHosted`]): a Checkout Session, whose `url`
//!   the buyer is redirected to.
//!
//! Creation requests carry an `Idempotency-Key` derived from the order id, so
//! Stripe itself returns the same object for repeated attempts.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

use pagora_core::{OrderId, PaymentRoute, Provider};

use super::signature::{WebhookError, constant_time_eq, hmac_sha256};
use super::{
    PaymentGateway, ProviderError, ProviderPaymentState, ProviderSession, SessionRequest,
    http_client, read_json,
};
use crate::config::StripeConfig;
use crate::models::{PaymentEvent, PaymentEventKind};

/// Maximum age of a signed webhook, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Stripe API client.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: SecretString,
    api_base: String,
}

impl std::fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeGateway")
            .field("secret_key", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
}

impl StripeGateway {
    /// Create a Stripe client.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Request` if the HTTP client cannot be built.
    pub fn new(config: &StripeConfig, timeout: Duration) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client(timeout)?,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn create_payment_intent(
        &self,
        request: &SessionRequest,
        amount: i64,
    ) -> Result<ProviderSession, ProviderError> {
        let order_id = request.order_id.to_string();
        let mut form: Vec<(&str, String)> = vec![
            ("amount", amount.to_string()),
            ("currency", request.amount.currency_code.as_lower().to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[order_id]", order_id.clone()),
            ("description", format!("Order {order_id}")),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("receipt_email", email.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;

        let intent: PaymentIntent = read_json(response).await?;
        debug!(payment_intent = %intent.id, "Created Stripe PaymentIntent");

        Ok(ProviderSession {
            transaction_id: intent.id,
            client_secret: intent.client_secret,
            redirect_url: None,
        })
    }

    async fn create_checkout_session(
        &self,
        request: &SessionRequest,
        amount: i64,
    ) -> Result<ProviderSession, ProviderError> {
        let order_id = request.order_id.to_string();
        let mut form: Vec<(&str, String)> = vec![
            ("mode", "payment".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("client_reference_id", order_id.clone()),
            ("metadata[order_id]", order_id.clone()),
            ("payment_intent_data[metadata][order_id]", order_id.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            (
                "line_items[0][price_data][currency]",
                request.amount.currency_code.as_lower().to_string(),
            ),
            ("line_items[0][price_data][unit_amount]", amount.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                format!("Order {order_id}"),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email", email.clone()));
        }

        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;

        let session: CheckoutSession = read_json(response).await?;
        debug!(checkout_session = %session.id, "Created Stripe Checkout Session");

        Ok(ProviderSession {
            transaction_id: session.id,
            client_secret: None,
            redirect_url: session.url,
        })
    }

    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/payment_intents/{id}", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_checkout_session(&self, id: &str) -> Result<CheckoutSession, ProviderError> {
        let response = self
            .client
            .get(format!("{}/v1/checkout/sessions/{id}", self.api_base))
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> Provider {
        Provider::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        let amount = request.amount.minor_units().ok_or_else(|| {
            ProviderError::InvalidRequest(format!("amount {} cannot be charged", request.amount.amount))
        })?;

        match request.route {
            PaymentRoute::StripeTransparent => self.create_payment_intent(request, amount).await,
            PaymentRoute::StripeHosted => self.create_checkout_session(request, amount).await,
            PaymentRoute::YampiHosted => Err(ProviderError::InvalidRequest(
                "Stripe cannot serve a Yampi route".to_string(),
            )),
        }
    }

    #[instrument(skip(self))]
    async fn retrieve_session(
        &self,
        route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderSession, ProviderError> {
        if route == PaymentRoute::StripeHosted {
            let session = self.get_checkout_session(transaction_id).await?;
            return Ok(ProviderSession {
                transaction_id: session.id,
                client_secret: None,
                redirect_url: session.url,
            });
        }

        let intent = self.get_payment_intent(transaction_id).await?;
        Ok(ProviderSession {
            transaction_id: intent.id,
            client_secret: intent.client_secret,
            redirect_url: None,
        })
    }

    #[instrument(skip(self))]
    async fn payment_state(
        &self,
        route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderPaymentState, ProviderError> {
        if route == PaymentRoute::StripeHosted {
            let session = self.get_checkout_session(transaction_id).await?;
            return Ok(checkout_session_state(
                session.status.as_deref(),
                session.payment_status.as_deref(),
            ));
        }

        let intent = self.get_payment_intent(transaction_id).await?;
        Ok(payment_intent_state(&intent.status))
    }
}

/// Map a `PaymentIntent.status`.
#[must_use]
pub fn payment_intent_state(status: &str) -> ProviderPaymentState {
    match status {
        "succeeded" => ProviderPaymentState::Succeeded,
        "canceled" => ProviderPaymentState::Canceled,
        // processing, requires_payment_method, requires_confirmation,
        // requires_action, requires_capture
        _ => ProviderPaymentState::InFlight,
    }
}

/// Map a Checkout Session's `status` and `payment_status`.
#[must_use]
pub fn checkout_session_state(
    status: Option<&str>,
    payment_status: Option<&str>,
) -> ProviderPaymentState {
    match (status, payment_status) {
        (_, Some("paid" | "no_payment_required")) => ProviderPaymentState::Succeeded,
        (Some("expired"), _) => ProviderPaymentState::Canceled,
        _ => ProviderPaymentState::InFlight,
    }
}

// =============================================================================
// Webhooks
// =============================================================================

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// the raw body at time `now` (unix seconds).
///
/// # Errors
///
/// Returns `WebhookError::InvalidSignature` if the header is malformed, too
/// old, or no `v1` signature matches.
pub fn verify_webhook(
    secret: &SecretString,
    header: &str,
    body: &[u8],
    now: i64,
) -> Result<(), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| WebhookError::InvalidSignature("missing timestamp".to_string()))?;
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| WebhookError::InvalidSignature("invalid timestamp".to_string()))?;
    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = hex::encode(hmac_sha256(
        secret.expose_secret().as_bytes(),
        &[timestamp.as_bytes(), b".", body],
    )?);

    if signatures
        .iter()
        .any(|candidate| constant_time_eq(expected.as_bytes(), candidate.as_bytes()))
    {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature("signature mismatch".to_string()))
    }
}

/// Compute a `Stripe-Signature` header value for `body` at `timestamp`.
///
/// # Errors
///
/// Returns `WebhookError::InvalidSignature` if the key is rejected.
pub fn sign_webhook(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, WebhookError> {
    let ts = timestamp.to_string();
    let mac = hmac_sha256(secret.as_bytes(), &[ts.as_bytes(), b".", body])?;
    Ok(format!("t={ts},v1={}", hex::encode(mac)))
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: JsonValue,
}

/// Normalize a Stripe event.
///
/// # Errors
///
/// Returns `WebhookError::Malformed` if the envelope is not a Stripe event.
pub fn parse_event(payload: &JsonValue) -> Result<PaymentEvent, WebhookError> {
    let event: StripeEvent = serde_json::from_value(payload.clone())
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;
    let object = &event.data.object;

    let kind = match event.event_type.as_str() {
        "payment_intent.succeeded" | "checkout.session.async_payment_succeeded" => {
            PaymentEventKind::Succeeded
        }
        "checkout.session.completed" => {
            match object.get("payment_status").and_then(JsonValue::as_str) {
                Some("paid" | "no_payment_required") => PaymentEventKind::Succeeded,
                _ => PaymentEventKind::Processing,
            }
        }
        "payment_intent.processing" => PaymentEventKind::Processing,
        "checkout.session.async_payment_failed" => PaymentEventKind::Failed,
        "payment_intent.canceled" | "checkout.session.expired" => PaymentEventKind::Cancelled,
        _ => PaymentEventKind::Ignored,
    };

    let transaction_id = object
        .get("id")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let order_id = object
        .pointer("/metadata/order_id")
        .or_else(|| object.get("client_reference_id"))
        .and_then(JsonValue::as_str)
        .and_then(|raw| raw.parse::<OrderId>().ok());

    Ok(PaymentEvent {
        event_id: event.id,
        provider: Provider::Stripe,
        event_type: event.event_type,
        kind,
        transaction_id,
        order_id,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "whsec_test_aB3xY9mK2nL5pQ7rT0uW4zC6";

    #[test]
    fn test_verify_valid_signature() {
        let body = br#"{"id":"evt_1"}"#;
        let header = sign_webhook(SECRET, 1_700_000_000, body).unwrap();
        let secret = SecretString::from(SECRET);
        assert!(verify_webhook(&secret, &header, body, 1_700_000_010).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_body() {
        let header = sign_webhook(SECRET, 1_700_000_000, br#"{"id":"evt_1"}"#).unwrap();
        let secret = SecretString::from(SECRET);
        let result = verify_webhook(&secret, &header, br#"{"id":"evt_2"}"#, 1_700_000_000);
        assert!(matches!(result, Err(WebhookError::InvalidSignature(_))));
    }

    #[test]
    fn test_verify_rejects_stale_timestamp() {
        let body = b"{}";
        let header = sign_webhook(SECRET, 1_700_000_000, body).unwrap();
        let secret = SecretString::from(SECRET);
        let result = verify_webhook(&secret, &header, body, 1_700_000_000 + 301);
        assert!(result.is_err());
    }

    #[test]
    fn test_verify_accepts_any_matching_v1() {
        let body = b"{}";
        let valid = sign_webhook(SECRET, 1_700_000_000, body).unwrap();
        let v1 = valid.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v1={v1}");
        let secret = SecretString::from(SECRET);
        assert!(verify_webhook(&secret, &header, body, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_verify_rejects_header_without_timestamp() {
        let secret = SecretString::from(SECRET);
        assert!(verify_webhook(&secret, "v1=abc", b"{}", 0).is_err());
    }

    #[test]
    fn test_parse_payment_intent_succeeded() {
        let order_id = OrderId::random();
        let payload = json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1", "metadata": {"order_id": order_id.to_string()}}}
        });
        let event = parse_event(&payload).unwrap();
        assert_eq!(event.kind, PaymentEventKind::Succeeded);
        assert_eq!(event.transaction_id.as_deref(), Some("pi_1"));
        assert_eq!(event.order_id, Some(order_id));
    }

    #[test]
    fn test_parse_completed_session_depends_on_payment_status() {
        let unpaid = json!({
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "payment_status": "unpaid"}}
        });
        assert_eq!(
            parse_event(&unpaid).unwrap().kind,
            PaymentEventKind::Processing
        );

        let paid = json!({
            "id": "evt_3",
            "type": "checkout.session.completed",
            "data": {"object": {"id": "cs_1", "payment_status": "paid"}}
        });
        assert_eq!(parse_event(&paid).unwrap().kind, PaymentEventKind::Succeeded);
    }

    #[test]
    fn test_parse_maps_failure_and_cancellation() {
        let cases = [
            ("checkout.session.async_payment_failed", PaymentEventKind::Failed),
            ("payment_intent.canceled", PaymentEventKind::Cancelled),
            ("checkout.session.expired", PaymentEventKind::Cancelled),
            ("payment_intent.processing", PaymentEventKind::Processing),
            ("customer.created", PaymentEventKind::Ignored),
        ];
        for (event_type, kind) in cases {
            let payload = json!({
                "id": "evt",
                "type": event_type,
                "data": {"object": {"id": "x"}}
            });
            assert_eq!(parse_event(&payload).unwrap().kind, kind, "{event_type}");
        }
    }

    #[test]
    fn test_parse_rejects_non_event() {
        assert!(matches!(
            parse_event(&json!({"hello": "world"})),
            Err(WebhookError::Malformed(_))
        ));
    }

    #[test]
    fn test_state_mappings() {
        assert_eq!(payment_intent_state("succeeded"), ProviderPaymentState::Succeeded);
        assert_eq!(payment_intent_state("requires_action"), ProviderPaymentState::InFlight);
        assert_eq!(payment_intent_state("canceled"), ProviderPaymentState::Canceled);
        assert_eq!(
            checkout_session_state(Some("expired"), Some("unpaid")),
            ProviderPaymentState::Canceled
        );
        assert_eq!(
            checkout_session_state(Some("complete"), Some("paid")),
            ProviderPaymentState::Succeeded
        );
        assert_eq!(
            checkout_session_state(Some("open"), Some("unpaid")),
            ProviderPaymentState::InFlight
        );
    }
}
