//! Payment provider clients.
//!
//! Each provider implements [`PaymentGateway`]. The router and reconciler pick
//! one through [`Gateways`] by the order's provider of record.
//!
//! - [`stripe`] - Payment Intents (embedded form) and Checkout Sessions (hosted)
//! - [`yampi`] - Hosted payment links
//! - [`signature`] - Webhook HMAC verification shared by both
//! - `fake` - Scripted gateway for tests (`test-support` feature)

pub mod signature;
pub mod stripe;
pub mod yampi;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use pagora_core::{OrderId, PaymentRoute, Price, Provider};

use crate::config::CheckoutConfig;

pub use signature::WebhookError;

/// Errors from payment provider calls.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {body}")]
    Response { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    Decode(String),

    #[error("invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("{0} is not configured")]
    NotConfigured(Provider),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Request("timed out".to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

/// What the router asks a provider to create.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub order_id: OrderId,
    pub route: PaymentRoute,
    pub amount: Price,
    pub customer_email: Option<String>,
    /// Where hosted pages send the buyer after paying.
    pub success_url: String,
    /// Where hosted pages send the buyer after giving up.
    pub cancel_url: String,
    /// Sent to providers that dedupe creation requests.
    pub idempotency_key: String,
}

impl SessionRequest {
    /// Provider idempotency key for an order's payment session at `amount`.
    ///
    /// A resumed order can be repriced, and providers reject a reused key whose
    /// parameters changed, so the amount is part of the key.
    #[must_use]
    pub fn idempotency_key_for(order_id: OrderId, amount: Price) -> String {
        let minor = amount
            .minor_units()
            .map_or_else(|| amount.amount.normalize().to_string(), |m| m.to_string());
        format!(
            "pagora-order-{order_id}-{minor}{}",
            amount.currency_code.as_lower()
        )
    }
}

/// A provider charge or hosted session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSession {
    /// Provider reference attached to the order.
    pub transaction_id: String,
    /// Secret for rendering an embedded payment form.
    pub client_secret: Option<String>,
    /// Hosted payment page.
    pub redirect_url: Option<String>,
}

/// Payment outcome as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderPaymentState {
    Succeeded,
    /// Still awaiting the buyer or the payment network.
    InFlight,
    Failed,
    Canceled,
}

/// A payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> Provider;

    /// Create a charge or hosted session for an order.
    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError>;

    /// Fetch an existing session so it can be handed back to the client.
    async fn retrieve_session(
        &self,
        route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Current payment state of a session.
    async fn payment_state(
        &self,
        route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderPaymentState, ProviderError>;
}

/// The configured gateways, one per provider.
#[derive(Clone, Default)]
pub struct Gateways {
    stripe: Option<Arc<dyn PaymentGateway>>,
    yampi: Option<Arc<dyn PaymentGateway>>,
}

impl Gateways {
    /// Build HTTP gateways for every provider with credentials.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Request` if an HTTP client cannot be built.
    pub fn from_config(config: &CheckoutConfig) -> Result<Self, ProviderError> {
        let timeout = config.policy.provider_timeout;
        let mut gateways = Self::default();
        if let Some(stripe) = &config.stripe {
            gateways = gateways.with(Arc::new(stripe::StripeGateway::new(stripe, timeout)?));
        }
        if let Some(yampi) = &config.yampi {
            gateways = gateways.with(Arc::new(yampi::YampiGateway::new(yampi, timeout)?));
        }
        Ok(gateways)
    }

    /// Register a gateway under its own provider.
    #[must_use]
    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        match gateway.provider() {
            Provider::Stripe => self.stripe = Some(gateway),
            Provider::Yampi => self.yampi = Some(gateway),
        }
        self
    }

    /// Gateway for a provider.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::NotConfigured` if the provider has no credentials.
    pub fn get(&self, provider: Provider) -> Result<Arc<dyn PaymentGateway>, ProviderError> {
        let gateway = match provider {
            Provider::Stripe => self.stripe.as_ref(),
            Provider::Yampi => self.yampi.as_ref(),
        };
        gateway
            .cloned()
            .ok_or(ProviderError::NotConfigured(provider))
    }
}

/// Build a `reqwest` client with the per-call provider timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("pagora-checkout/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Request(e.to_string()))
}

/// Decode a JSON response, turning non-2xx statuses into `ProviderError::Response`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::Response {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use pagora_core::CurrencyCode;
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn test_idempotency_key_tracks_amount() {
        let order_id = OrderId::random();
        let brl = |cents| Price::new(Decimal::new(cents, 2), CurrencyCode::BRL);

        let key = SessionRequest::idempotency_key_for(order_id, brl(6000));
        assert_eq!(key, format!("pagora-order-{order_id}-6000brl"));
        assert_eq!(key, SessionRequest::idempotency_key_for(order_id, brl(6000)));
        assert_ne!(key, SessionRequest::idempotency_key_for(order_id, brl(16000)));
        assert_ne!(
            key,
            SessionRequest::idempotency_key_for(
                order_id,
                Price::new(Decimal::new(6000, 2), CurrencyCode::USD)
            )
        );
    }
}
