//! Test fixtures: configuration and a fully wired in-memory application.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use secrecy::SecretString;

use pagora_core::Provider;

use crate::config::{CheckoutConfig, CheckoutPolicy, StripeConfig, YampiConfig};
use crate::db::memory::MemoryStore;
use crate::gateway::Gateways;
use crate::gateway::fake::ScriptedGateway;
use crate::state::AppState;

pub const SERVICE_TOKEN: &str = "svc_test_4f9c2a7b1e8d6c3f0a5b9e2d7c4f1a8b";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_8e1f4c7a2d9b6e3f0c5a8d1b4e7f2a9c";
pub const YAMPI_WEBHOOK_SECRET: &str = "yampi_test_3c6f9a2e5b8d1f4a7c0e3b6d9f2a5c8e";

/// Configuration with both providers enabled and short webhook retries.
#[must_use]
pub fn test_config() -> CheckoutConfig {
    CheckoutConfig {
        database_url: SecretString::from("postgres://localhost/pagora_test"),
        host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        base_url: "https://shop.example.test".to_string(),
        service_token: SecretString::from(SERVICE_TOKEN),
        currency: pagora_core::CurrencyCode::BRL,
        policy: CheckoutPolicy {
            webhook_retry_base: Duration::from_millis(1),
            ..CheckoutPolicy::default()
        },
        stripe: Some(StripeConfig {
            secret_key: SecretString::from("sk_test_unused"),
            webhook_secret: SecretString::from(STRIPE_WEBHOOK_SECRET),
            api_base: "http://127.0.0.1:9".to_string(),
        }),
        yampi: Some(YampiConfig {
            alias: "loja-teste".to_string(),
            user_token: SecretString::from("unused"),
            secret_key: SecretString::from("unused"),
            webhook_secret: SecretString::from(YAMPI_WEBHOOK_SECRET),
            api_base: "http://127.0.0.1:9".to_string(),
        }),
        sentry_dsn: None,
        sentry_environment: None,
    }
}

/// In-memory application with scripted providers.
pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub stripe: Arc<ScriptedGateway>,
    pub yampi: Arc<ScriptedGateway>,
}

impl TestApp {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    #[must_use]
    pub fn with_config(config: CheckoutConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let stripe = Arc::new(ScriptedGateway::new(Provider::Stripe));
        let yampi = Arc::new(ScriptedGateway::new(Provider::Yampi));
        let gateways = Gateways::default()
            .with(Arc::clone(&stripe) as Arc<_>)
            .with(Arc::clone(&yampi) as Arc<_>);
        let state = AppState::new(config, Arc::clone(&store) as Arc<_>, gateways);

        Self {
            state,
            store,
            stripe,
            yampi,
        }
    }

    /// The full router, middleware included.
    #[must_use]
    pub fn router(&self) -> Router {
        crate::routes::app(self.state.clone())
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}
