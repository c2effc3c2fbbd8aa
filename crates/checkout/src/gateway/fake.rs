//! Scripted [`PaymentGateway`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use pagora_core::{PaymentRoute, Price, Provider};

use super::{
    PaymentGateway, ProviderError, ProviderPaymentState, ProviderSession, SessionRequest,
};

/// Gateway that records calls and answers from a script.
///
/// Transaction ids are derived from the request's idempotency key, so repeated
/// creates for one order return the same session, as the real providers do.
/// Like Stripe, a key reused with a different amount is rejected.
pub struct ScriptedGateway {
    provider: Provider,
    creates: AtomicUsize,
    retrievals: AtomicUsize,
    state_queries: AtomicUsize,
    fail_creates: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    state: Mutex<ProviderPaymentState>,
    transaction_override: Mutex<Option<String>>,
    seen_keys: Mutex<HashMap<String, Price>>,
}

impl ScriptedGateway {
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            creates: AtomicUsize::new(0),
            retrievals: AtomicUsize::new(0),
            state_queries: AtomicUsize::new(0),
            fail_creates: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            state: Mutex::new(ProviderPaymentState::InFlight),
            transaction_override: Mutex::new(None),
            seen_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Number of `create_session` calls so far.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn retrieve_calls(&self) -> usize {
        self.retrievals.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn state_calls(&self) -> usize {
        self.state_queries.load(Ordering::SeqCst)
    }

    /// Make `create_session` fail with a provider error.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Delay every `create_session` call.
    pub fn delay_creates(&self, delay: Duration) {
        *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// State reported by `payment_state`.
    pub fn set_state(&self, state: ProviderPaymentState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Use this transaction id for the next session instead of a derived one.
    pub fn next_transaction_id(&self, id: impl Into<String>) {
        *self
            .transaction_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id.into());
    }

    fn prefix(&self) -> &'static str {
        match self.provider {
            Provider::Stripe => "pi",
            Provider::Yampi => "link",
        }
    }

    fn session(transaction_id: String) -> ProviderSession {
        ProviderSession {
            client_secret: Some(format!("{transaction_id}_secret")),
            redirect_url: Some(format!("https://pay.example.test/{transaction_id}")),
            transaction_id,
        }
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn create_session(
        &self,
        request: &SessionRequest,
    ) -> Result<ProviderSession, ProviderError> {
        self.creates.fetch_add(1, Ordering::SeqCst);

        let delay = *self
            .create_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut seen = self.seen_keys.lock().unwrap_or_else(PoisonError::into_inner);
            let amount = *seen
                .entry(request.idempotency_key.clone())
                .or_insert(request.amount);
            if amount != request.amount {
                return Err(ProviderError::Response {
                    status: 400,
                    body: "idempotency key reused with different parameters".to_string(),
                });
            }
        }

        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(ProviderError::Response {
                status: 500,
                body: "scripted failure".to_string(),
            });
        }

        let transaction_id = self
            .transaction_override
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .unwrap_or_else(|| format!("{}_{}", self.prefix(), request.idempotency_key));
        Ok(Self::session(transaction_id))
    }

    async fn retrieve_session(
        &self,
        _route: PaymentRoute,
        transaction_id: &str,
    ) -> Result<ProviderSession, ProviderError> {
        self.retrievals.fetch_add(1, Ordering::SeqCst);
        Ok(Self::session(transaction_id.to_string()))
    }

    async fn payment_state(
        &self,
        _route: PaymentRoute,
        _transaction_id: &str,
    ) -> Result<ProviderPaymentState, ProviderError> {
        self.state_queries.fetch_add(1, Ordering::SeqCst);
        Ok(*self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
