//! Checkout router.
//!
//! Turns a cart into a payment session on the configured provider:
//! validate, rate-limit, dedupe by `request_id`, reprice on the server,
//! reserve stock and open the order, then create (or reuse) the provider
//! session and tell the client whether to render or redirect.
//!
//! An existing session is only handed back while its order still matches the
//! repriced cart. A pending order whose cart changed is cancelled (releasing
//! its holds) and replaced by a new one.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{Span, debug, info, instrument, warn};

use pagora_core::{CartId, OrderStatus, PaymentRoute, Price, UserId, totals_agree};

use crate::config::CheckoutConfig;
use crate::db::{AttachOutcome, CheckoutStore};
use crate::error::{AppError, add_breadcrumb};
use crate::gateway::{Gateways, ProviderPaymentState, ProviderSession, SessionRequest};
use crate::models::{Coupon, Customer, Order, OrderDraft, RouterItem, RouterRequest, RouterResponse};
use crate::services::idempotency::IdempotencyCache;
use crate::services::pricing::{self, PricedCart};
use crate::services::rate_limit::{CheckoutRateLimiter, retry_after_secs};
use crate::state::AppState;

/// The only router action clients may request.
pub const START_ROUTE: &str = "start";

const MAX_REQUEST_ID_LEN: usize = 128;
const MAX_LINES: usize = 100;
const MAX_LINE_QUANTITY: i32 = 100;
const ACCESS_TOKEN_BYTES: usize = 32;

/// A router request that passed validation.
#[derive(Debug, Clone)]
struct StartRequest {
    request_id: String,
    cart_id: CartId,
    items: Vec<RouterItem>,
    shipping_cost: Decimal,
    client_total: Decimal,
    coupon_code: Option<String>,
    customer: Option<Customer>,
    shipping: Option<JsonValue>,
    attribution: Option<JsonValue>,
    access_token: Option<String>,
    user_id: Option<UserId>,
}

/// Checkout router service.
pub struct CheckoutRouter<'a> {
    config: &'a CheckoutConfig,
    store: &'a dyn CheckoutStore,
    gateways: &'a Gateways,
    limiter: &'a CheckoutRateLimiter,
    idempotency: &'a IdempotencyCache,
}

impl<'a> CheckoutRouter<'a> {
    #[must_use]
    pub fn new(state: &'a AppState) -> Self {
        Self {
            config: state.config(),
            store: state.store(),
            gateways: state.gateways(),
            limiter: state.limiter(),
            idempotency: state.idempotency(),
        }
    }

    /// Handle a router request from `client_ip`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::BadRequest` for invalid input, `RateLimited` when the
    /// cart is over its limit, `PriceMismatch` when the client total is off,
    /// `Timeout` when the checkout exceeds its time budget, and any store or
    /// provider failure.
    #[instrument(
        skip(self, request),
        fields(request_id = %request.request_id, cart_id = tracing::field::Empty)
    )]
    pub async fn route(
        &self,
        request: RouterRequest,
        client_ip: &str,
    ) -> Result<RouterResponse, AppError> {
        if request.route != START_ROUTE {
            return Err(AppError::BadRequest(format!(
                "unsupported route: {}",
                request.route
            )));
        }
        let start = validate(request)?;
        Span::current().record("cart_id", tracing::field::display(start.cart_id));

        if let Err(wait) = self.limiter.check(start.cart_id, client_ip) {
            let retry_after = retry_after_secs(wait);
            info!(decision = "rate_limited", retry_after, "Router request rate limited");
            return Err(AppError::RateLimited { retry_after });
        }

        let request_id = start.request_id.clone();
        let cart_id = start.cart_id;
        let budget = self.config.policy.router_timeout;
        self.idempotency
            .run(self.store, cart_id, &request_id, async move {
                tokio::time::timeout(budget, self.start(start))
                    .await
                    .unwrap_or_else(|_| {
                        warn!(budget_secs = budget.as_secs(), "Checkout exceeded its time budget");
                        Err(AppError::Timeout)
                    })
            })
            .await
    }

    // =========================================================================
    // Start
    // =========================================================================

    async fn start(&self, start: StartRequest) -> Result<RouterResponse, AppError> {
        let (priced, coupon) = self.price(&start).await?;
        if !totals_agree(start.client_total, priced.total) {
            info!(
                decision = "price_mismatch",
                client_total = %start.client_total,
                server_total = %priced.total,
                "Client total rejected"
            );
            let client_total = start.client_total.to_string();
            let server_total = priced.total.to_string();
            add_breadcrumb(
                "checkout",
                "price mismatch",
                Some(&[
                    ("client_total", client_total.as_str()),
                    ("server_total", server_total.as_str()),
                ]),
            );
            return Err(AppError::PriceMismatch {
                client: start.client_total,
                server: priced.total,
            });
        }

        // Settings are read once per request and threaded through.
        let settings = self.store.checkout_settings().await?;
        let route = PaymentRoute::try_from(settings)
            .map_err(|e| AppError::Internal(format!("checkout settings: {e}")))?;

        let existing = self.resume_candidate(&start).await?;
        let resume = match existing {
            Some(order) if order.already_charged() => {
                if self.matches_cart(&order, &priced, route).await? {
                    info!(order_id = %order.id, status = %order.status, decision = "already_charged", "Reusing existing payment session");
                    return self.existing_session(&order).await;
                }
                self.supersede(&order, &start.request_id).await?;
                None
            }
            Some(order) if order.is_open() => Some(order.id),
            Some(order) if order.request_id == start.request_id => {
                return Err(AppError::Conflict(format!(
                    "order {} for this request is {}",
                    order.id, order.status
                )));
            }
            _ => None,
        };

        let gateway = self.gateways.get(route.provider())?;

        let draft = OrderDraft {
            resume,
            request_id: start.request_id,
            cart_id: start.cart_id,
            user_id: start.user_id,
            route,
            currency: self.config.currency,
            lines: priced.lines,
            subtotal: priced.lines_total,
            discount_amount: priced.discount,
            shipping_cost: priced.shipping,
            total_amount: priced.total,
            access_token: new_access_token(),
            customer: start.customer,
            shipping: start.shipping,
            attribution: start.attribution,
            coupon_code: coupon.map(|c| c.code),
            reservation_ttl: chrono::Duration::from_std(self.config.policy.reservation_ttl)
                .unwrap_or(chrono::Duration::minutes(15)),
        };
        let order = self.store.open_order(&draft).await?;
        info!(order_id = %order.id, resumed = resume.is_some(), provider = %route.provider(), "Order opened");

        let base = self.config.base_url.trim_end_matches('/');
        let session_request = SessionRequest {
            order_id: order.id,
            route,
            amount: Price::new(order.total_amount, order.currency),
            customer_email: order
                .customer
                .as_ref()
                .and_then(|c| c.email.as_ref())
                .map(|e| e.as_str().to_string()),
            success_url: format!("{base}/checkout/success?order_id={}", order.id),
            cancel_url: format!("{base}/cart"),
            idempotency_key: SessionRequest::idempotency_key_for(
                order.id,
                Price::new(order.total_amount, order.currency),
            ),
        };
        let session = gateway.create_session(&session_request).await?;

        match self
            .store
            .attach_transaction(order.id, &session.transaction_id, session.redirect_url.as_deref())
            .await?
        {
            AttachOutcome::Attached(order) => Ok(respond(&order, session)),
            AttachOutcome::AlreadyAttached(current)
                if current.transaction_id.as_deref() == Some(session.transaction_id.as_str()) =>
            {
                Ok(respond(&current, session))
            }
            AttachOutcome::AlreadyAttached(current) => {
                debug!(order_id = %current.id, "Another request attached a session first");
                self.existing_session(&current).await
            }
        }
    }

    /// Catalog prices and the coupon, if one was submitted.
    async fn price(&self, start: &StartRequest) -> Result<(PricedCart, Option<Coupon>), AppError> {
        let ids: Vec<_> = start.items.iter().map(|item| item.variant_id).collect();
        let variants = self.store.variant_prices(&ids).await?;

        let coupon = match &start.coupon_code {
            Some(code) => Some(
                self.store
                    .coupon(code)
                    .await?
                    .filter(|c| c.active)
                    .ok_or_else(|| AppError::BadRequest(format!("coupon {code} is not valid")))?,
            ),
            None => None,
        };

        let priced = pricing::price_cart(&start.items, &variants, coupon.as_ref(), start.shipping_cost)
            .map_err(|e| AppError::NotFound(e.to_string()))?;
        Ok((priced, coupon))
    }

    /// The order this request continues, if any.
    async fn resume_candidate(&self, start: &StartRequest) -> Result<Option<Order>, AppError> {
        if let Some(order) = self.store.order_by_request_id(&start.request_id).await? {
            if order.cart_id != start.cart_id {
                return Err(AppError::Conflict(
                    "request_id was already used by another cart".to_string(),
                ));
            }
            return Ok(Some(order));
        }

        if let Some(token) = &start.access_token {
            let order = self
                .store
                .order_by_access_token(token)
                .await?
                .filter(|o| o.cart_id == start.cart_id)
                .ok_or_else(|| AppError::NotFound("order not found for this cart".to_string()))?;
            return Ok(Some(order));
        }

        Ok(self
            .store
            .latest_pending_order(start.cart_id, start.user_id)
            .await?)
    }

    /// Whether `order` was opened for exactly this priced cart and route.
    async fn matches_cart(
        &self,
        order: &Order,
        priced: &PricedCart,
        route: PaymentRoute,
    ) -> Result<bool, AppError> {
        if order.total_amount != priced.total
            || order.currency != self.config.currency
            || order.route != route
        {
            return Ok(false);
        }
        let lines = self.store.order_lines(order.id).await?;
        Ok(lines.len() == priced.lines.len() && priced.lines.iter().all(|l| lines.contains(l)))
    }

    /// Cancel a pending order whose cart changed after its session was created.
    ///
    /// Refused when the order was already charged, when the provider reports
    /// the old session as paid, or when the same `request_id` is being reused
    /// for a different cart body.
    async fn supersede(&self, order: &Order, request_id: &str) -> Result<(), AppError> {
        let conflict = || {
            AppError::Conflict(format!(
                "order {} is already {} for a different cart",
                order.id, order.status
            ))
        };
        if order.status != OrderStatus::Pending || order.request_id == request_id {
            return Err(conflict());
        }

        if let Some(transaction_id) = order.transaction_id.as_deref() {
            let gateway = self.gateways.get(order.route.provider())?;
            let state = gateway.payment_state(order.route, transaction_id).await?;
            if state == ProviderPaymentState::Succeeded {
                info!(order_id = %order.id, decision = "already_paid", "Changed cart arrived after payment");
                return Err(conflict());
            }
        }

        self.store
            .transition_order(order.id, &[OrderStatus::Pending], OrderStatus::Cancelled)
            .await?
            .ok_or_else(conflict)?;
        info!(order_id = %order.id, decision = "superseded", "Cart changed; previous order cancelled");
        Ok(())
    }

    /// Hand back the session already attached to `order` without creating one.
    async fn existing_session(&self, order: &Order) -> Result<RouterResponse, AppError> {
        let Some(transaction_id) = order
            .transaction_id
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        else {
            return Err(AppError::Conflict(format!(
                "order {} is already {}",
                order.id, order.status
            )));
        };

        let gateway = self.gateways.get(order.route.provider())?;
        let session = gateway
            .retrieve_session(order.route, transaction_id)
            .await?;
        Ok(respond(order, session).with_message("Payment already started for this order"))
    }
}

fn respond(order: &Order, session: ProviderSession) -> RouterResponse {
    RouterResponse::for_route(
        order.route,
        order.id,
        &order.access_token,
        session.client_secret,
        session.redirect_url.or_else(|| order.checkout_url.clone()),
    )
}

/// Random bearer token letting a buyer resume their order.
fn new_access_token() -> String {
    let mut bytes = [0u8; ACCESS_TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// Validation
// =============================================================================

fn validate(request: RouterRequest) -> Result<StartRequest, AppError> {
    let bad = |msg: &str| AppError::BadRequest(msg.to_string());

    let request_id = request.request_id.trim().to_string();
    if request_id.is_empty() {
        return Err(bad("request_id is required"));
    }
    if request_id.len() > MAX_REQUEST_ID_LEN {
        return Err(bad("request_id is too long"));
    }

    let cart_id = request.cart_id.ok_or_else(|| bad("cart_id is required"))?;

    if request.items.is_empty() {
        return Err(bad("cart is empty"));
    }
    if request.items.len() > MAX_LINES {
        return Err(bad("too many cart lines"));
    }
    for (index, item) in request.items.iter().enumerate() {
        if !(1..=MAX_LINE_QUANTITY).contains(&item.quantity) {
            return Err(AppError::BadRequest(format!(
                "quantity for variant {} must be between 1 and {MAX_LINE_QUANTITY}",
                item.variant_id
            )));
        }
        if request
            .items
            .iter()
            .take(index)
            .any(|other| other.variant_id == item.variant_id)
        {
            return Err(AppError::BadRequest(format!(
                "variant {} appears more than once",
                item.variant_id
            )));
        }
    }

    let amount = |value: Option<Decimal>, name: &str| match value {
        Some(v) if v < Decimal::ZERO => {
            Err(AppError::BadRequest(format!("{name} must not be negative")))
        }
        Some(v) => Ok(v),
        None => Err(AppError::BadRequest(format!("{name} is required"))),
    };
    amount(request.subtotal, "subtotal")?;
    amount(Some(request.discount_amount.unwrap_or_default()), "discount_amount")?;
    let shipping_cost = amount(request.shipping_cost, "shipping_cost")?;
    let client_total = amount(request.total_amount, "total_amount")?;

    let coupon_code = request
        .coupon_code
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());
    let access_token = request
        .order_access_token
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(StartRequest {
        request_id,
        cart_id,
        items: request.items,
        shipping_cost,
        client_total,
        coupon_code,
        customer: request.customer,
        shipping: request.shipping,
        attribution: request.attribution,
        access_token,
        user_id: request.user_id,
    })
}
