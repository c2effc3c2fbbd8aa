//! HTTP route handlers for checkout.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                                 - Liveness
//! GET  /health/ready                           - Database readiness
//!
//! # Checkout
//! POST /checkout/router                        - Start or resume a payment
//! POST /checkout/reconcile                     - Settle one order (service token)
//!
//! # Webhooks (signature verified)
//! POST /webhooks/stripe                        - Stripe events
//! POST /webhooks/yampi                         - Yampi events
//!
//! # Internal (service token)
//! POST /internal/webhooks/reprocess            - Re-apply a recorded event
//! POST /internal/reservations/release-expired  - Sweep expired stock holds
//! GET  /internal/orders/stale                  - Pending orders to reconcile
//! GET  /internal/checkout-settings             - Current provider settings
//! PUT  /internal/checkout-settings             - Change provider settings
//! ```

pub mod checkout;
pub mod health;
pub mod internal;
pub mod webhooks;

use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, header},
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Create the checkout routes router.
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/router", post(checkout::router))
        .route("/reconcile", post(checkout::reconcile))
}

/// Create the webhook routes router.
pub fn webhook_routes() -> Router<AppState> {
    Router::new()
        .route("/stripe", post(webhooks::stripe))
        .route("/yampi", post(webhooks::yampi))
}

/// Create the internal routes router.
pub fn internal_routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/reprocess", post(webhooks::reprocess))
        .route(
            "/reservations/release-expired",
            post(internal::release_expired),
        )
        .route("/orders/stale", get(internal::stale_orders))
        .route(
            "/checkout-settings",
            get(internal::get_settings).put(internal::put_settings),
        )
}

/// Create all routes for the checkout service.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
        .nest("/checkout", checkout_routes())
        .nest("/webhooks", webhook_routes())
        .nest("/internal", internal_routes())
}

/// The complete application: routes, state and the middleware stack.
pub fn app(state: AppState) -> Router {
    routes()
        .with_state(state)
        // Responses carry client secrets and order tokens
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = tracing::field::Empty,
                )
            }),
        )
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}
