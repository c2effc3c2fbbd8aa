//! Integration test helpers for Pagora checkout.
//!
//! Tests drive the complete axum application (middleware included) with
//! `tower::ServiceExt::oneshot`, backed by the in-memory store and scripted
//! payment gateways from `pagora-checkout`'s `test-support` feature.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pagora-integration-tests
//!
//! # Postgres-backed tests (need a migrated database)
//! CHECKOUT_DATABASE_URL=postgres://... cargo test -p pagora-integration-tests -- --ignored
//! ```

#![allow(clippy::missing_panics_doc)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

use pagora_checkout::gateway::{stripe, yampi};
use pagora_checkout::testing::{SERVICE_TOKEN, STRIPE_WEBHOOK_SECRET, TestApp, YAMPI_WEBHOOK_SECRET};
use pagora_core::{CartId, VariantId};

pub use pagora_checkout::testing;

/// A response with its body decoded as JSON (`Value::Null` when empty or not JSON).
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Send one request through a fresh clone of the app.
pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router is infallible");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    TestResponse {
        status,
        headers,
        body,
    }
}

/// `POST` a JSON body from a client address.
pub fn post_json(path: &str, body: &Value, client_ip: &str) -> Request<Body> {
    Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", client_ip)
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

/// `POST` a JSON body with the service token.
pub fn post_internal(path: &str, body: &Value) -> Request<Body> {
    Request::post(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {SERVICE_TOKEN}"))
        .body(Body::from(body.to_string()))
        .expect("valid request")
}

/// `GET` with the service token.
pub fn get_internal(path: &str) -> Request<Body> {
    Request::get(path)
        .header(header::AUTHORIZATION, format!("Bearer {SERVICE_TOKEN}"))
        .body(Body::empty())
        .expect("valid request")
}

/// A Stripe delivery signed with the test secret.
pub fn stripe_webhook(payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    let signature = stripe::sign_webhook(
        STRIPE_WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
        body.as_bytes(),
    )
    .expect("sign");
    Request::post("/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(body))
        .expect("valid request")
}

/// A Yampi delivery signed with the test secret.
pub fn yampi_webhook(payload: &Value) -> Request<Body> {
    let body = payload.to_string();
    let signature = yampi::sign_webhook(YAMPI_WEBHOOK_SECRET, body.as_bytes()).expect("sign");
    Request::post("/webhooks/yampi")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-yampi-hmac-sha256", signature)
        .body(Body::from(body))
        .expect("valid request")
}

/// A cart of one variant priced at 50.00 with 10.00 shipping, seeded into the store.
pub struct Cart {
    pub cart_id: CartId,
    pub variant_id: VariantId,
    pub quantity: i32,
}

impl Cart {
    pub const UNIT_PRICE: Decimal = Decimal::from_parts(5000, 0, 0, false, 2);
    pub const SHIPPING: Decimal = Decimal::from_parts(1000, 0, 0, false, 2);

    /// Seed a variant with `stock` units and build a cart buying `quantity`.
    pub fn seed(app: &TestApp, stock: i32, quantity: i32) -> Self {
        let variant_id = VariantId::random();
        app.store.put_variant(variant_id, Self::UNIT_PRICE, stock);
        Self {
            cart_id: CartId::random(),
            variant_id,
            quantity,
        }
    }

    /// Server total for this cart.
    pub fn total(&self) -> Decimal {
        Self::UNIT_PRICE * Decimal::from(self.quantity) + Self::SHIPPING
    }

    /// Router body with the correct total.
    pub fn start(&self, request_id: &str) -> Value {
        self.start_with_total(request_id, self.total())
    }

    pub fn start_with_total(&self, request_id: &str, total: Decimal) -> Value {
        json!({
            "route": "start",
            "request_id": request_id,
            "cart_id": self.cart_id,
            "items": [{
                "variant_id": self.variant_id,
                "quantity": self.quantity,
                "unit_price": "0.01"
            }],
            "subtotal": (Self::UNIT_PRICE * Decimal::from(self.quantity)).to_string(),
            "discount_amount": "0",
            "shipping_cost": Self::SHIPPING.to_string(),
            "total_amount": total.to_string(),
            "customer": {"name": "Ana Souza", "email": "ana@loja.example", "phone": "+5511999990000"}
        })
    }
}
