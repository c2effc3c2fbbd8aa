//! End-to-end tests for `POST /checkout/router`.
//!
//! Run with: `cargo test -p pagora-integration-tests --test checkout_router`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use axum::http::{StatusCode, header};
use rust_decimal::Decimal;
use serde_json::json;

use pagora_checkout::config::CheckoutPolicy;
use pagora_checkout::db::CheckoutStore;
use pagora_checkout::gateway::ProviderPaymentState;
use pagora_checkout::testing::{TestApp, test_config};
use pagora_core::{OrderId, OrderStatus, VariantId};
use pagora_integration_tests::{Cart, post_json, send};

const CLIENT: &str = "203.0.113.7";

fn order_id(body: &serde_json::Value) -> OrderId {
    body["order_id"].as_str().expect("order_id").parse().unwrap()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_start_renders_stripe_payment_element() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 2);

    let response = send(&router, post_json("/checkout/router", &cart.start("req-render"), CLIENT)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["success"], true);
    assert_eq!(response.body["provider"], "stripe");
    assert_eq!(response.body["channel"], "internal");
    assert_eq!(response.body["action"], "render");
    assert!(response.body["client_secret"].as_str().unwrap().ends_with("_secret"));
    assert!(response.body.get("redirect_url").is_none());
    assert_eq!(response.body["order_access_token"].as_str().unwrap().len(), 43);

    let order = app.store.order(order_id(&response.body)).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, cart.total());
    assert!(order.transaction_id.is_some());
    assert_eq!(app.stripe.create_calls(), 1);
}

#[tokio::test]
async fn test_server_prices_override_client_unit_prices() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    let response = send(&router, post_json("/checkout/router", &cart.start("req-prices"), CLIENT)).await;
    assert_eq!(response.status, StatusCode::OK);

    let lines = app.store.order_lines(order_id(&response.body));
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].unit_price, Cart::UNIT_PRICE);
}

#[tokio::test]
async fn test_yampi_settings_redirect() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    let settings = json!({"provider": "yampi", "channel": "external", "experience": "native"});
    let request = axum::http::Request::put("/internal/checkout-settings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", pagora_checkout::testing::SERVICE_TOKEN),
        )
        .body(axum::body::Body::from(settings.to_string()))
        .unwrap();
    assert_eq!(send(&router, request).await.status, StatusCode::OK);

    let response = send(&router, post_json("/checkout/router", &cart.start("req-yampi"), CLIENT)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["provider"], "yampi");
    assert_eq!(response.body["action"], "redirect");
    assert!(
        response.body["redirect_url"]
            .as_str()
            .unwrap()
            .starts_with("https://pay.example.test/link_")
    );
    assert!(response.body.get("client_secret").is_none());
    assert_eq!(app.yampi.create_calls(), 1);
    assert_eq!(app.stripe.create_calls(), 0);
}

#[tokio::test]
async fn test_unsupported_settings_rejected() {
    let app = TestApp::new();
    let router = app.router();

    let settings = json!({"provider": "yampi", "channel": "internal", "experience": "transparent"});
    let request = axum::http::Request::put("/internal/checkout-settings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", pagora_checkout::testing::SERVICE_TOKEN),
        )
        .body(axum::body::Body::from(settings.to_string()))
        .unwrap();
    let response = send(&router, request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Idempotency
// ============================================================================

#[tokio::test]
async fn test_concurrent_duplicate_clicks_create_one_session() {
    let app = TestApp::new();
    app.stripe.delay_creates(Duration::from_millis(100));
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let body = cart.start("req-double-click");

    let (a, b, c) = tokio::join!(
        send(&router, post_json("/checkout/router", &body, CLIENT)),
        send(&router, post_json("/checkout/router", &body, CLIENT)),
        send(&router, post_json("/checkout/router", &body, CLIENT)),
    );

    assert_eq!(a.status, StatusCode::OK);
    assert_eq!(a.body, b.body);
    assert_eq!(a.body, c.body);
    assert_eq!(app.stripe.create_calls(), 1);
    assert_eq!(app.store.order_count(), 1);
}

#[tokio::test]
async fn test_repeated_request_id_replays_response() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let body = cart.start("req-replay");

    let first = send(&router, post_json("/checkout/router", &body, CLIENT)).await;
    let second = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(app.stripe.create_calls(), 1);
    assert_eq!(app.stripe.retrieve_calls(), 0);
}

#[tokio::test]
async fn test_new_request_for_same_cart_reuses_session() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    let first = send(&router, post_json("/checkout/router", &cart.start("req-a"), CLIENT)).await;
    let second = send(&router, post_json("/checkout/router", &cart.start("req-b"), CLIENT)).await;

    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(order_id(&first.body), order_id(&second.body));
    assert_eq!(second.body["message"], "Payment already started for this order");
    assert_eq!(app.stripe.create_calls(), 1);
    assert_eq!(app.stripe.retrieve_calls(), 1);
}

#[tokio::test]
async fn test_changed_cart_replaces_stale_session() {
    let app = TestApp::new();
    let router = app.router();
    let mut cart = Cart::seed(&app, 3, 1);

    let first = send(&router, post_json("/checkout/router", &cart.start("req-a"), CLIENT)).await;
    assert_eq!(first.status, StatusCode::OK);

    cart.quantity = 3;
    let second = send(&router, post_json("/checkout/router", &cart.start("req-b"), CLIENT)).await;

    assert_eq!(second.status, StatusCode::OK);
    assert!(second.body.get("message").is_none());
    assert_ne!(second.body["client_secret"], first.body["client_secret"]);
    assert_eq!(app.stripe.create_calls(), 2);

    let previous = app.store.order(order_id(&first.body)).await.unwrap().unwrap();
    assert_eq!(previous.status, OrderStatus::Cancelled);

    let current = app.store.order(order_id(&second.body)).await.unwrap().unwrap();
    assert_eq!(current.status, OrderStatus::Pending);
    assert_eq!(current.total_amount, cart.total());
    assert_eq!(app.store.order_lines(current.id)[0].quantity, 3);

    // All three units are held for the new order; the old hold is gone.
    let live: Vec<_> = app
        .store
        .cart_reservations(cart.cart_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.released_at.is_none())
        .collect();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].quantity, 3);
    assert_eq!(live[0].order_id, Some(current.id));
}

#[tokio::test]
async fn test_changed_cart_after_provider_payment_conflicts() {
    let app = TestApp::new();
    let router = app.router();
    let mut cart = Cart::seed(&app, 5, 1);

    let first = send(&router, post_json("/checkout/router", &cart.start("req-a"), CLIENT)).await;
    app.stripe.set_state(ProviderPaymentState::Succeeded);

    cart.quantity = 2;
    let second = send(&router, post_json("/checkout/router", &cart.start("req-b"), CLIENT)).await;

    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.body["error"], "conflict");
    assert!(second.body.get("client_secret").is_none());
    assert_eq!(app.stripe.create_calls(), 1);
    let order = app.store.order(order_id(&first.body)).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_request_id_from_another_cart_is_rejected() {
    let app = TestApp::new();
    let router = app.router();
    let first_cart = Cart::seed(&app, 5, 1);
    let other_cart = Cart::seed(&app, 5, 2);

    let first = send(
        &router,
        post_json("/checkout/router", &first_cart.start("req-shared"), CLIENT),
    )
    .await;
    assert_eq!(first.status, StatusCode::OK);

    let other = send(
        &router,
        post_json("/checkout/router", &other_cart.start("req-shared"), "198.51.100.20"),
    )
    .await;

    assert_eq!(other.status, StatusCode::CONFLICT);
    assert!(other.body.get("order_id").is_none());
    assert!(other.body.get("order_access_token").is_none());
    assert!(other.body.get("client_secret").is_none());
    assert_eq!(app.stripe.create_calls(), 1);
    assert_eq!(app.store.order_count(), 1);
}

#[tokio::test]
async fn test_access_token_resumes_order() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    let first = send(&router, post_json("/checkout/router", &cart.start("req-token-1"), CLIENT)).await;
    let token = first.body["order_access_token"].as_str().unwrap();

    let mut body = cart.start("req-token-2");
    body["order_access_token"] = json!(token);
    let second = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(order_id(&first.body), order_id(&second.body));
    assert_eq!(app.store.order_count(), 1);
}

#[tokio::test]
async fn test_access_token_for_other_cart_is_not_found() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let other = Cart::seed(&app, 5, 1);

    let first = send(&router, post_json("/checkout/router", &cart.start("req-owner"), CLIENT)).await;
    let token = first.body["order_access_token"].as_str().unwrap();

    let mut body = other.start("req-intruder");
    body["order_access_token"] = json!(token);
    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_provider_failure_then_retry_succeeds() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let body = cart.start("req-flaky");

    app.stripe.fail_creates(true);
    let failed = send(&router, post_json("/checkout/router", &body, CLIENT)).await;
    assert_eq!(failed.status, StatusCode::BAD_GATEWAY);
    assert_eq!(failed.body["error"], "provider_unavailable");

    app.stripe.fail_creates(false);
    let retried = send(&router, post_json("/checkout/router", &body, CLIENT)).await;
    assert_eq!(retried.status, StatusCode::OK);
    assert_eq!(app.store.order_count(), 1);
    assert_eq!(app.stripe.create_calls(), 2);
}

#[tokio::test]
async fn test_resume_after_provider_failure_with_new_quantity() {
    let app = TestApp::new();
    let router = app.router();
    let mut cart = Cart::seed(&app, 5, 1);

    app.stripe.fail_creates(true);
    let failed = send(&router, post_json("/checkout/router", &cart.start("req-one"), CLIENT)).await;
    assert_eq!(failed.status, StatusCode::BAD_GATEWAY);

    app.stripe.fail_creates(false);
    cart.quantity = 2;
    let resumed = send(&router, post_json("/checkout/router", &cart.start("req-two"), CLIENT)).await;

    assert_eq!(resumed.status, StatusCode::OK);
    assert_eq!(app.store.order_count(), 1);
    assert_eq!(app.stripe.create_calls(), 2);
    let order = app.store.order(order_id(&resumed.body)).await.unwrap().unwrap();
    assert_eq!(order.total_amount, cart.total());
    assert!(order.transaction_id.is_some());
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let mut config = test_config();
    config.policy = CheckoutPolicy {
        router_timeout: Duration::from_millis(50),
        ..config.policy
    };
    let app = TestApp::with_config(config);
    app.stripe.delay_creates(Duration::from_millis(500));
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    let response = send(&router, post_json("/checkout/router", &cart.start("req-slow"), CLIENT)).await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.body["error"], "timeout");
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_price_mismatch() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 2);
    let body = cart.start_with_total("req-mismatch", cart.total() - Decimal::new(500, 2));

    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body["error"], "price_mismatch");
    let server_total: Decimal = response.body["server_total"].as_str().unwrap().parse().unwrap();
    assert_eq!(server_total, cart.total());
    assert_eq!(app.store.order_count(), 0);
    assert_eq!(app.stripe.create_calls(), 0);
}

#[tokio::test]
async fn test_total_within_tolerance_accepted() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 2);
    let body = cart.start_with_total("req-rounding", cart.total() + Decimal::new(5, 2));

    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::OK);
    let order = app.store.order(order_id(&response.body)).await.unwrap().unwrap();
    assert_eq!(order.total_amount, cart.total());
}

#[tokio::test]
async fn test_insufficient_stock_conflicts() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 1, 2);

    let response = send(&router, post_json("/checkout/router", &cart.start("req-stock"), CLIENT)).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["error"], "conflict");
    assert_eq!(app.stripe.create_calls(), 0);
}

#[tokio::test]
async fn test_stock_held_by_another_cart_conflicts() {
    let app = TestApp::new();
    let router = app.router();
    let first = Cart::seed(&app, 1, 1);
    let mut second = Cart::seed(&app, 1, 1);
    second.variant_id = first.variant_id;

    let ok = send(&router, post_json("/checkout/router", &first.start("req-holder"), CLIENT)).await;
    assert_eq!(ok.status, StatusCode::OK);

    let response = send(&router, post_json("/checkout/router", &second.start("req-late"), CLIENT)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_variant_not_found() {
    let app = TestApp::new();
    let router = app.router();
    let mut cart = Cart::seed(&app, 5, 1);
    cart.variant_id = VariantId::random();

    let response = send(&router, post_json("/checkout/router", &cart.start("req-ghost"), CLIENT)).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
async fn test_unknown_route_rejected() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let mut body = cart.start("req-route");
    body["route"] = json!("finish");

    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["success"], false);
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let app = TestApp::new();
    let router = app.router();

    let request = axum::http::Request::post("/checkout/router")
        .header(header::CONTENT_TYPE, "application/json")
        .body(axum::body::Body::from("{\"route\": \"start\","))
        .unwrap();
    let response = send(&router, request).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["error"], "bad_request");
}

#[tokio::test]
async fn test_malformed_email_rejected() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let mut body = cart.start("req-email");
    body["customer"]["email"] = json!("ana-at-loja");

    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.order_count(), 0);
}

#[tokio::test]
async fn test_invalid_coupon_rejected() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);
    let mut body = cart.start("req-coupon");
    body["coupon_code"] = json!("NOPE10");

    let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Rate limiting
// ============================================================================

#[tokio::test]
async fn test_thirty_first_request_rate_limited() {
    let app = TestApp::new();
    let router = app.router();
    let cart = Cart::seed(&app, 5, 1);

    for i in 0..30 {
        let body = cart.start(&format!("req-burst-{i}"));
        let response = send(&router, post_json("/checkout/router", &body, CLIENT)).await;
        assert_eq!(response.status, StatusCode::OK, "request {i}");
    }

    let response = send(&router, post_json("/checkout/router", &cart.start("req-burst-30"), CLIENT)).await;
    assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.body["error"], "rate_limited");
    let retry_after: u64 = response.headers[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=2).contains(&retry_after));

    // Another client on the same cart has its own budget
    let other = send(&router, post_json("/checkout/router", &cart.start("req-other-ip"), "198.51.100.4")).await;
    assert_eq!(other.status, StatusCode::OK);
}
