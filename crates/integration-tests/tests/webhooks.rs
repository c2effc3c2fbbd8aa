//! Provider webhook delivery, deduplication and reprocessing.
//!
//! Run with: `cargo test -p pagora-integration-tests --test webhooks`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};

use pagora_checkout::db::CheckoutStore;
use pagora_checkout::testing::TestApp;
use pagora_core::{OrderId, OrderStatus};
use pagora_integration_tests::{
    Cart, post_internal, post_json, send, stripe_webhook, yampi_webhook,
};

const CLIENT: &str = "203.0.113.9";

/// Run the router for a fresh cart and return the order it opened.
async fn checkout(app: &TestApp, request_id: &str) -> (Cart, OrderId) {
    let cart = Cart::seed(app, 5, 2);
    let response = send(
        &app.router(),
        post_json("/checkout/router", &cart.start(request_id), CLIENT),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    let id = response.body["order_id"].as_str().unwrap().parse().unwrap();
    (cart, id)
}

fn intent_event(event_id: &str, event_type: &str, transaction_id: &str, order_id: Option<OrderId>) -> Value {
    let metadata = order_id.map_or_else(|| json!({}), |id| json!({"order_id": id.to_string()}));
    json!({
        "id": event_id,
        "type": event_type,
        "data": {"object": {"id": transaction_id, "metadata": metadata}}
    })
}

async fn status(app: &TestApp, id: OrderId) -> OrderStatus {
    app.store.order(id).await.unwrap().unwrap().status
}

// ============================================================================
// Stripe
// ============================================================================

#[tokio::test]
async fn test_payment_succeeded_marks_paid_once() {
    let app = TestApp::new();
    let router = app.router();
    let (cart, id) = checkout(&app, "req-wh-paid").await;
    let transaction = app.store.order(id).await.unwrap().unwrap().transaction_id.unwrap();

    let event = intent_event("evt_paid_1", "payment_intent.succeeded", &transaction, Some(id));
    let first = send(&router, stripe_webhook(&event)).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, json!({"ok": true, "duplicate": false}));
    assert_eq!(status(&app, id).await, OrderStatus::Paid);
    assert_eq!(app.store.variant_stock(cart.variant_id), Some(3));

    let redelivery = send(&router, stripe_webhook(&event)).await;
    assert_eq!(redelivery.status, StatusCode::OK);
    assert_eq!(redelivery.body, json!({"ok": true, "duplicate": true}));
    assert_eq!(app.store.variant_stock(cart.variant_id), Some(3));
}

#[tokio::test]
async fn test_cancel_after_paid_keeps_paid() {
    let app = TestApp::new();
    let router = app.router();
    let (_, id) = checkout(&app, "req-wh-late-cancel").await;
    let transaction = app.store.order(id).await.unwrap().unwrap().transaction_id.unwrap();

    let paid = intent_event("evt_order_1", "payment_intent.succeeded", &transaction, Some(id));
    assert_eq!(send(&router, stripe_webhook(&paid)).await.status, StatusCode::OK);

    let cancelled = intent_event("evt_order_2", "payment_intent.canceled", &transaction, Some(id));
    let response = send(&router, stripe_webhook(&cancelled)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(status(&app, id).await, OrderStatus::Paid);
}

#[tokio::test]
async fn test_processing_then_failed() {
    let app = TestApp::new();
    let router = app.router();
    let (_, id) = checkout(&app, "req-wh-failed").await;
    let transaction = app.store.order(id).await.unwrap().unwrap().transaction_id.unwrap();

    let processing = intent_event("evt_proc", "payment_intent.processing", &transaction, None);
    assert_eq!(send(&router, stripe_webhook(&processing)).await.status, StatusCode::OK);
    assert_eq!(status(&app, id).await, OrderStatus::Processing);

    let failed = json!({
        "id": "evt_async_failed",
        "type": "checkout.session.async_payment_failed",
        "data": {"object": {"id": transaction, "client_reference_id": id.to_string()}}
    });
    assert_eq!(send(&router, stripe_webhook(&failed)).await.status, StatusCode::OK);
    assert_eq!(status(&app, id).await, OrderStatus::Failed);
}

#[tokio::test]
async fn test_ignored_event_type_acknowledged() {
    let app = TestApp::new();
    let event = json!({"id": "evt_misc", "type": "customer.created", "data": {"object": {"id": "cus_1"}}});

    let response = send(&app.router(), stripe_webhook(&event)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["duplicate"], false);
}

// ============================================================================
// Signature verification
// ============================================================================

#[tokio::test]
async fn test_invalid_signature_rejected_before_recording() {
    let app = TestApp::new();
    let event = intent_event("evt_forged", "payment_intent.succeeded", "pi_x", None);
    let request = Request::post("/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", "t=1700000000,v1=deadbeef")
        .body(Body::from(event.to_string()))
        .unwrap();

    let response = send(&app.router(), request).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(app.store.webhook_event("evt_forged").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_signature_rejected() {
    let app = TestApp::new();
    let request = Request::post("/webhooks/yampi")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"event":"order.paid","resource":{"id":1}}"#))
        .unwrap();

    let response = send(&app.router(), request).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signed_garbage_is_bad_request() {
    let app = TestApp::new();
    let response = send(&app.router(), stripe_webhook(&json!({"hello": "world"}))).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Early delivery and reprocessing
// ============================================================================

#[tokio::test]
async fn test_early_event_fails_then_reprocess_applies() {
    let app = TestApp::new();
    let router = app.router();

    let event = intent_event("evt_early", "payment_intent.succeeded", "pi_early", None);
    let early = send(&router, stripe_webhook(&event)).await;
    assert_eq!(early.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(early.body["error"], "webhook_failed");

    let recorded = app.store.webhook_event("evt_early").await.unwrap().unwrap();
    assert!(!recorded.is_processed());
    assert!(recorded.error_message.is_some());

    app.stripe.next_transaction_id("pi_early");
    let (_, id) = checkout(&app, "req-wh-early").await;

    let response = send(
        &router,
        post_internal("/internal/webhooks/reprocess", &json!({"event_id": "evt_early"})),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true, "duplicate": false}));
    assert_eq!(status(&app, id).await, OrderStatus::Paid);

    let recorded = app.store.webhook_event("evt_early").await.unwrap().unwrap();
    assert!(recorded.is_processed());
    assert!(recorded.error_message.is_none());

    let again = send(
        &router,
        post_internal("/internal/webhooks/reprocess", &json!({"event_id": "evt_early"})),
    )
    .await;
    assert_eq!(again.body["duplicate"], true);
}

#[tokio::test]
async fn test_reprocess_rejections() {
    let app = TestApp::new();
    let router = app.router();

    let missing = send(&router, post_internal("/internal/webhooks/reprocess", &json!({}))).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let blank = send(
        &router,
        post_internal("/internal/webhooks/reprocess", &json!({"event_id": "  "})),
    )
    .await;
    assert_eq!(blank.status, StatusCode::BAD_REQUEST);

    let unknown = send(
        &router,
        post_internal("/internal/webhooks/reprocess", &json!({"event_id": "evt_nope"})),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let unauthenticated = send(
        &router,
        post_json("/internal/webhooks/reprocess", &json!({"event_id": "evt_nope"}), CLIENT),
    )
    .await;
    assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Yampi
// ============================================================================

#[tokio::test]
async fn test_yampi_order_paid() {
    let app = TestApp::new();
    let router = app.router();
    let settings = json!({"provider": "yampi", "channel": "external", "experience": "native"});
    let request = Request::put("/internal/checkout-settings")
        .header(header::CONTENT_TYPE, "application/json")
        .header(
            header::AUTHORIZATION,
            format!("Bearer {}", pagora_checkout::testing::SERVICE_TOKEN),
        )
        .body(Body::from(settings.to_string()))
        .unwrap();
    assert_eq!(send(&router, request).await.status, StatusCode::OK);

    let (_, id) = checkout(&app, "req-yampi-paid").await;
    let link = app.store.order(id).await.unwrap().unwrap().transaction_id.unwrap();

    let event = json!({
        "event": "order.paid",
        "resource": {"id": 55501, "payment_link_id": link, "metadata": {"order_id": id.to_string()}}
    });
    let response = send(&router, yampi_webhook(&event)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(status(&app, id).await, OrderStatus::Paid);
    assert!(
        app.store
            .webhook_event("yampi:order.paid:55501")
            .await
            .unwrap()
            .unwrap()
            .is_processed()
    );
}
