//! Order reconciliation against provider state.
//!
//! Run with: `cargo test -p pagora-integration-tests --test reconcile`

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use serde_json::json;

use pagora_checkout::db::CheckoutStore;
use pagora_checkout::gateway::ProviderPaymentState;
use pagora_checkout::testing::TestApp;
use pagora_core::{OrderId, OrderStatus};
use pagora_integration_tests::{Cart, get_internal, post_internal, post_json, send};

const CLIENT: &str = "192.0.2.33";

async fn checkout(app: &TestApp, request_id: &str) -> OrderId {
    let cart = Cart::seed(app, 5, 1);
    let response = send(
        &app.router(),
        post_json("/checkout/router", &cart.start(request_id), CLIENT),
    )
    .await;
    assert_eq!(response.status, StatusCode::OK);
    response.body["order_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_succeeded_payment_marks_paid() {
    let app = TestApp::new();
    let id = checkout(&app, "req-rec-paid").await;
    app.stripe.set_state(ProviderPaymentState::Succeeded);

    let response = send(
        &app.router(),
        post_internal("/checkout/reconcile", &json!({"order_id": id.to_string()})),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true, "status": "paid", "changed": true}));
    let order = app.store.order(id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);

    // Settled orders are not queried again
    let again = send(
        &app.router(),
        post_internal("/checkout/reconcile", &json!({"order_id": id.to_string()})),
    )
    .await;
    assert_eq!(again.body["changed"], false);
    assert_eq!(app.stripe.state_calls(), 1);
}

#[tokio::test]
async fn test_canceled_payment_marks_cancelled() {
    let app = TestApp::new();
    let id = checkout(&app, "req-rec-cancel").await;
    app.stripe.set_state(ProviderPaymentState::Canceled);

    let response = send(
        &app.router(),
        post_internal("/checkout/reconcile", &json!({"order_id": id.to_string()})),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "cancelled");
}

#[tokio::test]
async fn test_in_flight_payment_stays_pending() {
    let app = TestApp::new();
    let id = checkout(&app, "req-rec-inflight").await;

    let response = send(
        &app.router(),
        post_internal("/checkout/reconcile", &json!({"order_id": id.to_string()})),
    )
    .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body, json!({"ok": true, "status": "pending", "changed": false}));
}

#[tokio::test]
async fn test_reconcile_rejections() {
    let app = TestApp::new();
    let router = app.router();

    let missing = send(&router, post_internal("/checkout/reconcile", &json!({}))).await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);

    let malformed = send(
        &router,
        post_internal("/checkout/reconcile", &json!({"order_id": "order-42"})),
    )
    .await;
    assert_eq!(malformed.status, StatusCode::BAD_REQUEST);

    let unknown = send(
        &router,
        post_internal(
            "/checkout/reconcile",
            &json!({"order_id": OrderId::random().to_string()}),
        ),
    )
    .await;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);

    let unauthenticated = send(
        &router,
        post_json(
            "/checkout/reconcile",
            &json!({"order_id": OrderId::random().to_string()}),
            CLIENT,
        ),
    )
    .await;
    assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stale_orders_listed_oldest_first() {
    let app = TestApp::new();
    let fresh = checkout(&app, "req-rec-fresh").await;
    let old = checkout(&app, "req-rec-old").await;
    let older = checkout(&app, "req-rec-older").await;
    app.store.backdate_order(old, chrono::Duration::hours(3));
    app.store.backdate_order(older, chrono::Duration::hours(5));

    let response = send(&app.router(), get_internal("/internal/orders/stale")).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body["order_ids"],
        json!([older.to_string(), old.to_string()])
    );
    assert!(
        !response.body["order_ids"]
            .as_array()
            .unwrap()
            .contains(&json!(fresh.to_string()))
    );

    let limited = send(
        &app.router(),
        get_internal("/internal/orders/stale?older_than_minutes=60&limit=1"),
    )
    .await;
    assert_eq!(limited.body["order_ids"], json!([older.to_string()]));

    let negative = send(
        &app.router(),
        get_internal("/internal/orders/stale?older_than_minutes=-5"),
    )
    .await;
    assert_eq!(negative.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_stale_cutoff_out_of_range_rejected() {
    let app = TestApp::new();

    for minutes in [i64::MAX.to_string(), "200000000000".to_string()] {
        let response = send(
            &app.router(),
            get_internal(&format!("/internal/orders/stale?older_than_minutes={minutes}")),
        )
        .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{minutes}");
        assert_eq!(response.body["error"], "bad_request");
    }

    let widest = send(
        &app.router(),
        get_internal("/internal/orders/stale?older_than_minutes=525600"),
    )
    .await;
    assert_eq!(widest.status, StatusCode::OK);
}
