//! Operator endpoints under `/internal`, all behind the service token.

use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use pagora_core::{CheckoutSettings, OrderId, PaymentRoute};

use crate::error::{AppError, Result};
use crate::middleware::RequireServiceToken;
use crate::models::ReleaseSummary;
use crate::services::{Reconciler, reservations};
use crate::state::AppState;

/// Default age before a pending order counts as stale.
pub const DEFAULT_STALE_MINUTES: i64 = 120;
const DEFAULT_STALE_LIMIT: i64 = 100;
const MAX_STALE_LIMIT: i64 = 1000;

/// `POST /internal/reservations/release-expired`
pub async fn release_expired(
    _: RequireServiceToken,
    State(state): State<AppState>,
) -> Result<Json<ReleaseSummary>> {
    let summary = reservations::release_expired(state.store()).await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
pub struct StaleQuery {
    pub older_than_minutes: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct StaleOrders {
    pub order_ids: Vec<OrderId>,
}

/// `GET /internal/orders/stale`
pub async fn stale_orders(
    _: RequireServiceToken,
    State(state): State<AppState>,
    Query(query): Query<StaleQuery>,
) -> Result<Json<StaleOrders>> {
    let minutes = query.older_than_minutes.unwrap_or(DEFAULT_STALE_MINUTES);
    if minutes < 0 {
        return Err(AppError::BadRequest(
            "older_than_minutes must not be negative".to_string(),
        ));
    }
    let older_than = chrono::TimeDelta::try_minutes(minutes)
        .ok_or_else(|| AppError::BadRequest("older_than_minutes is out of range".to_string()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_STALE_LIMIT)
        .clamp(1, MAX_STALE_LIMIT);

    let order_ids = Reconciler::new(&state)
        .stale_orders(older_than, limit)
        .await?;
    Ok(Json(StaleOrders { order_ids }))
}

/// `GET /internal/checkout-settings`
pub async fn get_settings(
    _: RequireServiceToken,
    State(state): State<AppState>,
) -> Result<Json<CheckoutSettings>> {
    Ok(Json(state.store().checkout_settings().await?))
}

/// `PUT /internal/checkout-settings`
pub async fn put_settings(
    _: RequireServiceToken,
    State(state): State<AppState>,
    payload: std::result::Result<Json<CheckoutSettings>, JsonRejection>,
) -> Result<Json<CheckoutSettings>> {
    let Json(settings) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let route =
        PaymentRoute::try_from(settings).map_err(|e| AppError::BadRequest(e.to_string()))?;
    state.gateways().get(route.provider())?;

    let saved = state.store().save_checkout_settings(route.settings()).await?;
    info!(provider = %saved.provider, channel = ?saved.channel, experience = ?saved.experience, "Checkout settings updated");
    Ok(Json(saved))
}
