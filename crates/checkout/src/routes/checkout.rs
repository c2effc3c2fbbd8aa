//! Checkout router and reconciliation handlers.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;

use pagora_core::OrderId;

use crate::error::{AppError, Result};
use crate::middleware::{ClientIp, RequireServiceToken};
use crate::models::{RouterRequest, RouterResponse};
use crate::services::{CheckoutRouter, ReconcileOutcome, Reconciler};
use crate::state::AppState;

/// `POST /checkout/router`
pub async fn router(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    payload: std::result::Result<Json<RouterRequest>, JsonRejection>,
) -> Result<Json<RouterResponse>> {
    let Json(request) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let response = CheckoutRouter::new(&state).route(request, &ip).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub order_id: Option<String>,
}

/// `POST /checkout/reconcile`
pub async fn reconcile(
    _: RequireServiceToken,
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<ReconcileOutcome>> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let order_id = parse_order_id(body.order_id.as_deref())?;
    let outcome = Reconciler::new(&state).reconcile(order_id).await?;
    Ok(Json(outcome))
}

fn parse_order_id(raw: Option<&str>) -> Result<OrderId> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("order_id is required".to_string()))?;
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("order_id is malformed: {raw}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_id() {
        assert!(matches!(parse_order_id(None), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_order_id(Some("  ")), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_order_id(Some("ord-1")), Err(AppError::BadRequest(_))));

        let id = OrderId::random();
        assert_eq!(parse_order_id(Some(&id.to_string())).unwrap(), id);
    }
}
