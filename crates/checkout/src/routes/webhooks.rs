//! Provider webhook endpoints.
//!
//! Signatures are computed over the exact request bytes, so these handlers
//! take the raw body and parse JSON only after verification.

use axum::{
    Json,
    body::Bytes,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::Deserialize;

use pagora_core::Provider;

use crate::error::{AppError, Result};
use crate::middleware::RequireServiceToken;
use crate::services::webhooks::{STRIPE_SIGNATURE_HEADER, YAMPI_SIGNATURE_HEADER};
use crate::services::{WebhookOutcome, WebhookProcessor};
use crate::state::AppState;

/// `POST /webhooks/stripe`
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>> {
    let signature = header(&headers, STRIPE_SIGNATURE_HEADER);
    let outcome = WebhookProcessor::new(&state)
        .receive(Provider::Stripe, signature, &body)
        .await?;
    Ok(Json(outcome))
}

/// `POST /webhooks/yampi`
pub async fn yampi(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookOutcome>> {
    let signature = header(&headers, YAMPI_SIGNATURE_HEADER);
    let outcome = WebhookProcessor::new(&state)
        .receive(Provider::Yampi, signature, &body)
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    #[serde(default)]
    pub event_id: Option<String>,
}

/// `POST /internal/webhooks/reprocess`
pub async fn reprocess(
    _: RequireServiceToken,
    State(state): State<AppState>,
    payload: std::result::Result<Json<ReprocessRequest>, JsonRejection>,
) -> Result<Json<WebhookOutcome>> {
    let Json(body) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let event_id = body
        .event_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("event_id is required".to_string()))?;

    let outcome = WebhookProcessor::new(&state).reprocess(event_id).await?;
    Ok(Json(outcome))
}

fn header<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
