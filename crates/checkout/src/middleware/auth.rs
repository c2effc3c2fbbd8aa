//! Service token authentication for internal endpoints.
//!
//! Reconciliation, sweeps, reprocessing and settings are called by the
//! operator CLI and schedulers with `Authorization: Bearer <token>`.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use secrecy::ExposeSecret;

use crate::error::AppError;
use crate::gateway::signature::constant_time_eq;
use crate::state::AppState;

/// Extractor that requires the service token.
///
/// # Example
///
/// ```rust,ignore
/// async fn internal_handler(_: RequireServiceToken) -> impl IntoResponse {
///     "ok"
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequireServiceToken;

impl FromRequestParts<AppState> for RequireServiceToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))?;

        let expected = state.config().service_token.expose_secret();
        if constant_time_eq(token.as_bytes(), expected.as_bytes()) {
            Ok(Self)
        } else {
            tracing::warn!(path = %parts.uri.path(), "Rejected service token");
            Err(AppError::Unauthorized("invalid service token".to_string()))
        }
    }
}
