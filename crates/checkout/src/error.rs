//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side errors to
//! Sentry before responding to the client. All route handlers return
//! `Result<T, AppError>`, rendered as `{success: false, error, message}`.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::gateway::ProviderError;

/// Application-level error type for the checkout service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Payment provider call failed.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(#[from] ProviderError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request conflicts with current state (e.g. stock held elsewhere).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many router requests for this cart and client.
    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    /// Client total disagrees with the server's recomputation.
    #[error("Price mismatch: client {client}, server {server}")]
    PriceMismatch { client: Decimal, server: Decimal },

    /// The router did not finish within its time budget.
    #[error("Checkout timed out")]
    Timeout,

    /// A verified webhook could not be applied yet; the provider should retry.
    #[error("Webhook processing failed: {0}")]
    WebhookFailed(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(err) => match err {
                RepositoryError::NotFound => StatusCode::NOT_FOUND,
                RepositoryError::Conflict(_) | RepositoryError::InsufficientStock { .. } => {
                    StatusCode::CONFLICT
                }
                RepositoryError::Database(_) | RepositoryError::DataCorruption(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::ProviderUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::PriceMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::WebhookFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the `error` field.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => "not_found",
            Self::Database(
                RepositoryError::Conflict(_) | RepositoryError::InsufficientStock { .. },
            )
            | Self::Conflict(_) => "conflict",
            Self::Database(_) | Self::Internal(_) => "internal",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::PriceMismatch { .. } => "price_mismatch",
            Self::Timeout => "timeout",
            Self::WebhookFailed(_) => "webhook_failed",
        }
    }

    /// Client-safe message. Internal details are never exposed.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Database(RepositoryError::NotFound) => "Not found".to_string(),
            Self::Database(RepositoryError::InsufficientStock { variant_id, .. }) => {
                format!("Insufficient stock for variant {variant_id}")
            }
            Self::Database(RepositoryError::Conflict(_)) => {
                "Request conflicts with the current order state".to_string()
            }
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::ProviderUnavailable(_) => "Payment provider unavailable".to_string(),
            Self::WebhookFailed(_) => "Webhook could not be processed yet".to_string(),
            Self::PriceMismatch { server, .. } => {
                format!("Cart total changed; the current total is {server}")
            }
            _ => self.to_string(),
        }
    }

    /// Rebuild an equivalent error from a shared one.
    ///
    /// Coalesced callers of the idempotency cache receive the same
    /// `Arc<AppError>`; each needs an owned error to respond with.
    #[must_use]
    pub fn replay(&self) -> Self {
        match self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => {
                Self::NotFound(self.public_message())
            }
            Self::Database(
                RepositoryError::Conflict(_) | RepositoryError::InsufficientStock { .. },
            )
            | Self::Conflict(_) => Self::Conflict(self.public_message()),
            Self::Database(err) => Self::Internal(err.to_string()),
            Self::ProviderUnavailable(err) => {
                Self::ProviderUnavailable(ProviderError::Request(err.to_string()))
            }
            Self::Unauthorized(msg) => Self::Unauthorized(msg.clone()),
            Self::BadRequest(msg) => Self::BadRequest(msg.clone()),
            Self::RateLimited { retry_after } => Self::RateLimited {
                retry_after: *retry_after,
            },
            Self::PriceMismatch { client, server } => Self::PriceMismatch {
                client: *client,
                server: *server,
            },
            Self::Timeout => Self::Timeout,
            Self::WebhookFailed(msg) => Self::WebhookFailed(msg.clone()),
            Self::Internal(msg) => Self::Internal(msg.clone()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let mut body = json!({
            "success": false,
            "error": self.code(),
            "message": self.public_message(),
        });
        if let Self::PriceMismatch { client, server } = &self {
            body["client_total"] = json!(client);
            body["server_total"] = json!(server);
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
        response
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for a checkout decision.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of decisions
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}
