//! HTTP middleware and extractors for checkout.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (hub per request, transaction per route)
//! 2. `TraceLayer` (request span carrying `request_id`)
//! 3. Request ID (propagate or generate `x-request-id`)
//!
//! Extractors: `ClientIp` for the router's rate limit key,
//! `RequireServiceToken` for `/internal` and reconcile endpoints.

pub mod auth;
pub mod client_ip;
pub mod request_id;

pub use auth::RequireServiceToken;
pub use client_ip::ClientIp;
pub use request_id::{REQUEST_ID_HEADER, request_id_middleware};
