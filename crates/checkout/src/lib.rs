//! Pagora checkout service library.
//!
//! The checkout router, payment idempotency, provider webhooks, reservation
//! sweeping and order reconciliation, exposed as a library so the binary, the
//! CLI and the integration tests share one implementation.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
