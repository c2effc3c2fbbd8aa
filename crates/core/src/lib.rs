//! Pagora Core - Shared checkout domain types.
//!
//! This crate provides the types shared by the checkout service and the
//! operator CLI:
//! - `checkout` - Checkout router, payment guards, webhooks and sweepers
//! - `cli` - Migrations and scheduled batch drivers
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. Enable the `postgres` feature for `sqlx` mappings.
//!
//! # Modules
//!
//! - [`types`] - Typed IDs, order status and the charge guard, payment routes,
//!   prices and the price tolerance check, customer emails

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
