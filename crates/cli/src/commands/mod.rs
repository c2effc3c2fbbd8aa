//! CLI command implementations.

pub mod client;
pub mod migrate;
pub mod reconcile;
pub mod reservations;
