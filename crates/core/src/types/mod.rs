//! Core types for Pagora checkout.
//!
//! This module provides type-safe wrappers for the checkout domain.

pub mod email;
pub mod id;
pub mod payment;
pub mod price;
pub mod status;

pub use email::{Email, EmailError};
pub use id::*;
pub use payment::{
    Channel, CheckoutAction, CheckoutSettings, Experience, PaymentRoute, Provider, SettingsError,
};
pub use price::{CurrencyCode, MIN_PRICE_TOLERANCE, Price, price_tolerance, totals_agree};
pub use status::*;
