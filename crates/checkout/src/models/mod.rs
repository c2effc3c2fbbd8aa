//! Domain models for the checkout service.
//!
//! - [`order`] - Orders, order lines and the draft the router persists
//! - [`reservation`] - Stock holds and sweeper results
//! - [`catalog`] - Server-side variant prices and coupons
//! - [`webhook`] - Stored webhook events and normalized payment events
//! - [`checkout`] - Router request and response bodies

pub mod catalog;
pub mod checkout;
pub mod order;
pub mod reservation;
pub mod webhook;

pub use catalog::{Coupon, CouponKind, VariantPrice};
pub use checkout::{Customer, RouterItem, RouterRequest, RouterResponse};
pub use order::{Order, OrderDraft, OrderLine};
pub use reservation::{ReleaseSummary, Reservation};
pub use webhook::{NewWebhookEvent, PaymentEvent, PaymentEventKind, WebhookEvent};
