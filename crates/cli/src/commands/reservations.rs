//! Reservation sweep command.
//!
//! # Usage
//!
//! ```bash
//! pagora release-reservations
//! ```

use reqwest::Method;
use serde::Deserialize;

use pagora_core::OrderId;

use super::client::{ClientError, ServiceClient};

const PATH: &str = "/internal/reservations/release-expired";

#[derive(Debug, Deserialize)]
pub struct ReleaseSummary {
    pub released: u64,
    #[serde(default)]
    pub order_ids: Vec<OrderId>,
}

/// Release expired reservations through the service.
///
/// # Errors
///
/// Returns `ClientError` if the service cannot be reached or rejects the call.
pub async fn release_expired(client: &ServiceClient) -> Result<ReleaseSummary, ClientError> {
    let request = client.request(Method::POST, PATH)?;
    let summary: ReleaseSummary = client.send(PATH, request).await?;
    tracing::info!(
        released = summary.released,
        orders = summary.order_ids.len(),
        "Expired reservations released"
    );
    Ok(summary)
}
