//! Checkout router request and response bodies.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use pagora_core::{
    CartId, Channel, CheckoutAction, Email, Experience, OrderId, PaymentRoute, Provider, UserId,
    VariantId,
};

/// Buyer details submitted with the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<Email>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// One cart line as submitted by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterItem {
    pub variant_id: VariantId,
    pub quantity: i32,
    /// Client-side price, accepted for compatibility and never trusted.
    #[serde(default)]
    pub unit_price: Option<Decimal>,
}

/// Body of `POST /checkout/router`.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterRequest {
    pub route: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub cart_id: Option<CartId>,
    #[serde(default)]
    pub items: Vec<RouterItem>,
    #[serde(default)]
    pub subtotal: Option<Decimal>,
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    #[serde(default)]
    pub shipping_cost: Option<Decimal>,
    #[serde(default)]
    pub total_amount: Option<Decimal>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub shipping: Option<JsonValue>,
    #[serde(default)]
    pub attribution: Option<JsonValue>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub order_access_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// Successful router outcome. Replayed verbatim for repeated `request_id`s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterResponse {
    pub success: bool,
    pub provider: Provider,
    pub channel: Channel,
    pub experience: Experience,
    pub action: CheckoutAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RouterResponse {
    /// Response for a route, branching on its channel.
    #[must_use]
    pub fn for_route(
        route: PaymentRoute,
        order_id: OrderId,
        access_token: &str,
        client_secret: Option<String>,
        redirect_url: Option<String>,
    ) -> Self {
        let (client_secret, redirect_url) = match route.channel() {
            Channel::Internal => (client_secret, None),
            Channel::External => (None, redirect_url),
        };
        Self {
            success: true,
            provider: route.provider(),
            channel: route.channel(),
            experience: route.experience(),
            action: route.action(),
            order_id: Some(order_id),
            order_access_token: Some(access_token.to_string()),
            redirect_url,
            client_secret,
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_route_renders_with_client_secret() {
        let id = OrderId::random();
        let response = RouterResponse::for_route(
            PaymentRoute::StripeTransparent,
            id,
            "tok",
            Some("pi_1_secret_x".to_string()),
            Some("https://ignored".to_string()),
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["action"], "render");
        assert_eq!(json["provider"], "stripe");
        assert_eq!(json["client_secret"], "pi_1_secret_x");
        assert!(json.get("redirect_url").is_none());
    }

    #[test]
    fn test_external_route_redirects() {
        let response = RouterResponse::for_route(
            PaymentRoute::YampiHosted,
            OrderId::random(),
            "tok",
            None,
            Some("https://pay.yampi.example/abc".to_string()),
        );
        assert_eq!(response.action, CheckoutAction::Redirect);
        assert_eq!(response.channel, Channel::External);
        assert!(response.client_secret.is_none());
    }

    #[test]
    fn test_request_accepts_numeric_amounts() {
        let body = serde_json::json!({
            "route": "start",
            "request_id": "req-1",
            "cart_id": "7f8a7c2e-3f1b-4a8e-9d55-0c6f0f1d2a11",
            "items": [{"variant_id": "1c7d1c38-5f0e-4f43-8c8e-7c3d7c5f7d10", "quantity": 2}],
            "subtotal": 100.0,
            "shipping_cost": 0,
            "total_amount": "100.00"
        });
        let request: RouterRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.items.len(), 1);
        assert_eq!(request.total_amount, Some(Decimal::ONE_HUNDRED));
        assert!(request.discount_amount.is_none());
    }
}
