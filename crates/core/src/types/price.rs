//! Money amounts and the server-side price check.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A price with currency information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    /// Amount in the currency's standard unit (e.g., reais, not centavos).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency_code: CurrencyCode,
}

impl Price {
    /// Create a new price.
    #[must_use]
    pub const fn new(amount: Decimal, currency_code: CurrencyCode) -> Self {
        Self {
            amount,
            currency_code,
        }
    }

    /// Amount in the currency's minor unit, as payment providers expect it.
    ///
    /// Returns `None` for negative or out-of-range amounts.
    #[must_use]
    pub fn minor_units(&self) -> Option<i64> {
        use rust_decimal::prelude::ToPrimitive;

        if self.amount.is_sign_negative() {
            return None;
        }
        (self.amount.round_dp(2) * Decimal::ONE_HUNDRED).to_i64()
    }
}

/// ISO 4217 currency codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum CurrencyCode {
    #[default]
    BRL,
    USD,
    EUR,
}

impl CurrencyCode {
    /// Lowercase code, the form Stripe's API uses.
    #[must_use]
    pub const fn as_lower(self) -> &'static str {
        match self {
            Self::BRL => "brl",
            Self::USD => "usd",
            Self::EUR => "eur",
        }
    }
}

impl std::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = match self {
            Self::BRL => "BRL",
            Self::USD => "USD",
            Self::EUR => "EUR",
        };
        f.write_str(code)
    }
}

impl std::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BRL" => Ok(Self::BRL),
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

/// Smallest deviation always tolerated between client and server totals.
pub const MIN_PRICE_TOLERANCE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);

/// Allowed deviation for a server total: `max(0.10, 1% of server_total)`.
#[must_use]
pub fn price_tolerance(server_total: Decimal) -> Decimal {
    let relative = (server_total.abs() / Decimal::ONE_HUNDRED).round_dp(4);
    relative.max(MIN_PRICE_TOLERANCE)
}

/// Whether a client-submitted total is close enough to the server total.
///
/// ```
/// use rust_decimal::Decimal;
/// use pagora_core::totals_agree;
///
/// let server = Decimal::new(10000, 2); // 100.00
/// assert!(totals_agree(Decimal::new(10005, 2), server));
/// assert!(!totals_agree(Decimal::new(100, 2), server));
/// ```
#[must_use]
pub fn totals_agree(client_total: Decimal, server_total: Decimal) -> bool {
    (client_total - server_total).abs() <= price_tolerance(server_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(cents: i64) -> Decimal {
        Decimal::new(cents, 2)
    }

    #[test]
    fn test_min_tolerance_constant() {
        assert_eq!(MIN_PRICE_TOLERANCE, d(10));
    }

    #[test]
    fn test_tolerance_floor_for_small_totals() {
        assert_eq!(price_tolerance(d(500)), d(10));
        assert_eq!(price_tolerance(Decimal::ZERO), d(10));
    }

    #[test]
    fn test_tolerance_scales_with_total() {
        assert_eq!(price_tolerance(d(10000)), d(100));
        assert_eq!(price_tolerance(d(250_000)), d(2500));
    }

    #[test]
    fn test_client_total_far_below_server_is_rejected() {
        assert!(!totals_agree(d(100), d(10000)));
    }

    #[test]
    fn test_client_total_slightly_above_server_is_accepted() {
        assert!(totals_agree(d(10005), d(10000)));
        assert!(totals_agree(d(10100), d(10000)));
        assert!(!totals_agree(d(10101), d(10000)));
    }

    #[test]
    fn test_small_orders_use_floor() {
        assert!(totals_agree(d(1010), d(1000)));
        assert!(!totals_agree(d(1011), d(1000)));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Price::new(d(12345), CurrencyCode::BRL).minor_units(), Some(12345));
        assert_eq!(Price::new(d(-1), CurrencyCode::BRL).minor_units(), None);
    }

    #[test]
    fn test_currency_parse() {
        assert_eq!("brl".parse::<CurrencyCode>(), Ok(CurrencyCode::BRL));
        assert!("xyz".parse::<CurrencyCode>().is_err());
    }
}
