//! Payment provider selection.
//!
//! The store-wide [`CheckoutSettings`] row is stored as three loose columns
//! (`provider`, `channel`, `experience`). Before the router acts on it, the row
//! is resolved once into a [`PaymentRoute`], a closed set of supported
//! combinations that callers match exhaustively.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment provider of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.payment_provider", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Stripe,
    Yampi,
}

/// Where the payment UI lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.payment_channel", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Payment UI hosted in-app.
    Internal,
    /// Redirect to a provider-hosted page.
    External,
}

/// How the payment form is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.payment_experience", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum Experience {
    /// Embedded payment form.
    Transparent,
    /// Provider's own full page.
    Native,
}

impl Provider {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Yampi => "yampi",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Store-wide checkout configuration, as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSettings {
    pub provider: Provider,
    pub channel: Channel,
    pub experience: Experience,
}

/// The settings row describes a combination no provider supports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unsupported checkout combination: {provider:?}/{channel:?}/{experience:?}")]
pub struct SettingsError {
    pub provider: Provider,
    pub channel: Channel,
    pub experience: Experience,
}

/// A supported provider/channel/experience combination.
///
/// Adding a provider means adding a variant here and one arm in each match
/// over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentRoute {
    /// Stripe Payment Element rendered in-page.
    StripeTransparent,
    /// Stripe-hosted Checkout page.
    StripeHosted,
    /// Yampi-hosted checkout page.
    YampiHosted,
}

impl PaymentRoute {
    #[must_use]
    pub const fn provider(self) -> Provider {
        match self {
            Self::StripeTransparent | Self::StripeHosted => Provider::Stripe,
            Self::YampiHosted => Provider::Yampi,
        }
    }

    #[must_use]
    pub const fn channel(self) -> Channel {
        match self {
            Self::StripeTransparent => Channel::Internal,
            Self::StripeHosted | Self::YampiHosted => Channel::External,
        }
    }

    #[must_use]
    pub const fn experience(self) -> Experience {
        match self {
            Self::StripeTransparent => Experience::Transparent,
            Self::StripeHosted | Self::YampiHosted => Experience::Native,
        }
    }

    /// What the client does next.
    #[must_use]
    pub const fn action(self) -> CheckoutAction {
        match self.channel() {
            Channel::Internal => CheckoutAction::Render,
            Channel::External => CheckoutAction::Redirect,
        }
    }

    /// The settings row this route is stored as.
    #[must_use]
    pub const fn settings(self) -> CheckoutSettings {
        CheckoutSettings {
            provider: self.provider(),
            channel: self.channel(),
            experience: self.experience(),
        }
    }
}

impl TryFrom<CheckoutSettings> for PaymentRoute {
    type Error = SettingsError;

    fn try_from(settings: CheckoutSettings) -> Result<Self, Self::Error> {
        match (settings.provider, settings.channel, settings.experience) {
            (Provider::Stripe, Channel::Internal, Experience::Transparent) => {
                Ok(Self::StripeTransparent)
            }
            (Provider::Stripe, Channel::External, Experience::Native) => Ok(Self::StripeHosted),
            (Provider::Yampi, Channel::External, Experience::Native) => Ok(Self::YampiHosted),
            (provider, channel, experience) => Err(SettingsError {
                provider,
                channel,
                experience,
            }),
        }
    }
}

/// Client-side action returned by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutAction {
    /// Render the provider's payment UI in-page with a client secret.
    Render,
    /// Send the browser to a provider-hosted URL.
    Redirect,
}
