//! Checkout service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `CHECKOUT_BASE_URL` - Public storefront URL, used for provider return URLs
//! - `CHECKOUT_SERVICE_TOKEN` - Bearer token for internal endpoints (min 32 chars, high entropy)
//!
//! ## Optional
//! - `CHECKOUT_HOST` - Bind address (default: 127.0.0.1)
//! - `CHECKOUT_PORT` - Listen port (default: 3000)
//! - `CHECKOUT_CURRENCY` - ISO 4217 currency for all orders (default: BRL)
//! - `CHECKOUT_RATE_LIMIT_MAX` - Router requests allowed per cart and IP per window (default: 30)
//! - `CHECKOUT_RATE_LIMIT_WINDOW_SECS` - Rate limit window (default: 60)
//! - `CHECKOUT_IDEMPOTENCY_TTL_HOURS` - Retention of router responses by `request_id` (default: 24)
//! - `CHECKOUT_RESERVATION_TTL_MINUTES` - Stock hold lifetime (default: 15)
//! - `CHECKOUT_ROUTER_TIMEOUT_SECS` - End-to-end router budget (default: 20)
//! - `CHECKOUT_PROVIDER_TIMEOUT_SECS` - Per-call payment provider timeout (default: 10)
//! - `CHECKOUT_RESERVATION_SWEEP_SECS` - Run the reservation sweeper in-process at this interval
//! - `CHECKOUT_WEBHOOK_MAX_ATTEMPTS` - Order lookups before a webhook is recorded as failed (default: 3)
//! - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET` - Enable Stripe (both required together)
//! - `YAMPI_ALIAS`, `YAMPI_USER_TOKEN`, `YAMPI_SECRET_KEY`, `YAMPI_WEBHOOK_SECRET` - Enable Yampi
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT` - Sentry error tracking

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::time::Duration;

use pagora_core::CurrencyCode;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SERVICE_TOKEN_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "put-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Checkout service configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public storefront URL
    pub base_url: String,
    /// Bearer token required by internal endpoints
    pub service_token: SecretString,
    /// Currency every order is charged in
    pub currency: CurrencyCode,
    /// Limits and timeouts for the checkout core
    pub policy: CheckoutPolicy,
    /// Stripe credentials, if Stripe is enabled
    pub stripe: Option<StripeConfig>,
    /// Yampi credentials, if Yampi is enabled
    pub yampi: Option<YampiConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Tunable limits for the checkout core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckoutPolicy {
    pub rate_limit_max: NonZeroU32,
    pub rate_limit_window: Duration,
    pub idempotency_ttl: Duration,
    pub reservation_ttl: Duration,
    pub router_timeout: Duration,
    pub provider_timeout: Duration,
    pub reservation_sweep_interval: Option<Duration>,
    pub webhook_max_attempts: u32,
    pub webhook_retry_base: Duration,
}

impl Default for CheckoutPolicy {
    fn default() -> Self {
        Self {
            rate_limit_max: NonZeroU32::MIN.saturating_add(29),
            rate_limit_window: Duration::from_secs(60),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            reservation_ttl: Duration::from_secs(15 * 60),
            router_timeout: Duration::from_secs(20),
            provider_timeout: Duration::from_secs(10),
            reservation_sweep_interval: None,
            webhook_max_attempts: 3,
            webhook_retry_base: Duration::from_millis(250),
        }
    }
}

/// Stripe API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct StripeConfig {
    /// Secret API key (`sk_live_...` / `sk_test_...`)
    pub secret_key: SecretString,
    /// Webhook endpoint signing secret (`whsec_...`)
    pub webhook_secret: SecretString,
    /// API base URL (overridable for tests)
    pub api_base: String,
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Yampi API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct YampiConfig {
    /// Store alias in Yampi (path segment of every API call)
    pub alias: String,
    /// `User-Token` header value
    pub user_token: SecretString,
    /// `User-Secret-Key` header value
    pub secret_key: SecretString,
    /// Webhook HMAC secret
    pub webhook_secret: SecretString,
    /// API base URL (overridable for tests)
    pub api_base: String,
}

impl std::fmt::Debug for YampiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YampiConfig")
            .field("alias", &self.alias)
            .field("user_token", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CHECKOUT_DATABASE_URL")?;
        let host = parse_env("CHECKOUT_HOST", "127.0.0.1")?;
        let port = parse_env("CHECKOUT_PORT", "3000")?;
        let base_url = get_required_env("CHECKOUT_BASE_URL")?;
        url::Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_BASE_URL".to_string(), e.to_string()))?;
        let service_token = get_validated_secret("CHECKOUT_SERVICE_TOKEN")?;
        validate_token_length(&service_token, "CHECKOUT_SERVICE_TOKEN")?;
        let currency = get_env_or_default("CHECKOUT_CURRENCY", "BRL")
            .parse::<CurrencyCode>()
            .map_err(|e| ConfigError::InvalidEnvVar("CHECKOUT_CURRENCY".to_string(), e))?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            service_token,
            currency,
            policy: CheckoutPolicy::from_env()?,
            stripe: StripeConfig::from_env()?,
            yampi: YampiConfig::from_env()?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl CheckoutPolicy {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let rate_limit_max = parse_env::<u32>("CHECKOUT_RATE_LIMIT_MAX", "30")?;
        let rate_limit_max = NonZeroU32::new(rate_limit_max).ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "CHECKOUT_RATE_LIMIT_MAX".to_string(),
                "must be greater than zero".to_string(),
            )
        })?;

        let sweep = get_optional_env("CHECKOUT_RESERVATION_SWEEP_SECS")
            .map(|raw| {
                raw.parse::<u64>().map_err(|e| {
                    ConfigError::InvalidEnvVar(
                        "CHECKOUT_RESERVATION_SWEEP_SECS".to_string(),
                        e.to_string(),
                    )
                })
            })
            .transpose()?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            rate_limit_max,
            rate_limit_window: secs_env("CHECKOUT_RATE_LIMIT_WINDOW_SECS", 60)?,
            idempotency_ttl: secs_env("CHECKOUT_IDEMPOTENCY_TTL_HOURS", 24)?
                .saturating_mul(60 * 60),
            reservation_ttl: secs_env("CHECKOUT_RESERVATION_TTL_MINUTES", 15)?.saturating_mul(60),
            router_timeout: secs_env("CHECKOUT_ROUTER_TIMEOUT_SECS", 20)?,
            provider_timeout: secs_env("CHECKOUT_PROVIDER_TIMEOUT_SECS", 10)?,
            reservation_sweep_interval: sweep,
            webhook_max_attempts: parse_env("CHECKOUT_WEBHOOK_MAX_ATTEMPTS", "3")?,
            webhook_retry_base: defaults.webhook_retry_base,
        })
    }
}

impl StripeConfig {
    const DEFAULT_API_BASE: &'static str = "https://api.stripe.com";

    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(secret_key) = get_optional_env("STRIPE_SECRET_KEY") else {
            return Ok(None);
        };
        validate_secret_strength(&secret_key, "STRIPE_SECRET_KEY")?;

        Ok(Some(Self {
            secret_key: SecretString::from(secret_key),
            webhook_secret: get_validated_secret("STRIPE_WEBHOOK_SECRET")?,
            api_base: get_env_or_default("STRIPE_API_BASE", Self::DEFAULT_API_BASE),
        }))
    }
}

impl YampiConfig {
    const DEFAULT_API_BASE: &'static str = "https://api.dooki.com.br/v2";

    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(alias) = get_optional_env("YAMPI_ALIAS") else {
            return Ok(None);
        };

        Ok(Some(Self {
            alias,
            user_token: get_validated_secret("YAMPI_USER_TOKEN")?,
            secret_key: get_validated_secret("YAMPI_SECRET_KEY")?,
            webhook_secret: get_validated_secret("YAMPI_WEBHOOK_SECRET")?,
            api_base: get_env_or_default("YAMPI_API_BASE", Self::DEFAULT_API_BASE),
        }))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a whole-number environment variable into a `Duration` of that many seconds.
fn secs_env(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let value = parse_env::<u64>(key, &default.to_string())?;
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(value))
}

/// Validate that a token meets minimum length requirements.
fn validate_token_length(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SERVICE_TOKEN_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SERVICE_TOKEN_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)]
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
