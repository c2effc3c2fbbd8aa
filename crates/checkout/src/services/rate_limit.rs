//! Router rate limiting keyed by cart and client IP.
//!
//! A keyed GCRA limiter from `governor`: the burst equals the configured
//! maximum and the bucket refills fully over one window, so with the defaults
//! (30 per 60 s) the 31st rapid request for the same key is denied.
//! Increment-and-check is a single atomic operation per key.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

use pagora_core::CartId;

type Key = (CartId, String);

/// Limiter for `POST /checkout/router`.
pub struct CheckoutRateLimiter {
    limiter: DefaultKeyedRateLimiter<Key>,
}

impl CheckoutRateLimiter {
    /// Allow `max` requests per `window` for each (cart, IP) pair.
    #[must_use]
    pub fn new(max: NonZeroU32, window: Duration) -> Self {
        let quota = Quota::with_period(window / max.get())
            .map_or_else(|| Quota::per_second(max), |quota| quota.allow_burst(max));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Count a request. On denial, returns how long until the next one is allowed.
    ///
    /// # Errors
    ///
    /// Returns the cooldown if the key is over its limit.
    pub fn check(&self, cart_id: CartId, ip: &str) -> Result<(), Duration> {
        self.limiter
            .check_key(&(cart_id, ip.to_string()))
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }

    /// Drop keys whose buckets have fully refilled.
    pub fn prune(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

/// Whole seconds to advertise in `Retry-After`, never less than one.
#[must_use]
pub fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_secs: u64) -> CheckoutRateLimiter {
        CheckoutRateLimiter::new(
            NonZeroU32::new(max).unwrap_or(NonZeroU32::MIN),
            Duration::from_secs(window_secs),
        )
    }

    #[test]
    fn test_thirty_first_request_denied() {
        let limiter = limiter(30, 60);
        let cart = CartId::random();
        for i in 0..30 {
            assert!(limiter.check(cart, "203.0.113.7").is_ok(), "request {i}");
        }
        let wait = limiter.check(cart, "203.0.113.7").unwrap_err();
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(2));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter(1, 60);
        let cart = CartId::random();
        assert!(limiter.check(cart, "203.0.113.7").is_ok());
        assert!(limiter.check(cart, "203.0.113.7").is_err());
        assert!(limiter.check(cart, "198.51.100.1").is_ok());
        assert!(limiter.check(CartId::random(), "203.0.113.7").is_ok());
        assert_eq!(limiter.len(), 3);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(2001)), 3);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }
}
