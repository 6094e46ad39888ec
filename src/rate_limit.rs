//! Client-side throttle for outbound REST calls.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
        }
    }
}

/// Shared limiter, one per upstream API
pub type GlobalRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter. A zero quota falls back to one request per minute.
pub fn create_rate_limiter(config: &RateLimiterConfig) -> GlobalRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or_else(|| {
        tracing::warn!("Rate limit of 0 requests/minute is invalid, using 1");
        NonZeroU32::MIN
    });
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Wait until the limiter lets one more request through.
pub async fn throttle(limiter: &GlobalRateLimiter) {
    if limiter.check().is_err() {
        tracing::debug!("Outbound rate limit reached, waiting");
        limiter.until_ready().await;
    }
}
