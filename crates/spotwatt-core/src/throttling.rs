use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Client-side pacing so bursts of chunked requests stay under the
/// provider's published quota.
#[derive(Clone)]
pub struct RequestPacer {
    limiter: Option<Arc<DirectRateLimiter>>,
}

impl std::fmt::Debug for RequestPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPacer")
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl RequestPacer {
    /// Allow at most `quota_limit` requests per `quota_window`, bursting up to
    /// the full limit.
    pub fn new(quota_window: Duration, quota_limit: u32) -> Self {
        Self {
            limiter: quota_from_window(quota_window, quota_limit)
                .map(|quota| Arc::new(RateLimiter::direct(quota))),
        }
    }

    /// Pacer that never waits.
    pub fn unlimited() -> Self {
        Self { limiter: None }
    }

    /// The transparency platform allows 400 requests per minute per token.
    pub fn entsoe_default() -> Self {
        Self::new(Duration::from_secs(60), 400)
    }

    /// Waits until one more request fits in the quota.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Non-blocking variant; `false` when the request would exceed the quota.
    pub fn try_acquire(&self) -> bool {
        self.limiter
            .as_ref()
            .map(|limiter| limiter.check().is_ok())
            .unwrap_or(true)
    }
}

impl Default for RequestPacer {
    fn default() -> Self {
        Self::entsoe_default()
    }
}

fn quota_from_window(quota_window: Duration, quota_limit: u32) -> Option<Quota> {
    let safe_limit = quota_limit.max(1);
    let burst = NonZeroU32::new(safe_limit).unwrap_or(NonZeroU32::MIN);

    let seconds_per_cell = (quota_window.as_secs_f64() / f64::from(safe_limit)).max(0.001);
    let period = Duration::try_from_secs_f64(seconds_per_cell).unwrap_or(Duration::MAX);

    Quota::with_period(period).map(|quota| quota.allow_burst(burst))
}
