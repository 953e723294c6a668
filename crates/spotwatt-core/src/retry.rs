//! Retry logic with exponential backoff and jitter.

use std::time::Duration;

/// Exponential delay for `attempt` (0-based): `base * 2^attempt`, scaled by a
/// jitter factor in `[0.5, 1.0)` derived from `jitter_unit` (`[0, 1)`), capped
/// at `cap`.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration, jitter_unit: f64) -> Duration {
    let scale = 2_f64.powi(attempt.min(62) as i32);
    let factor = 0.5 + 0.5 * jitter_unit.clamp(0.0, 1.0);
    let seconds = base.as_secs_f64() * scale * factor;
    let capped = seconds.min(cap.as_secs_f64());
    Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(cap)
}

/// Parses a `Retry-After` header given in delta-seconds.
///
/// HTTP-date values are not honoured; callers fall back to computed backoff.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds = value.trim().parse::<f64>().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Configuration for the automatic retry mechanism.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Enables or disables the retry mechanism.
    pub enabled: bool,
    /// The maximum number of retries to attempt.
    /// Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further attempt.
    pub base_delay: Duration,
    /// Upper bound on any single wait, including server-provided ones.
    pub max_delay: Duration,
    /// Whether to retry on request timeouts.
    pub retry_on_timeout: bool,
    /// Whether to retry on connection errors.
    pub retry_on_connect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            retry_on_timeout: true,
            retry_on_connect: true,
        }
    }
}

impl RetryConfig {
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Disable retries.
    pub fn no_retry() -> Self {
        Self {
            enabled: false,
            max_retries: 0,
            ..Self::default()
        }
    }

    pub const fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// 429 and every 5xx are worth another attempt.
    pub const fn should_retry_status(&self, status: u16) -> bool {
        status == 429 || (status >= 500 && status < 600)
    }

    /// Wait before retry number `attempt` (0-based). A server-provided
    /// `Retry-After` wins over computed backoff; both respect `max_delay`.
    pub fn delay_for_attempt(
        &self,
        attempt: u32,
        retry_after: Option<Duration>,
        rng: &mut fastrand::Rng,
    ) -> Duration {
        match retry_after {
            Some(server_delay) => server_delay.min(self.max_delay),
            None => backoff_delay(self.base_delay, attempt, self.max_delay, rng.f64()),
        }
    }
}
