//! Adaptive circuit breaker for one named upstream dependency.
//!
//! ```text
//!            failures >= threshold             reset timeout elapsed
//!  Closed ───────────────────────────▶ Open ───────────────────────▶ HalfOpen
//!    ▲                                  ▲                              │
//!    │        N probe successes         │         any failure          │
//!    └──────────────────────────────────┼──────────────────────────────┘
//!                                       └──────────────────────────────┘
//! ```
//!
//! Every transition into `Open` multiplies the reset timeout used for the
//! *next* opening by `backoff_multiplier` (capped at `max_reset_timeout`);
//! closing restores the base value. Transitions are evaluated lazily when a
//! call arrives, so the breaker owns no timers or background tasks.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Rolling-window samples are capped so a busy hour cannot grow memory unbounded.
const MAX_OUTCOME_SAMPLES: usize = 4_096;

/// Runtime circuit state for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Display for CircuitState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Rolling success-rate window driving the adaptive failure threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptiveThreshold {
    pub window: Duration,
    pub min_samples: usize,
}

impl Default for AdaptiveThreshold {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60 * 60),
            min_samples: 10,
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub max_reset_timeout: Duration,
    pub backoff_multiplier: f64,
    pub half_open_success_threshold: u32,
    /// Upper bound for a single wrapped call.
    pub call_timeout: Duration,
    pub adaptive: Option<AdaptiveThreshold>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            max_reset_timeout: Duration::from_secs(30 * 60),
            backoff_multiplier: 2.0,
            half_open_success_threshold: 2,
            call_timeout: Duration::from_secs(30),
            adaptive: Some(AdaptiveThreshold::default()),
        }
    }
}

/// Error surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerError<E> {
    /// Fail-fast rejection; the wrapped call was not invoked.
    Open { name: String, retry_in: Duration },
    /// The wrapped call exceeded `call_timeout` and was dropped.
    Timeout { name: String, after: Duration },
    /// The wrapped call itself failed.
    Inner(E),
}

impl<E: Display> Display for BreakerError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open { name, retry_in } => write!(
                f,
                "circuit '{name}' is open; service unavailable, retry in {:.1}s",
                retry_in.as_secs_f64()
            ),
            Self::Timeout { name, after } => write!(
                f,
                "call through circuit '{name}' timed out after {}ms",
                after.as_millis()
            ),
            Self::Inner(error) => error.fmt(f),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for BreakerError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(error) => Some(error),
            _ => None,
        }
    }
}

/// Point-in-time view for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub effective_failure_threshold: u32,
    pub reset_timeout: Duration,
    pub samples: usize,
    pub success_rate: Option<f64>,
}

#[derive(Debug)]
struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    last_failure_at: Option<Instant>,
    /// Wait applied to the current open period.
    open_for: Duration,
    /// Wait the next opening will use.
    next_reset_timeout: Duration,
    effective_threshold: u32,
    outcomes: VecDeque<(Instant, bool)>,
}

impl CircuitInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            last_failure_at: None,
            open_for: config.reset_timeout,
            next_reset_timeout: config.reset_timeout,
            effective_threshold: config.failure_threshold.max(1),
            outcomes: VecDeque::new(),
        }
    }

    fn success_rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let successes = self.outcomes.iter().filter(|(_, ok)| *ok).count();
        Some(successes as f64 / self.outcomes.len() as f64)
    }
}

/// Thread-safe circuit breaker guarding one upstream dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new("upstream", CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = CircuitInner::new(&config);
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            warn!(circuit = %self.name, "circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Runs `call` through the breaker; every error counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, call: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(call, |_| true).await
    }

    /// Runs `call` through the breaker. Errors for which `counts_as_failure`
    /// returns `false` mean the dependency answered, and are recorded as a
    /// healthy outcome while still being returned to the caller.
    pub async fn execute_with<T, E, F, Fut, C>(
        &self,
        call: F,
        counts_as_failure: C,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: FnOnce(&E) -> bool,
    {
        self.try_acquire().map_err(|retry_in| BreakerError::Open {
            name: self.name.clone(),
            retry_in,
        })?;

        match tokio::time::timeout(self.config.call_timeout, call()).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                if counts_as_failure(&error) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(BreakerError::Inner(error))
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: self.config.call_timeout,
                })
            }
        }
    }

    /// Admission check, performing the Open -> HalfOpen transition once the
    /// reset timeout has elapsed. Returns the remaining wait when rejected.
    fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::MAX);

                if elapsed >= inner.open_for {
                    info!(circuit = %self.name, "circuit transitioning from open to half_open");
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    Ok(())
                } else {
                    Err(inner.open_for - elapsed)
                }
            }
        }
    }

    pub fn allow_request(&self) -> bool {
        self.try_acquire().is_ok()
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        self.push_outcome(&mut inner, true);

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes = inner.half_open_successes.saturating_add(1);
                debug!(
                    circuit = %self.name,
                    successes = inner.half_open_successes,
                    required = self.config.half_open_success_threshold,
                    "half_open probe succeeded"
                );
                if inner.half_open_successes >= self.config.half_open_success_threshold.max(1) {
                    info!(circuit = %self.name, "circuit closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.last_failure_at = None;
                    inner.open_for = self.config.reset_timeout;
                    inner.next_reset_timeout = self.config.reset_timeout;
                }
            }
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        self.push_outcome(&mut inner, false);
        inner.last_failure_at = Some(Instant::now());
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= inner.effective_threshold {
                    self.trip(&mut inner);
                }
            }
            CircuitState::HalfOpen => self.trip(&mut inner),
            CircuitState::Open => {}
        }
    }

    fn trip(&self, inner: &mut CircuitInner) {
        inner.state = CircuitState::Open;
        inner.half_open_successes = 0;
        inner.open_for = inner.next_reset_timeout;

        let scaled = inner
            .next_reset_timeout
            .as_secs_f64()
            * self.config.backoff_multiplier.max(1.0);
        let capped = scaled.min(self.config.max_reset_timeout.as_secs_f64());
        inner.next_reset_timeout = Duration::try_from_secs_f64(capped)
            .unwrap_or(self.config.max_reset_timeout)
            .max(self.config.reset_timeout);

        warn!(
            circuit = %self.name,
            consecutive_failures = inner.consecutive_failures,
            open_for_ms = inner.open_for.as_millis() as u64,
            "circuit opened"
        );
    }

    fn push_outcome(&self, inner: &mut CircuitInner, success: bool) {
        let Some(adaptive) = self.config.adaptive else {
            return;
        };

        let now = Instant::now();
        inner.outcomes.push_back((now, success));
        while inner.outcomes.len() > MAX_OUTCOME_SAMPLES {
            inner.outcomes.pop_front();
        }
        while let Some((at, _)) = inner.outcomes.front() {
            if now.duration_since(*at) > adaptive.window {
                inner.outcomes.pop_front();
            } else {
                break;
            }
        }

        let base = self.config.failure_threshold.max(1);
        inner.effective_threshold = if inner.outcomes.len() < adaptive.min_samples {
            base
        } else {
            inner
                .success_rate()
                .map(|rate| adaptive_threshold(base, rate))
                .unwrap_or(base)
        };
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn effective_failure_threshold(&self) -> u32 {
        self.lock().effective_threshold
    }

    /// Wait that applies to the current open period, or to the next one when
    /// the circuit is not open.
    pub fn current_reset_timeout(&self) -> Duration {
        let inner = self.lock();
        match inner.state {
            CircuitState::Open => inner.open_for,
            CircuitState::Closed | CircuitState::HalfOpen => inner.next_reset_timeout,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            effective_failure_threshold: inner.effective_threshold,
            reset_timeout: match inner.state {
                CircuitState::Open => inner.open_for,
                _ => inner.next_reset_timeout,
            },
            samples: inner.outcomes.len(),
            success_rate: inner.success_rate(),
        }
    }

    /// Drops the outcome history and returns to the initial closed state.
    ///
    /// There are no timers to cancel: open/half-open transitions are checked
    /// when calls arrive.
    pub fn cleanup(&self) {
        let mut inner = self.lock();
        *inner = CircuitInner::new(&self.config);
    }
}

/// Effective failure threshold for a rolling success rate in `[0, 1]`.
pub fn adaptive_threshold(base: u32, success_rate: f64) -> u32 {
    if success_rate > 0.95 {
        base.saturating_add(2)
    } else if success_rate >= 0.85 {
        base
    } else if success_rate >= 0.70 {
        base.saturating_sub(1).max(3)
    } else {
        (base / 2).max(2)
    }
}
