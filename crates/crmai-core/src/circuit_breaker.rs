use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Per-provider circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct CircuitInner {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open trial call is outstanding. One abandoned for
    /// longer than `open_timeout` no longer blocks the next one.
    trial_started_at: Option<Instant>,
}

impl CircuitInner {
    fn state(&self, open_timeout: Duration) -> CircuitState {
        let probing = self
            .trial_started_at
            .is_some_and(|started| started.elapsed() < open_timeout);
        match self.opened_at {
            None => CircuitState::Closed,
            Some(_) if probing => CircuitState::Open,
            Some(opened_at) if opened_at.elapsed() >= open_timeout => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }
}

/// Stops selecting a provider after repeated consecutive failures.
///
/// Once open, the provider is skipped until `open_timeout` elapses. Exactly one
/// caller may then claim the trial call through [`CircuitBreaker::try_acquire`]; the
/// circuit reads as open while that call is in flight, and its outcome either
/// closes the circuit or re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CircuitInner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the provider may be selected right now. Does not change state.
    pub fn permits(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Claims permission for one call. Half-open admits a single trial call.
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        match inner.state(self.config.open_timeout) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                inner.trial_started_at = Some(Instant::now());
                true
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_started_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trial_failed = inner.trial_started_at.is_some()
            || inner
                .opened_at
                .is_some_and(|opened_at| opened_at.elapsed() >= self.config.open_timeout);
        if trial_failed || inner.consecutive_failures >= self.config.failure_threshold {
            inner.opened_at = Some(Instant::now());
        }
        inner.trial_started_at = None;
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state(self.config.open_timeout)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(60),
        });

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert!(breaker.permits());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.permits());
    }

    #[test]
    fn half_opens_after_timeout_then_closes_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(1),
        });

        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.permits());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn failed_trial_call_reopens() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_millis(20),
        });

        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn half_open_admits_a_single_trial_call() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(50),
        });

        breaker.record_failure();
        assert!(!breaker.try_acquire());
        std::thread::sleep(Duration::from_millis(60));

        assert!(breaker.try_acquire());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire(), "second caller must wait for the trial call");

        breaker.record_success();
        assert!(breaker.try_acquire());
        assert!(breaker.try_acquire());
    }

    #[test]
    fn abandoned_trial_call_expires_after_the_open_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(10),
        });
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.try_acquire());

        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.try_acquire());
    }

    #[test]
    fn success_resets_failure_streak() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(60),
        });

        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
