//! Retry budget and backoff between attempts on the same provider.

use std::time::Duration;

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    Fixed {
        delay: Duration,
    },
    /// `step * attempt`, where `attempt` is the 1-based attempt that just failed.
    Linear {
        step: Duration,
    },
    /// `base * factor^(attempt - 1)`, capped at `max`, with optional +/- 50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Linear {
            step: Duration::from_millis(1_000),
        }
    }
}

impl Backoff {
    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay(self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Fixed { delay } => delay,
            Self::Linear { step } => step.saturating_mul(attempt),
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt.saturating_sub(1) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds.max(0.0));
                if !jitter {
                    return delay;
                }

                let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                let offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = delay.as_millis() as i64 + offset as i64 - jitter_ms as i64;
                Duration::from_millis(total_ms.max(0) as u64)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Total attempts on the selected provider, including the first.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::default(),
        }
    }
}

impl RetryConfig {
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear { step },
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Fixed {
                delay: Duration::ZERO,
            },
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }
}
