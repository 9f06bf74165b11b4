//! Circuit breaker shared by every request the Yahoo client makes.
//!
//! A 403 opens it at once; 429s and server errors open it after
//! [`CircuitBreaker::DEFAULT_FAILURE_THRESHOLD`] in a row. While open, the
//! provider reports itself unavailable and the batch fetcher stops early.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    /// Refusing requests until `tripped_at + cooldown`.
    Open { tripped_at: Instant },
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
}

/// Closed/open switch with a cooldown. `Sync`, so one instance can back a shared provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

    pub fn new(cooldown: Duration) -> Self {
        Self::with_threshold(cooldown, Self::DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_threshold(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    // The guarded data is two plain fields, always left consistent.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if requests are currently allowed. Closes the breaker once the
    /// cooldown has elapsed.
    pub fn is_allowed(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open { tripped_at } => {
                if tripped_at.elapsed() >= self.cooldown {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn record_success(&self) {
        self.lock().consecutive_failures = 0;
    }

    /// Record a failure. Opens the breaker once the threshold is reached.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open {
                tripped_at: Instant::now(),
            };
        }
    }

    /// Open now, regardless of the failure count.
    pub fn trip(&self) {
        self.lock().state = BreakerState::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Zero while closed.
    pub fn remaining_cooldown(&self) -> Duration {
        match self.lock().state {
            BreakerState::Closed => Duration::ZERO,
            BreakerState::Open { tripped_at } => {
                self.cooldown.saturating_sub(tripped_at.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Duration::from_secs(60))
    }

    #[test]
    fn fresh_breaker_lets_requests_through() {
        let cb = breaker();
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), BreakerState::Closed);
        assert_eq!(cb.remaining_cooldown(), Duration::ZERO);
    }

    #[test]
    fn third_throttle_in_a_row_opens() {
        let cb = breaker();
        for _ in 0..2 {
            cb.record_failure();
        }
        assert!(cb.is_allowed(), "two throttles stay under the threshold");

        cb.record_failure();
        assert!(!cb.is_allowed());
        assert!(matches!(cb.state(), BreakerState::Open { .. }));
        let left = cb.remaining_cooldown();
        assert!(left > Duration::from_secs(59) && left <= Duration::from_secs(60));
    }

    #[test]
    fn threshold_of_one_opens_on_first_failure() {
        let cb = CircuitBreaker::with_threshold(Duration::from_secs(60), 1);
        cb.record_failure();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn zero_threshold_is_clamped_to_one() {
        let cb = CircuitBreaker::with_threshold(Duration::from_secs(60), 0);
        assert!(cb.is_allowed());
        cb.record_failure();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn ban_opens_without_prior_failures() {
        let cb = breaker();
        cb.trip();
        assert!(!cb.is_allowed());
    }

    #[test]
    fn interleaved_success_keeps_it_closed() {
        let cb = breaker();
        for _ in 0..5 {
            cb.record_failure();
            cb.record_failure();
            cb.record_success();
        }
        assert!(cb.is_allowed());
    }

    #[test]
    fn cooldown_expiry_closes_and_forgets_failures() {
        let cb = CircuitBreaker::new(Duration::from_millis(10));
        cb.record_failure();
        cb.record_failure();
        cb.trip();
        assert!(!cb.is_allowed());

        std::thread::sleep(Duration::from_millis(15));
        assert!(cb.is_allowed());
        assert_eq!(cb.state(), BreakerState::Closed);

        // Counter restarted: one more failure does not reopen it.
        cb.record_failure();
        assert!(cb.is_allowed());
    }
}
