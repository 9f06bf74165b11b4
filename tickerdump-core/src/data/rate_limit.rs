//! Request pacing strategies.
//!
//! A [`RateLimiter`] only computes how long to wait; the [`Pacer`] owns the
//! limiter and does the sleeping. Keeping the two apart makes the strategies
//! testable against synthetic instants.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Pacing strategy consulted before each symbol is fetched.
pub trait RateLimiter: Send {
    /// Short identifier for logs.
    fn name(&self) -> &'static str;

    /// How long to wait before issuing the next request at `now`.
    /// Calling this consumes the slot.
    fn delay_before(&mut self, now: Instant) -> Duration;

    /// The previous request went through.
    fn record_success(&mut self) {}

    /// The previous request was throttled by the provider.
    fn record_throttled(&mut self) {}
}

/// Constant pause between consecutive requests. Nothing before the first.
#[derive(Debug, Clone)]
pub struct FixedDelay {
    interval: Duration,
    started: bool,
}

impl FixedDelay {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: false,
        }
    }
}

impl RateLimiter for FixedDelay {
    fn name(&self) -> &'static str {
        "fixed_delay"
    }

    fn delay_before(&mut self, _now: Instant) -> Duration {
        if !self.started {
            self.started = true;
            return Duration::ZERO;
        }
        self.interval
    }
}

/// Token bucket: bursts up to `capacity`, then one request per `1/refill_per_sec`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    // May sit in the future when the last slot was handed out with a wait.
    last_refill: Option<Instant>,
}

impl TokenBucket {
    /// `capacity >= 1` and `refill_per_sec > 0` are enforced by [`RateLimitConfig::build`].
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec,
            tokens: capacity,
            last_refill: None,
        }
    }

    pub fn available_tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let last = *self.last_refill.get_or_insert(now);
        if now > last {
            let earned = (now - last).as_secs_f64() * self.refill_per_sec;
            self.tokens = (self.tokens + earned).min(self.capacity);
            self.last_refill = Some(now);
        }
    }
}

impl RateLimiter for TokenBucket {
    fn name(&self) -> &'static str {
        "token_bucket"
    }

    fn delay_before(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Duration::ZERO;
        }

        let queued = self
            .last_refill
            .map_or(Duration::ZERO, |last| last.saturating_duration_since(now));
        let refill = Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
            .unwrap_or(Duration::MAX);
        let wait = queued.saturating_add(refill);
        self.tokens = 0.0;
        // Past the representable range the bucket simply stays empty.
        self.last_refill = Some(now.checked_add(wait).unwrap_or(now));
        wait
    }
}

/// Delay that grows on throttling and shrinks back to `base` on success.
#[derive(Debug, Clone)]
pub struct AdaptiveBackoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter_percent: u32,
    current: Duration,
    started: bool,
}

impl AdaptiveBackoff {
    pub fn new(base: Duration, max: Duration, factor: f64, jitter_percent: u32) -> Self {
        Self {
            base,
            max: max.max(base),
            factor,
            jitter_percent,
            current: base,
            started: false,
        }
    }

    /// Delay before jitter.
    pub fn current(&self) -> Duration {
        self.current
    }
}

impl RateLimiter for AdaptiveBackoff {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    fn delay_before(&mut self, _now: Instant) -> Duration {
        if !self.started {
            self.started = true;
            return Duration::ZERO;
        }
        with_jitter(self.current, self.jitter_percent)
    }

    fn record_success(&mut self) {
        self.current = self.current.div_f64(self.factor).max(self.base);
    }

    fn record_throttled(&mut self) {
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.max, |next| next.min(self.max));
    }
}

fn with_jitter(base: Duration, jitter_percent: u32) -> Duration {
    use rand::Rng;

    if jitter_percent == 0 {
        return base;
    }
    let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    let range = (base_ms.saturating_mul(u64::from(jitter_percent)) / 100).max(1);
    let extra = rand::thread_rng().gen_range(0..range);
    Duration::from_millis(base_ms.saturating_add(extra))
}

/// Invalid pacing parameters.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid rate limit: {0}")]
pub struct InvalidRateLimit(pub String);

/// Serializable pacing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RateLimitConfig {
    /// Sleep a constant number of seconds between symbols.
    FixedDelay {
        #[serde(default = "default_delay_secs")]
        delay_secs: f64,
    },

    /// Allow bursts of `capacity`, refilling `refill_per_sec` tokens per second.
    TokenBucket { capacity: u32, refill_per_sec: f64 },

    /// Start at `base_delay_secs`, multiply by `backoff_factor` when throttled.
    Adaptive {
        #[serde(default = "default_delay_secs")]
        base_delay_secs: f64,
        #[serde(default = "default_max_delay_secs")]
        max_delay_secs: f64,
        #[serde(default = "default_backoff_factor")]
        backoff_factor: f64,
        #[serde(default)]
        jitter_percent: u32,
    },
}

pub const DEFAULT_DELAY_SECS: f64 = 5.0;

/// Slowest token bucket accepted: one token every ~11.6 days.
pub const MIN_REFILL_PER_SEC: f64 = 1e-6;

pub const MAX_BACKOFF_FACTOR: f64 = 100.0;

fn default_delay_secs() -> f64 {
    DEFAULT_DELAY_SECS
}

fn default_max_delay_secs() -> f64 {
    120.0
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig::FixedDelay {
            delay_secs: DEFAULT_DELAY_SECS,
        }
    }
}

fn secs(name: &str, value: f64) -> Result<Duration, InvalidRateLimit> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        InvalidRateLimit(format!(
            "{name} must be a finite, non-negative number of seconds, got {value}"
        ))
    })
}

impl RateLimitConfig {
    /// Validate and build the limiter.
    pub fn build(&self) -> Result<Box<dyn RateLimiter>, InvalidRateLimit> {
        match *self {
            RateLimitConfig::FixedDelay { delay_secs } => {
                Ok(Box::new(FixedDelay::new(secs("delay_secs", delay_secs)?)))
            }
            RateLimitConfig::TokenBucket {
                capacity,
                refill_per_sec,
            } => {
                if capacity == 0 {
                    return Err(InvalidRateLimit("capacity must be at least 1".into()));
                }
                if !(refill_per_sec.is_finite() && refill_per_sec >= MIN_REFILL_PER_SEC) {
                    return Err(InvalidRateLimit(format!(
                        "refill_per_sec must be at least {MIN_REFILL_PER_SEC}, got {refill_per_sec}"
                    )));
                }
                Ok(Box::new(TokenBucket::new(capacity, refill_per_sec)))
            }
            RateLimitConfig::Adaptive {
                base_delay_secs,
                max_delay_secs,
                backoff_factor,
                jitter_percent,
            } => {
                let base = secs("base_delay_secs", base_delay_secs)?;
                let max = secs("max_delay_secs", max_delay_secs)?;
                if !(1.0..=MAX_BACKOFF_FACTOR).contains(&backoff_factor) {
                    return Err(InvalidRateLimit(format!(
                        "backoff_factor must be between 1 and {MAX_BACKOFF_FACTOR}, got {backoff_factor}"
                    )));
                }
                Ok(Box::new(AdaptiveBackoff::new(
                    base,
                    max,
                    backoff_factor,
                    jitter_percent,
                )))
            }
        }
    }
}

/// Owns a limiter and sleeps the current thread as it instructs.
pub struct Pacer {
    limiter: Box<dyn RateLimiter>,
    total_waited: Duration,
}

impl Pacer {
    pub fn new(limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            limiter,
            total_waited: Duration::ZERO,
        }
    }

    /// A pacer that never waits.
    pub fn unpaced() -> Self {
        Self::new(Box::new(FixedDelay::new(Duration::ZERO)))
    }

    /// Block until the limiter allows the next request. Returns the wait.
    pub fn pause(&mut self) -> Duration {
        let wait = self.limiter.delay_before(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(
                limiter = self.limiter.name(),
                wait_ms = wait.as_millis() as u64,
                "pacing before next request"
            );
            std::thread::sleep(wait);
            self.total_waited += wait;
        }
        wait
    }

    pub fn record_success(&mut self) {
        self.limiter.record_success();
    }

    pub fn record_throttled(&mut self) {
        self.limiter.record_throttled();
    }

    pub fn limiter_name(&self) -> &'static str {
        self.limiter.name()
    }

    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_skips_first_request() {
        let mut limiter = FixedDelay::new(Duration::from_secs(5));
        let now = Instant::now();
        assert_eq!(limiter.delay_before(now), Duration::ZERO);
        assert_eq!(limiter.delay_before(now), Duration::from_secs(5));
        assert_eq!(limiter.delay_before(now), Duration::from_secs(5));
    }

    #[test]
    fn token_bucket_allows_burst_then_waits() {
        let mut bucket = TokenBucket::new(2, 0.5);
        let t0 = Instant::now();
        assert_eq!(bucket.delay_before(t0), Duration::ZERO);
        assert_eq!(bucket.delay_before(t0), Duration::ZERO);
        // Empty: one token takes 2s at 0.5 tokens/s.
        assert_eq!(bucket.delay_before(t0), Duration::from_secs(2));
        // Next slot queues behind the previous one.
        assert_eq!(bucket.delay_before(t0), Duration::from_secs(4));
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1, 1.0);
        let t0 = Instant::now();
        assert_eq!(bucket.delay_before(t0), Duration::ZERO);
        let t1 = t0 + Duration::from_secs(3);
        assert_eq!(bucket.delay_before(t1), Duration::ZERO);
        // Refill is capped at capacity, so the 3s gap did not bank extra tokens.
        assert!(bucket.available_tokens() < 1.0);
    }

    #[test]
    fn adaptive_backs_off_and_recovers() {
        let mut limiter = AdaptiveBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            2.0,
            0,
        );
        let now = Instant::now();
        assert_eq!(limiter.delay_before(now), Duration::ZERO);
        assert_eq!(limiter.delay_before(now), Duration::from_secs(1));

        limiter.record_throttled();
        assert_eq!(limiter.current(), Duration::from_secs(2));
        limiter.record_throttled();
        limiter.record_throttled();
        assert_eq!(limiter.current(), Duration::from_secs(5));

        limiter.record_success();
        assert_eq!(limiter.current(), Duration::from_millis(2500));
        for _ in 0..10 {
            limiter.record_success();
        }
        assert_eq!(limiter.current(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_percent() {
        for _ in 0..50 {
            let d = with_jitter(Duration::from_millis(1000), 10);
            assert!(d >= Duration::from_millis(1000));
            assert!(d < Duration::from_millis(1100));
        }
    }

    #[test]
    fn config_default_is_five_second_fixed_delay() {
        assert_eq!(
            RateLimitConfig::default(),
            RateLimitConfig::FixedDelay { delay_secs: 5.0 }
        );
        let limiter = RateLimitConfig::default().build().unwrap();
        assert_eq!(limiter.name(), "fixed_delay");
    }

    #[test]
    fn config_parses_tagged_toml() {
        let cfg: RateLimitConfig =
            toml::from_str("strategy = \"token_bucket\"\ncapacity = 3\nrefill_per_sec = 0.2\n")
                .unwrap();
        assert_eq!(
            cfg,
            RateLimitConfig::TokenBucket {
                capacity: 3,
                refill_per_sec: 0.2
            }
        );

        let cfg: RateLimitConfig = toml::from_str("strategy = \"adaptive\"\n").unwrap();
        match cfg {
            RateLimitConfig::Adaptive {
                base_delay_secs,
                backoff_factor,
                ..
            } => {
                assert_eq!(base_delay_secs, 5.0);
                assert_eq!(backoff_factor, 2.0);
            }
            other => panic!("expected adaptive, got {other:?}"),
        }
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(RateLimitConfig::FixedDelay { delay_secs: -1.0 }.build().is_err());
        assert!(RateLimitConfig::FixedDelay { delay_secs: f64::NAN }.build().is_err());
        assert!(RateLimitConfig::TokenBucket {
            capacity: 0,
            refill_per_sec: 1.0
        }
        .build()
        .is_err());
        assert!(RateLimitConfig::TokenBucket {
            capacity: 1,
            refill_per_sec: 0.0
        }
        .build()
        .is_err());
        assert!(RateLimitConfig::Adaptive {
            base_delay_secs: 1.0,
            max_delay_secs: 10.0,
            backoff_factor: 0.5,
            jitter_percent: 0
        }
        .build()
        .is_err());
    }

    #[test]
    fn config_rejects_out_of_range_rates() {
        assert!(RateLimitConfig::TokenBucket {
            capacity: 1,
            refill_per_sec: 1e-300
        }
        .build()
        .is_err());
        assert!(RateLimitConfig::Adaptive {
            base_delay_secs: 1.0,
            max_delay_secs: 10.0,
            backoff_factor: 1e300,
            jitter_percent: 0
        }
        .build()
        .is_err());
    }

    #[test]
    fn tiny_refill_rate_saturates_instead_of_panicking() {
        let mut bucket = TokenBucket::new(1, 1e-300);
        let now = Instant::now();
        assert_eq!(bucket.delay_before(now), Duration::ZERO);
        assert_eq!(bucket.delay_before(now), Duration::MAX);
        assert_eq!(bucket.delay_before(now), Duration::MAX);
    }

    #[test]
    fn huge_backoff_factor_caps_at_max() {
        let mut limiter = AdaptiveBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            1e300,
            0,
        );
        limiter.record_throttled();
        assert_eq!(limiter.current(), Duration::from_secs(30));
        limiter.record_throttled();
        assert_eq!(limiter.current(), Duration::from_secs(30));
        limiter.record_success();
        assert_eq!(limiter.current(), Duration::from_secs(1));
    }

    #[test]
    fn unpaced_never_waits() {
        let mut pacer = Pacer::unpaced();
        for _ in 0..3 {
            assert_eq!(pacer.pause(), Duration::ZERO);
        }
        assert_eq!(pacer.total_waited(), Duration::ZERO);
    }
}
