//! Rate limiting and circuit breaking for the AI synthesis backend (§4.8:
//! "all AI calls go through a rate-limiter + circuit-breaker"). A token
//! bucket bounds sustained call rate; the breaker trips after consecutive
//! failures and self-heals through a half-open probe.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl RateLimiterConfig {
    pub fn from_per_minute(requests_per_minute: u32) -> Self {
        Self { requests_per_minute, burst_size: requests_per_minute.max(1).min(10) }
    }
}

/// Token bucket keyed to a per-minute budget rather than per-second, since
/// `AiConfig::rate_limit_per_minute` is the unit the rest of the config
/// layer speaks.
pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    tokens: Mutex<f64>,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            capacity: config.burst_size as f64,
            refill_per_sec: config.requests_per_minute as f64 / 60.0,
            tokens: Mutex::new(config.burst_size as f64),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut tokens = self.tokens.lock().expect("rate limiter poisoned");
        let mut last_refill = self.last_refill.lock().expect("rate limiter poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(*last_refill).as_secs_f64();
        *tokens = (*tokens + elapsed * self.refill_per_sec).min(self.capacity);
        *last_refill = now;

        if *tokens >= 1.0 {
            *tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(30) }
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    failure_count: AtomicU32,
    last_state_change: Mutex<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            last_state_change: Mutex::new(Instant::now()),
        }
    }

    pub fn allow_request(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker poisoned");
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let last_change = *self.last_state_change.lock().expect("circuit breaker poisoned");
                if last_change.elapsed() >= self.config.reset_timeout {
                    *state = CircuitState::HalfOpen;
                    *self.last_state_change.lock().expect("circuit breaker poisoned") = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker poisoned");
        self.failure_count.store(0, Ordering::Relaxed);
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            *self.last_state_change.lock().expect("circuit breaker poisoned") = Instant::now();
        }
    }

    pub fn record_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock().expect("circuit breaker poisoned");
        match *state {
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                *state = CircuitState::Open;
                *self.last_state_change.lock().expect("circuit breaker poisoned") = Instant::now();
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.last_state_change.lock().expect("circuit breaker poisoned") = Instant::now();
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        *self.state.lock().expect("circuit breaker poisoned")
    }

    /// Time remaining before an `Open` breaker allows its next half-open
    /// probe. `None` when the breaker isn't open, or the timeout already
    /// elapsed (the next `allow_request` will transition it itself).
    pub fn time_to_recovery(&self) -> Option<Duration> {
        let state = self.state.lock().expect("circuit breaker poisoned");
        if *state != CircuitState::Open {
            return None;
        }
        let elapsed = self.last_state_change.lock().expect("circuit breaker poisoned").elapsed();
        self.config.reset_timeout.checked_sub(elapsed).filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_exhausts_burst_then_recovers_by_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig { requests_per_minute: 60, burst_size: 2 });
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn breaker_opens_after_threshold_and_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            reset_timeout: Duration::from_millis(0),
        });
        assert!(breaker.allow_request());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
