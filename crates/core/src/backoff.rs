//! Exponential backoff for dispatch retries.
//!
//! The delay before retry `n` is `initial_delay * multiplier^(n-1)`, clamped
//! to `max_delay`, with up to `jitter` (a fraction of the delay) randomly
//! subtracted so that jobs failing together do not retry in lockstep.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of the delay (0.0..=1.0) that may be randomly shaved off.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Un-jittered delay before retry number `attempt` (1-based).
pub fn delay_for_attempt(attempt: u32, config: &BackoffConfig) -> Duration {
    let mut delay = config.initial_delay.min(config.max_delay);
    for _ in 1..attempt {
        delay = next_delay(delay, config);
        if delay >= config.max_delay {
            break;
        }
    }
    delay
}

/// Delay before retry `attempt` with jitter applied.
pub fn jittered_delay(attempt: u32, config: &BackoffConfig) -> Duration {
    let base = delay_for_attempt(attempt, config);
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || base.is_zero() {
        return base;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=1.0);
    base.mul_f64(factor)
}
