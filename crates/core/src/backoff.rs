//! Exponential backoff with jitter.
//!
//! Used by [`ReadinessGate`](crate::gate::ReadinessGate) between probe
//! attempts and by ledger implementations that poll for a lock.

use std::time::Duration;

use rand::Rng;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on the delay between attempts.
    pub cap: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of each delay (0.0..=1.0) that may be randomly shaved off.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(200),
            cap: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// A policy with the same delays and no randomness.
    pub fn without_jitter(self) -> Self {
        Self {
            jitter: 0.0,
            ..self
        }
    }

    /// Un-jittered delay before retry number `retry` (0-based).
    ///
    /// The result is `base * multiplier^retry`, clamped to [`Self::cap`].
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            return self.cap;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Delay before retry number `retry` with random jitter applied.
    pub fn jittered(&self, retry: u32) -> Duration {
        if self.jitter <= 0.0 {
            return self.delay(retry);
        }
        let sample: f64 = rand::rng().random();
        self.apply_jitter(self.delay(retry), sample)
    }

    /// Shave `sample * jitter` of `delay` off, with `sample` in `[0, 1)`.
    fn apply_jitter(&self, delay: Duration, sample: f64) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        delay.mul_f64(1.0 - jitter * sample.clamp(0.0, 1.0))
    }
}
