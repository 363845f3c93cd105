//! Reconnect delay policy

use rand::Rng;
use std::time::Duration;

/// Delay between reconnect attempts.
///
/// Fixed by default. With `exponential` set, the delay doubles per
/// consecutive failure up to `max`. Jitter spreads each delay uniformly over
/// `delay * (1 ± jitter_ratio)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    exponential: bool,
    jitter_ratio: f64,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            max: delay,
            exponential: false,
            jitter_ratio: 0.0,
        }
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            exponential: true,
            jitter_ratio: 0.0,
        }
    }

    pub fn with_jitter(mut self, ratio: f64) -> Self {
        self.jitter_ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    /// Delay before the attempt following `failures` consecutive failures,
    /// without jitter
    pub fn base_delay(&self, failures: u32) -> Duration {
        if !self.exponential {
            return self.base;
        }

        let exponent = failures.saturating_sub(1).min(16) as i32;
        let secs = self.base.as_secs_f64() * 2.0_f64.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }

    /// Delay to actually wait, jitter applied
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        if self.jitter_ratio == 0.0 || base.is_zero() {
            return base;
        }

        let secs = base.as_secs_f64();
        let spread = secs * self.jitter_ratio;
        let jittered = rand::thread_rng().gen_range((secs - spread)..=(secs + spread));
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}
