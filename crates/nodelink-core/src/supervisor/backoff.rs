// ── Retry backoff ──
//
// wait(n) = round(min(factor ^ min(n, max_exponent), max_delay))
//
// `n` is the number of consecutive failed attempts since the last
// success. The exponent clamp keeps the power finite; the delay cap keeps
// worst-case recovery latency at one minute by default.

use std::time::Duration;

/// Exponential backoff configuration for reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Growth factor per failed attempt. Default: 1.8.
    pub factor: f64,
    /// Attempts beyond this no longer grow the exponent. Default: 10.
    pub max_exponent: u32,
    /// Upper bound on the wait. Default: 60s.
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            factor: 1.8,
            max_exponent: 10,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// Wait before the next attempt after `tries` consecutive failures,
    /// rounded to whole seconds.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    pub fn delay_for(&self, tries: u32) -> Duration {
        let exponent = i32::try_from(tries.min(self.max_exponent)).unwrap_or(i32::MAX);
        let raw = self.factor.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs(capped.round().max(0.0) as u64)
    }
}
