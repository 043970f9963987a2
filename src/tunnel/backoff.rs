//! Readiness-probe schedule for a freshly spawned tunnel.
//!
//! The delay before probe `n` is `first × factor^n`, clamped to `max`. Each
//! delay is derived from the attempt number alone, so the schedule is fixed and
//! the whole wait is bounded by `retries` probes.

use std::time::Duration;

/// Bounded exponential backoff for status-API polling.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeBackoff {
    /// Delay before the first probe.
    pub first: Duration,
    /// Multiplicative growth factor (`>= 1.0`).
    pub factor: f64,
    /// Delay cap.
    pub max: Duration,
    /// Number of probes before giving up.
    pub retries: u32,
}

impl Default for ProbeBackoff {
    /// 2s, 3s, 4.5s, 6.75s, 8s.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(2),
            factor: 1.5,
            max: Duration::from_secs(8),
            retries: 5,
        }
    }
}

impl ProbeBackoff {
    /// Delay before probe `attempt` (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.factor.max(1.0);
        #[allow(clippy::cast_possible_wrap)]
        let scaled = self.first.as_secs_f64() * factor.powi(attempt as i32);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(scaled)
    }

    /// Sum of all delays, i.e. the longest a start attempt can wait.
    pub fn budget(&self) -> Duration {
        (0..self.retries).map(|n| self.delay(n)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule() {
        let b = ProbeBackoff::default();
        assert_eq!(b.delay(0), Duration::from_secs(2));
        assert_eq!(b.delay(1), Duration::from_secs(3));
        assert_eq!(b.delay(2), Duration::from_millis(4500));
        assert_eq!(b.delay(3), Duration::from_millis(6750));
        assert_eq!(b.delay(4), Duration::from_secs(8));
        assert_eq!(b.delay(40), Duration::from_secs(8));
    }

    #[test]
    fn test_budget_is_bounded() {
        let b = ProbeBackoff::default();
        assert_eq!(b.budget(), Duration::from_millis(24_250));
    }

    #[test]
    fn test_factor_below_one_is_constant() {
        let b = ProbeBackoff {
            first: Duration::from_millis(100),
            factor: 0.5,
            max: Duration::from_secs(1),
            retries: 3,
        };
        assert_eq!(b.delay(2), Duration::from_millis(100));
    }
}
