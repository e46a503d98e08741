//! # Restart delay schedule.
//!
//! [`BackoffPolicy`] spaces out restarts of a crashing service so a broken
//! build or a missing dependency does not turn into a tight spawn loop.
//!
//! The delay before restart `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from `n` alone, so jitter never
//! feeds back into later delays.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use devvisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::exponential(Duration::from_millis(250), Duration::from_secs(4));
//!
//! assert_eq!(backoff.delay(0), Duration::from_millis(250));
//! assert_eq!(backoff.delay(2), Duration::from_secs(1));
//! assert_eq!(backoff.delay(10), Duration::from_secs(4));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart delay schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Growth factor per restart (`1.0` = constant).
    pub factor: f64,
    /// Randomization applied to each delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// `first = 500ms`, `factor = 2.0`, `max = 30s`, no jitter.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Same delay before every restart.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Doubling delays from `first` up to `max`.
    pub fn exponential(first: Duration, max: Duration) -> Self {
        Self {
            first,
            max,
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }

    pub fn with_jitter(mut self, jitter: JitterPolicy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before restart number `restart` (0-indexed).
    pub fn delay(&self, restart: u32) -> Duration {
        let exp = restart.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if secs.is_finite() && secs >= 0.0 && secs <= self.max.as_secs_f64() {
            Duration::from_secs_f64(secs)
        } else {
            self.max
        };
        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_without_jitter() {
        let p = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(30));
        assert_eq!(p.delay(0), Duration::from_millis(100));
        assert_eq!(p.delay(1), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn constant_delay() {
        let p = BackoffPolicy::constant(Duration::from_secs(1));
        for restart in 0..8 {
            assert_eq!(p.delay(restart), Duration::from_secs(1));
        }
    }

    #[test]
    fn first_above_max_is_clamped() {
        let p = BackoffPolicy::exponential(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(p.delay(0), Duration::from_secs(5));
    }

    #[test]
    fn overflow_clamps_to_max() {
        let p = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(p.delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn equal_jitter_stays_in_upper_half() {
        let p = BackoffPolicy::constant(Duration::from_millis(1000)).with_jitter(JitterPolicy::Equal);
        for restart in 0..50 {
            let d = p.delay(restart);
            assert!(d >= Duration::from_millis(500), "{d:?} below half");
            assert!(d <= Duration::from_millis(1000), "{d:?} above base");
        }
    }

    #[test]
    fn full_jitter_never_exceeds_base() {
        let p = BackoffPolicy::exponential(Duration::from_millis(100), Duration::from_secs(30))
            .with_jitter(JitterPolicy::Full);
        for restart in 0..12 {
            let base = Duration::from_millis(100 * 2u64.pow(restart)).min(Duration::from_secs(30));
            assert!(p.delay(restart) <= base);
        }
    }
}
