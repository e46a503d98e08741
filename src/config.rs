//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the devvisor runtime.
//!
//! Config is consumed by:
//! 1. **Runtime creation**: `Runtime::builder(config)`
//! 2. **Health checker**: breaker, rate limiter and cache knobs
//! 3. **Orchestrator**: per-action timeout
//!
//! ## Sentinel values
//! Every optional feature defaults to "disabled", so base behavior is a plain
//! check-and-report loop:
//! - `breaker.enabled = false` → no circuit breaker
//! - `rate_limit = 0` → unlimited (no bucket state kept)
//! - `rate_burst = 0` → burst sized at `2 × rate_limit`
//! - `cache_ttl = 0s` → no result caching
//! - `task_timeout = 0s` → orchestrator actions run unbounded
//! - `poll_interval = 0s` → no streaming health loops

use std::time::Duration;

/// Circuit breaker settings, evaluated independently per service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Whether the breaker is consulted at all.
    pub enabled: bool,
    /// Consecutive failures that open the circuit (min 1).
    pub failure_threshold: u32,
    /// Time spent `open` before one trial check is let through.
    pub recovery_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Global configuration for the devvisor runtime.
///
/// ## Field semantics
/// - `grace`: Maximum wait for every service and loop to stop after cancellation
/// - `stop_grace`: Per-process window between SIGINT and SIGKILL
/// - `task_timeout`: Hard bound on one orchestrator action (`0s` = unbounded)
/// - `check_timeout`: Bound on a single health probe
/// - `poll_interval`: Streaming health-check period (`0s` = no polling)
/// - `breaker`: Circuit breaker knobs
/// - `rate_limit` / `rate_burst`: Token bucket per service (`0` = unlimited)
/// - `cache_ttl`: Health result cache lifetime (`0s` = disabled)
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `outbox_capacity`: Per-subscriber snapshot outbox size (min 1)
///
/// ## Notes
/// All fields are public; the surrounding CLI layer fills them from flags.
/// Prefer the helper accessors to avoid sprinkling sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum time to wait for graceful shutdown of the whole runtime.
    ///
    /// When the run context is cancelled:
    /// - every service receives a termination request
    /// - every polling loop exits
    /// - the runtime waits up to `grace`, then returns `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// Time a single process gets between SIGINT and SIGKILL.
    pub stop_grace: Duration,

    /// Upper bound on one orchestrator action.
    pub task_timeout: Duration,

    /// Upper bound on one health probe.
    pub check_timeout: Duration,

    /// Interval between streaming health checks.
    pub poll_interval: Duration,

    /// Circuit breaker configuration.
    pub breaker: BreakerConfig,

    /// Health checks per second and per service.
    pub rate_limit: f64,

    /// Token bucket capacity.
    pub rate_burst: u32,

    /// Health result cache lifetime.
    pub cache_ttl: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow receivers that lag behind more than `bus_capacity` messages
    /// observe `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Number of pending snapshots kept per broadcast subscriber.
    pub outbox_capacity: usize,
}

impl Config {
    /// Returns the breaker configuration if enabled.
    #[inline]
    pub fn breaker(&self) -> Option<BreakerConfig> {
        if self.breaker.enabled {
            Some(BreakerConfig {
                failure_threshold: self.breaker.failure_threshold.max(1),
                ..self.breaker
            })
        } else {
            None
        }
    }

    /// Returns `(rate, burst)` for the token bucket, or `None` when unlimited.
    ///
    /// A zero burst is sized as `2 × rate`, never below one token.
    #[inline]
    pub fn rate_limit(&self) -> Option<(f64, u32)> {
        if !(self.rate_limit.is_finite() && self.rate_limit > 0.0) {
            return None;
        }
        let burst = if self.rate_burst == 0 {
            ((self.rate_limit * 2.0).ceil() as u32).max(1)
        } else {
            self.rate_burst
        };
        Some((self.rate_limit, burst))
    }

    /// Returns the cache TTL, or `None` when caching is disabled.
    #[inline]
    pub fn cache_ttl(&self) -> Option<Duration> {
        (!self.cache_ttl.is_zero()).then_some(self.cache_ttl)
    }

    /// Returns the orchestrator action timeout, or `None` when unbounded.
    #[inline]
    pub fn task_timeout(&self) -> Option<Duration> {
        (!self.task_timeout.is_zero()).then_some(self.task_timeout)
    }

    /// Returns the polling interval, or `None` when polling is disabled.
    #[inline]
    pub fn poll_interval(&self) -> Option<Duration> {
        (!self.poll_interval.is_zero()).then_some(self.poll_interval)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - `stop_grace = 5s`
    /// - `task_timeout = 10min`
    /// - `check_timeout = 5s`
    /// - `poll_interval = 5s`
    /// - `breaker` disabled (threshold 5, recovery 60s once enabled)
    /// - `rate_limit = 0` (unlimited), `rate_burst = 0` (auto)
    /// - `cache_ttl = 0s` (disabled)
    /// - `bus_capacity = 1024`, `outbox_capacity = 16`
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            stop_grace: Duration::from_secs(5),
            task_timeout: Duration::from_secs(600),
            check_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            breaker: BreakerConfig::default(),
            rate_limit: 0.0,
            rate_burst: 0,
            cache_ttl: Duration::ZERO,
            bus_capacity: 1024,
            outbox_capacity: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_optional_features_off() {
        let cfg = Config::default();
        assert!(cfg.breaker().is_none());
        assert!(cfg.rate_limit().is_none());
        assert!(cfg.cache_ttl().is_none());
        assert_eq!(cfg.task_timeout(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn burst_defaults_to_twice_the_rate() {
        let cfg = Config {
            rate_limit: 2.5,
            ..Config::default()
        };
        assert_eq!(cfg.rate_limit(), Some((2.5, 5)));

        let cfg = Config {
            rate_limit: 0.1,
            ..Config::default()
        };
        assert_eq!(cfg.rate_limit(), Some((0.1, 1)));
    }

    #[test]
    fn explicit_burst_wins() {
        let cfg = Config {
            rate_limit: 1.0,
            rate_burst: 5,
            ..Config::default()
        };
        assert_eq!(cfg.rate_limit(), Some((1.0, 5)));
    }

    #[test]
    fn breaker_threshold_is_at_least_one() {
        let cfg = Config {
            breaker: BreakerConfig {
                enabled: true,
                failure_threshold: 0,
                recovery_timeout: Duration::from_secs(1),
            },
            ..Config::default()
        };
        assert_eq!(cfg.breaker().map(|b| b.failure_threshold), Some(1));
    }

    #[test]
    fn zero_durations_disable_features() {
        let cfg = Config {
            task_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
            bus_capacity: 0,
            ..Config::default()
        };
        assert!(cfg.task_timeout().is_none());
        assert!(cfg.poll_interval().is_none());
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }
}
