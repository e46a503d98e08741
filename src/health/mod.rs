//! Health monitoring.
//!
//! ## Contents
//! - [`HealthChecker`] one gated check, or a streaming loop, per service
//! - [`CircuitBreaker`], [`BreakerState`], [`Permit`] per-service failure tracking
//! - [`TokenBucket`] per-service rate limiting
//! - [`CacheEntry`] per-service TTL result cache
//! - [`Probe`], [`StrategyProbe`], [`HttpProbe`], [`TcpProbe`], [`ProcessProbe`] check strategies
//! - [`LivenessSource`] lifecycle view used by process checks

mod breaker;
mod cache;
mod checker;
mod limiter;
mod probe;

pub use breaker::{BreakerState, CircuitBreaker, Permit};
pub use cache::CacheEntry;
pub use checker::{HealthChecker, HealthCheckerBuilder};
pub use limiter::TokenBucket;
pub use probe::{
    HttpProbe, LivenessSource, MAX_BODY_BYTES, ProcessProbe, Probe, StrategyProbe, TcpProbe,
};
