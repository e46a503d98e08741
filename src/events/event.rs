//! # Runtime events emitted by the orchestrator, supervisor and health checker.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Setup events**: orchestrator task flow (started, completed, failed)
//! - **Service events**: process lifecycle transitions and restarts
//! - **Health events**: check results, breaker transitions, polling loops
//! - **Runtime events**: shutdown and environment changes
//!
//! The [`Event`] struct carries optional metadata depending on the kind.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Per-service events are published under that service's lock, so their `seq`
//! order matches the order of transitions.
//!
//! ## Example
//! ```rust
//! use devvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ServiceCrashed)
//!     .with_service("api")
//!     .with_exit_code(Some(101))
//!     .with_reason("exited unexpectedly");
//!
//! assert_eq!(ev.kind, EventKind::ServiceCrashed);
//! assert_eq!(ev.service.as_deref(), Some("api"));
//! assert_eq!(ev.exit_code, Some(101));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::health::BreakerState;
use crate::model::{HealthResult, LifecycleState};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Runtime events ===
    /// Shutdown requested (OS signal or cancelled run context).
    ///
    /// Sets:
    /// - `at`, `seq`
    ShutdownRequested,

    /// Every service and loop stopped within the grace period.
    ///
    /// Sets:
    /// - `at`, `seq`
    AllStoppedWithin,

    /// Grace period exceeded; some units did not stop in time.
    ///
    /// Sets:
    /// - `reason`: comma-separated stuck units
    /// - `at`, `seq`
    GraceExceeded,

    /// Caller reported changed environment variables.
    ///
    /// Sets:
    /// - `keys`: changed variable names
    /// - `at`, `seq`
    EnvironmentChanged,

    // === Setup events ===
    /// Orchestrator action started.
    ///
    /// Sets:
    /// - `service`: task identifier
    TaskStarted,

    /// Orchestrator action finished successfully.
    ///
    /// Sets:
    /// - `service`: task identifier
    TaskCompleted,

    /// Orchestrator action failed or timed out.
    ///
    /// Sets:
    /// - `service`: task identifier
    /// - `reason`: failure message
    TaskFailed,

    // === Service lifecycle events ===
    /// Process is being spawned.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `attempt`: start number (1-based)
    ServiceStarting,

    /// Process spawned and running.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `pid`: OS process identifier
    ServiceRunning,

    /// Termination requested (explicit stop or cancellation).
    ///
    /// Sets:
    /// - `service`: service name
    /// - `pid`: OS process identifier
    ServiceStopping,

    /// Process exited after a stop request, or cleanly on its own.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `exit_code`: exit code when available
    /// - `reason`: `"expected"` or `"unexpected"`
    ServiceStopped,

    /// Process exited unexpectedly with a non-zero code or a signal.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `exit_code`: exit code when available
    /// - `reason`: exit description
    ServiceCrashed,

    /// Spawning failed (missing executable or invalid working directory).
    ///
    /// Sets:
    /// - `service`: service name
    /// - `reason`: spawn error
    ServiceSpawnFailed,

    /// Service will be started again after a delay.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `attempt`: restart number (1-based)
    /// - `delay_ms`: delay before the next start
    RestartScheduled,

    // === Health events ===
    /// A health check produced a result (cached results are not republished).
    ///
    /// Sets:
    /// - `service`: service name
    /// - `health`: the result
    HealthChecked,

    /// Circuit breaker changed state.
    ///
    /// Sets:
    /// - `service`: service name
    /// - `breaker`: new state
    BreakerTransition,

    /// Streaming health loop started.
    ///
    /// Sets:
    /// - `service`: service name
    MonitorStarted,

    /// Streaming health loop exited.
    ///
    /// Sets:
    /// - `service`: service name
    MonitorStopped,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Service or task name, if applicable.
    pub service: Option<Arc<str>>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Start or restart count.
    pub attempt: Option<u32>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// OS process identifier.
    pub pid: Option<u32>,
    /// Process exit code.
    pub exit_code: Option<i32>,
    /// Health result for `HealthChecked`.
    pub health: Option<Arc<HealthResult>>,
    /// Breaker state for `BreakerTransition`.
    pub breaker: Option<BreakerState>,
    /// Changed variable names for `EnvironmentChanged`.
    pub keys: Option<Arc<[String]>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            reason: None,
            attempt: None,
            delay_ms: None,
            pid: None,
            exit_code: None,
            health: None,
            breaker: None,
            keys: None,
        }
    }

    /// Creates a new event of the given kind (alias of [`Event::new`]).
    #[inline]
    pub fn now(kind: EventKind) -> Self {
        Self::new(kind)
    }

    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u32::MAX)) as u32);
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    #[inline]
    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    #[inline]
    pub fn with_health(mut self, result: HealthResult) -> Self {
        self.health = Some(Arc::new(result));
        self
    }

    #[inline]
    pub fn with_breaker(mut self, state: BreakerState) -> Self {
        self.breaker = Some(state);
        self
    }

    #[inline]
    pub fn with_keys(mut self, keys: Vec<String>) -> Self {
        self.keys = Some(keys.into());
        self
    }

    /// Lifecycle state implied by a service event, if any.
    pub fn lifecycle(&self) -> Option<LifecycleState> {
        match self.kind {
            EventKind::ServiceStarting => Some(LifecycleState::Starting),
            EventKind::ServiceRunning => Some(LifecycleState::Running),
            EventKind::ServiceStopping => Some(LifecycleState::Stopping),
            EventKind::ServiceStopped => Some(LifecycleState::Stopped),
            EventKind::ServiceCrashed | EventKind::ServiceSpawnFailed => {
                Some(LifecycleState::Crashed)
            }
            _ => None,
        }
    }
}
