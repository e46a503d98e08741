//! Error types used by the devvisor runtime and its components.
//!
//! This module defines one error enum per component:
//!
//! - [`OrchestratorError`]: configuration and execution failures of the task orchestrator.
//! - [`TaskError`]: errors raised by a single orchestrator action.
//! - [`ProcessError`]: failures of the process supervisor.
//! - [`CheckError`]: outcomes of a health probe that are not "healthy".
//! - [`RuntimeError`]: failures of the top-level run context.
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics).
//! Cooperative shutdown is never a failure: use [`TaskError::is_cancelled`] and
//! [`ProcessError::is_cancelled`] to keep it out of user-facing reporting.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the task orchestrator.
///
/// `DuplicateTask`, `CircularDependency` and `UnknownTask` are configuration
/// errors: they are fatal at startup and never retried. `TaskFailed` and
/// `DependencyFailed` abort only the requested chain.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// A task with the same identifier is already registered.
    #[error("task {id} is already registered")]
    DuplicateTask {
        /// Offending identifier.
        id: String,
    },

    /// Task identifiers must be non-empty.
    #[error("task identifier cannot be empty")]
    EmptyTaskId,

    /// The requested task, or one of its dependencies, is not registered.
    #[error("task {id} is not registered{}", .required_by.as_deref().map(|r| format!(" (required by {r})")).unwrap_or_default())]
    UnknownTask {
        /// Missing identifier.
        id: String,
        /// Task that declared the dependency, if any.
        required_by: Option<String>,
    },

    /// A dependency cycle was found; `cycle` starts and ends with the same task.
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    CircularDependency {
        /// Task identifiers forming the cycle.
        cycle: Vec<String>,
    },

    /// The action of `task` failed.
    #[error("task {task} failed: {source}")]
    TaskFailed {
        /// Identifier of the failing task.
        task: String,
        /// Error returned by the action.
        #[source]
        source: TaskError,
    },

    /// A transitive dependency of `task` failed.
    #[error("dependency {dependency} failed for {task}: {source}")]
    DependencyFailed {
        /// Task whose dependency failed.
        task: String,
        /// Direct dependency through which the failure surfaced.
        dependency: String,
        /// The underlying failure.
        #[source]
        source: Box<OrchestratorError>,
    },
}

impl OrchestratorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use devvisor::OrchestratorError;
    ///
    /// let err = OrchestratorError::DuplicateTask { id: "deps".into() };
    /// assert_eq!(err.as_label(), "orchestrator_duplicate_task");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            OrchestratorError::DuplicateTask { .. } => "orchestrator_duplicate_task",
            OrchestratorError::EmptyTaskId => "orchestrator_empty_task_id",
            OrchestratorError::UnknownTask { .. } => "orchestrator_unknown_task",
            OrchestratorError::CircularDependency { .. } => "orchestrator_circular_dependency",
            OrchestratorError::TaskFailed { .. } => "orchestrator_task_failed",
            OrchestratorError::DependencyFailed { .. } => "orchestrator_dependency_failed",
        }
    }

    /// Identifier of the task whose action actually failed, following the chain.
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            OrchestratorError::TaskFailed { task, .. } => Some(task),
            OrchestratorError::DependencyFailed { source, .. } => source.failed_task(),
            _ => None,
        }
    }

    /// Returns `true` when the chain was aborted by cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            OrchestratorError::TaskFailed { source, .. } => source.is_cancelled(),
            OrchestratorError::DependencyFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// # Errors produced by an orchestrator action.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Action exceeded the configured task timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Action failed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Launching a service from the action failed.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Action observed cancellation of the run context.
    #[error("context cancelled")]
    Canceled,
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use devvisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Fail { .. } => "task_failed",
            TaskError::Process(e) => e.as_label(),
            TaskError::Canceled => "task_canceled",
        }
    }

    /// Returns `true` for cooperative cancellation (never reported as a failure).
    pub fn is_cancelled(&self) -> bool {
        match self {
            TaskError::Canceled => true,
            TaskError::Process(e) => e.is_cancelled(),
            _ => false,
        }
    }
}

/// # Errors produced by the process supervisor.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Executable could not be located or the working directory is invalid.
    ///
    /// Fatal for the service; reported, never retried automatically.
    #[error("failed to spawn service {service}: {reason}")]
    SpawnFailed {
        /// Service name.
        service: String,
        /// Human-readable cause.
        reason: String,
    },

    /// The call observed cancellation; the process has been stopped.
    #[error("service {service} cancelled")]
    Cancelled {
        /// Service name.
        service: String,
    },

    /// The process exited unexpectedly with a non-zero code (or a signal).
    #[error("service {service} exited unexpectedly{}", .code.map(|c| format!(" with code {c}")).unwrap_or_else(|| " (terminated by signal)".to_string()))]
    Exited {
        /// Service name.
        service: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
    },

    /// Delivering a termination signal failed.
    #[error("failed to signal service {service}: {reason}")]
    Signal {
        /// Service name.
        service: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl ProcessError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProcessError::SpawnFailed { .. } => "process_spawn_failed",
            ProcessError::Cancelled { .. } => "process_cancelled",
            ProcessError::Exited { .. } => "process_exited",
            ProcessError::Signal { .. } => "process_signal_failed",
        }
    }

    /// Returns `true` for cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProcessError::Cancelled { .. })
    }
}

/// # Non-healthy outcomes of a health check.
///
/// `Timeout` and `ConnectionRefused` are transient: recorded as circuit-breaker
/// failures, never fatal to the checker loop. `RateLimited` and `CircuitOpen`
/// are backpressure signals and do not count as failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// Probe did not complete within the configured timeout.
    #[error("check timed out after {timeout:?}")]
    Timeout {
        /// The timeout duration that was exceeded.
        timeout: Duration,
    },

    /// Target refused or could not accept the connection.
    #[error("connection refused: {reason}")]
    ConnectionRefused {
        /// Human-readable cause.
        reason: String,
    },

    /// HTTP response status outside of the success range.
    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus {
        /// Received status code.
        status: u16,
    },

    /// Target reported itself unhealthy in its response body.
    #[error("service reported status {reported:?}")]
    ReportedUnhealthy {
        /// Status string found in the body.
        reported: String,
    },

    /// Request could not be built or failed for a non-connection reason.
    #[error("request failed: {reason}")]
    Request {
        /// Human-readable cause.
        reason: String,
    },

    /// Supervised process is not in the `running` state or is gone from the process table.
    #[error("process not running: {reason}")]
    ProcessNotRunning {
        /// Human-readable cause.
        reason: String,
    },

    /// No token available in the rate limiter.
    #[error("rate limited")]
    RateLimited,

    /// Circuit breaker is open; the real check was skipped.
    #[error("circuit open")]
    CircuitOpen,
}

impl CheckError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CheckError::Timeout { .. } => "check_timeout",
            CheckError::ConnectionRefused { .. } => "check_connection_refused",
            CheckError::UnexpectedStatus { .. } => "check_unexpected_status",
            CheckError::ReportedUnhealthy { .. } => "check_reported_unhealthy",
            CheckError::Request { .. } => "check_request_failed",
            CheckError::ProcessNotRunning { .. } => "check_process_not_running",
            CheckError::RateLimited => "check_rate_limited",
            CheckError::CircuitOpen => "check_circuit_open",
        }
    }

    /// Indicates whether this outcome counts as a failure for the circuit breaker.
    ///
    /// # Example
    /// ```
    /// use devvisor::CheckError;
    ///
    /// assert!(CheckError::UnexpectedStatus { status: 500 }.is_failure());
    /// assert!(!CheckError::RateLimited.is_failure());
    /// ```
    pub fn is_failure(&self) -> bool {
        !matches!(self, CheckError::RateLimited | CheckError::CircuitOpen)
    }
}

/// # Errors produced by the top-level run context.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some units remained alive.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Services and loops that did not stop in time.
        stuck: Vec<String>,
    },

    /// The setup chain failed.
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use devvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Orchestrator(e) => e.as_label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_failure_reports_originating_task() {
        let err = OrchestratorError::DependencyFailed {
            task: "run".into(),
            dependency: "deps".into(),
            source: Box::new(OrchestratorError::DependencyFailed {
                task: "deps".into(),
                dependency: "reqs".into(),
                source: Box::new(OrchestratorError::TaskFailed {
                    task: "reqs".into(),
                    source: TaskError::fail("node not found"),
                }),
            }),
        };
        assert_eq!(err.failed_task(), Some("reqs"));
        assert!(err.to_string().starts_with("dependency deps failed for run"));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn cycle_message_lists_members() {
        let err = OrchestratorError::CircularDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let err = TaskError::Process(ProcessError::Cancelled {
            service: "api".into(),
        });
        assert!(err.is_cancelled());
        assert_eq!(err.as_label(), "process_cancelled");
    }

    #[test]
    fn backpressure_outcomes_do_not_trip_breaker() {
        assert!(!CheckError::CircuitOpen.is_failure());
        assert!(!CheckError::RateLimited.is_failure());
        assert!(
            CheckError::Timeout {
                timeout: Duration::from_secs(1)
            }
            .is_failure()
        );
        assert_eq!(CheckError::CircuitOpen.to_string(), "circuit open");
        assert_eq!(CheckError::RateLimited.to_string(), "rate limited");
    }

    #[test]
    fn unknown_dependency_mentions_dependent() {
        let err = OrchestratorError::UnknownTask {
            id: "lint".into(),
            required_by: Some("build".into()),
        };
        assert_eq!(err.to_string(), "task lint is not registered (required by build)");
    }
}
