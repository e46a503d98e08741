//! # Shared data model.
//!
//! One canonical definition of every record that crosses component
//! boundaries: the immutable [`ServiceSpec`] handed to the process supervisor,
//! the [`HealthCheckSpec`] consumed by the health checker, and the small state
//! enums ([`LifecycleState`], [`HealthStatus`]) carried by events and snapshots.
//!
//! ```text
//! ServiceSpec ──► ProcessSupervisor ──► LifecycleState ──┐
//!      │                                                 ├──► BroadcastHub ──► observers
//!      └─ health: HealthCheckSpec ──► HealthChecker ──► HealthResult
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CheckError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// Immutable description of a service to run.
///
/// `program` is resolved against `PATH` of the explicit child environment;
/// `working_dir` defaults to the current directory.
#[derive(Clone, Debug)]
pub struct ServiceSpec {
    /// Unique service name (also the health and broadcast key).
    pub name: String,
    /// Executable to launch.
    pub program: String,
    /// Arguments passed to `program`.
    pub args: Vec<String>,
    /// Working directory of the child.
    pub working_dir: PathBuf,
    /// Declared listening port, if any.
    pub port: Option<u16>,
    /// Caller-supplied environment overrides, layered over the parent environment.
    pub env: Vec<(String, String)>,
    /// Health-check strategy and target; `None` keeps health `unknown`.
    pub health: Option<HealthCheckSpec>,
    /// Whether an unexpectedly exited process is started again.
    pub restart: RestartPolicy,
    /// Delay schedule between restarts.
    pub backoff: BackoffPolicy,
}

impl ServiceSpec {
    /// Creates a spec running `program` in the current directory with no health check.
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            port: None,
            env: Vec::new(),
            health: None,
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_health(mut self, health: HealthCheckSpec) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy, backoff: BackoffPolicy) -> Self {
        self.restart = restart;
        self.backoff = backoff;
        self
    }
}

/// Inclusive range of HTTP status codes treated as healthy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusRange {
    pub min: u16,
    pub max: u16,
}

impl StatusRange {
    #[inline]
    pub fn contains(&self, status: u16) -> bool {
        (self.min..=self.max).contains(&status)
    }
}

impl Default for StatusRange {
    /// `200..=399`.
    fn default() -> Self {
        Self { min: 200, max: 399 }
    }
}

/// HTTP verb used by the HTTP probe.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HttpMethod {
    #[default]
    Get,
    Head,
}

/// Probe technique used to decide whether a service is healthy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthStrategy {
    /// Healthy iff the response status falls inside `success` within the timeout.
    Http {
        url: String,
        method: HttpMethod,
        success: StatusRange,
    },
    /// Healthy iff a TCP connection to `address` (`host:port`) succeeds.
    Tcp { address: String },
    /// Healthy iff the supervised process is `running` and still in the OS process table.
    Process,
}

impl HealthStrategy {
    /// Stable name used in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            HealthStrategy::Http { .. } => "http",
            HealthStrategy::Tcp { .. } => "tcp",
            HealthStrategy::Process => "process",
        }
    }
}

/// Health-check strategy, target and optional per-check timeout override.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub strategy: HealthStrategy,
    /// Overrides `Config::check_timeout` for this service.
    pub timeout: Option<Duration>,
}

impl HealthCheckSpec {
    /// HTTP GET against `url` with the default success range.
    pub fn http(url: impl Into<String>) -> Self {
        Self {
            strategy: HealthStrategy::Http {
                url: url.into(),
                method: HttpMethod::Get,
                success: StatusRange::default(),
            },
            timeout: None,
        }
    }

    /// TCP connect to `address`.
    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            strategy: HealthStrategy::Tcp {
                address: address.into(),
            },
            timeout: None,
        }
    }

    /// Liveness of the service's own process.
    pub fn process() -> Self {
        Self {
            strategy: HealthStrategy::Process,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the HTTP method and success range; no-op for other strategies.
    pub fn with_http(mut self, method: HttpMethod, success: StatusRange) -> Self {
        if let HealthStrategy::Http {
            method: m,
            success: s,
            ..
        } = &mut self.strategy
        {
            *m = method;
            *s = success;
        }
        self
    }
}

/// Lifecycle state of a supervised process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Crashed => "crashed",
        }
    }

    /// `stopped` and `crashed` are terminal until the next start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Crashed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification of a health check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one health check; superseded, never mutated.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    pub status: HealthStatus,
    /// Probe latency; zero for short-circuited results.
    #[serde(rename = "latencyMs", serialize_with = "serialize_millis")]
    pub latency: Duration,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency,
            error: None,
            checked_at: Utc::now(),
        }
    }

    pub fn unknown(reason: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unknown,
            latency: Duration::ZERO,
            error: Some(reason.into()),
            checked_at: Utc::now(),
        }
    }

    /// Maps a non-healthy outcome: rate limiting is `unknown`, everything else `unhealthy`.
    pub fn from_error(err: &CheckError, latency: Duration) -> Self {
        let status = match err {
            CheckError::RateLimited => HealthStatus::Unknown,
            _ => HealthStatus::Unhealthy,
        };
        Self {
            status,
            latency,
            error: Some(err.to_string()),
            checked_at: Utc::now(),
        }
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

pub(crate) fn serialize_millis<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}
