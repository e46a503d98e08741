//! # devvisor
//!
//! **Devvisor** is the engine of a local multi-service development supervisor.
//!
//! It sequences setup steps, starts and keeps alive the project's processes
//! (web, API, workers), decides whether each one is healthy, and pushes the
//! resulting state to any number of observers as it changes.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Task("reqs") ◄── Task("deps") ◄── service_task("run", [api, web])
//!                          │
//!                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Runtime (top-level run context, one CancellationToken)           │
//! │  - Orchestrator      (memoized, cycle-checked setup tasks)        │
//! │  - ProcessSupervisor (start / stop / wait, process groups)        │
//! │  - HealthChecker     (cache → breaker → rate limit → probe)       │
//! │  - BroadcastHub      (whole-state snapshots, bounded outboxes)    │
//! │  - AliveTracker      (what is still running at shutdown)          │
//! └──────┬──────────────────────────┬───────────────────────┬─────────┘
//!        ▼                          ▼                       │
//!   ┌──────────────┐          ┌──────────────┐              │
//!   │ ServiceActor │  ...     │ watch loop   │  ...         │
//!   │ start / wait │          │ check / tick │              │
//!   │ restart      │          │              │              │
//!   └┬─────────────┘          └┬─────────────┘              │
//!    │ ServiceStarting         │ HealthChecked              │
//!    │ ServiceRunning          │ BreakerTransition          │
//!    │ ServiceCrashed ...      │ MonitorStarted ...         │
//!    ▼                         ▼                            ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                       Bus (broadcast channel)                     │
//! └──────────────┬──────────────────────────────────┬─────────────────┘
//!                ▼                                  ▼
//!         hub listener                        alive listener
//!                ▼                                  ▼
//!         BroadcastHub ──► Subscription #1..N   AliveTracker
//! ```
//!
//! ### Shutdown
//! ```text
//! SIGINT / SIGTERM / token.cancel()
//!   └─► ShutdownRequested ─► cancel run context
//!         ├─ every ServiceActor: SIGINT to the process group, SIGKILL after stop_grace
//!         ├─ every watch loop: exits, in-flight probe dropped
//!         └─ join within Config::grace ─► AllStoppedWithin | GraceExceeded{ stuck }
//! ```
//!
//! ## Features
//! | Area              | Description                                               | Key types                                  |
//! |-------------------|-----------------------------------------------------------|--------------------------------------------|
//! | **Setup**         | Named steps with dependencies, each run once.             | [`Orchestrator`], [`Task`], [`Action`]     |
//! | **Processes**     | Explicit environment, output lines, graceful stop.        | [`ProcessSupervisor`], [`ServiceProcess`]  |
//! | **Health**        | HTTP / TCP / process checks with opt-in gates.            | [`HealthChecker`], [`CircuitBreaker`]      |
//! | **Broadcast**     | Whole-state pushes to observers.                          | [`BroadcastHub`], [`StateSnapshot`]        |
//! | **Policies**      | Restart and backoff for crashed services.                 | [`RestartPolicy`], [`BackoffPolicy`]       |
//! | **Errors**        | Typed errors with stable labels.                          | [`OrchestratorError`], [`CheckError`]      |
//! | **Configuration** | Every optional feature off by default.                    | [`Config`]                                 |
//!
//! ## Optional features
//! - `logging`: exports [`init_tracing`], a stderr `tracing-subscriber` setup.
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use devvisor::{ActionFn, Config, HealthCheckSpec, Runtime, ServiceSpec, Task};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.poll_interval = Duration::from_secs(2);
//!     cfg.breaker.enabled = true;
//!
//!     let rt = Runtime::builder(cfg).build();
//!     rt.register(Task::new("reqs", ActionFn::arc(|_ctx: CancellationToken| async { Ok(()) })))
//!         .await?;
//!
//!     let api = ServiceSpec::new("api", "cargo")
//!         .with_args(["run", "--bin", "api"])
//!         .with_port(8080)
//!         .with_health(HealthCheckSpec::http("http://localhost:8080/health"));
//!     rt.register(rt.service_task("run", ["reqs"], vec![api])).await?;
//!
//!     let mut updates = rt.hub().subscribe();
//!     tokio::spawn(async move {
//!         while let Some(snap) = updates.recv().await {
//!             println!("{}", snap.summary.overall);
//!         }
//!     });
//!
//!     rt.run("run").await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod health;
mod hub;
mod model;
mod orchestrator;
mod policies;
mod process;

// ---- Public re-exports ----

pub use crate::core::{AliveTracker, Runtime, RuntimeBuilder};
pub use config::{BreakerConfig, Config};
pub use error::{CheckError, OrchestratorError, ProcessError, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use health::{
    BreakerState, CacheEntry, CircuitBreaker, HealthChecker, HealthCheckerBuilder, HttpProbe,
    LivenessSource, MAX_BODY_BYTES, Permit, Probe, ProcessProbe, StrategyProbe, TcpProbe,
    TokenBucket,
};
pub use hub::{BroadcastHub, HealthSummary, ServiceView, StateSnapshot, StateUpdate, Subscription};
pub use model::{
    HealthCheckSpec, HealthResult, HealthStatus, HealthStrategy, HttpMethod, LifecycleState,
    ServiceSpec, StatusRange,
};
pub use orchestrator::{Action, ActionFn, ActionRef, Orchestrator, Task};
pub use policies::{BackoffPolicy, JitterPolicy, RestartPolicy};
pub use process::{
    Environment, ExitReport, HandlerError, LineHandler, OutputStream, ProcessStatus,
    ProcessSupervisor, ServiceProcess, TracingLines, pid_alive, service_urls,
};

// Optional: stderr log output for binaries.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
mod logging;
#[cfg(feature = "logging")]
pub use logging::init_tracing;
