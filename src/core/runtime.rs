//! # Runtime: the top-level run context.
//!
//! Owns every component and the one [`CancellationToken`] they derive their
//! lifetimes from.
//!
//! ```text
//! run(target)
//!   ├─► Orchestrator::run(target)          setup chain, once per task
//!   │       └─ service task ─► launch(specs)
//!   │                            ├─ shared env: SERVICE_URL_* / SERVICE_PORT_*
//!   │                            ├─ ServiceActor per spec      (child token)
//!   │                            └─ HealthChecker::watch per spec with a check
//!   └─► wait_for_shutdown()
//!           ├─ OS signal ─┐
//!           └─ token     ─┴─► publish ShutdownRequested
//!                             cancel token ─► every actor, process and loop
//!                             join units within cfg.grace
//!                               ├─ Ok      ─► AllStoppedWithin
//!                               └─ timeout ─► GraceExceeded{ stuck = AliveTracker }
//! ```
//!
//! Cancellation is the only shutdown path: a signal just cancels the token.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actor::ServiceActor;
use super::alive::AliveTracker;
use super::builder::RuntimeBuilder;
use super::shutdown;
use crate::config::Config;
use crate::error::{OrchestratorError, RuntimeError};
use crate::events::{Bus, Event, EventKind};
use crate::health::HealthChecker;
use crate::hub::{BroadcastHub, StateSnapshot, StateUpdate};
use crate::model::ServiceSpec;
use crate::orchestrator::{ActionFn, Orchestrator, Task};
use crate::process::{ProcessSupervisor, service_urls};

/// Host used for `SERVICE_URL_*` entries.
const LOCAL_HOST: &str = "localhost";

/// Spawns service actors and health loops; cloned into service tasks.
#[derive(Clone)]
pub(crate) struct Launcher {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    pub(crate) hub: BroadcastHub,
    pub(crate) supervisor: Arc<ProcessSupervisor>,
    pub(crate) checker: Arc<HealthChecker>,
    pub(crate) token: CancellationToken,
    pub(crate) units: Arc<Mutex<JoinSet<()>>>,
}

impl Launcher {
    async fn launch(&self, specs: Vec<ServiceSpec>) {
        let mut shared = service_urls(&specs, LOCAL_HOST);
        if !shared.is_empty() {
            // Keep URLs of services launched earlier.
            for (key, value) in self.supervisor.shared_env().await {
                if !shared.iter().any(|(k, _)| *k == key) {
                    shared.push((key, value));
                }
            }
            self.supervisor.set_shared_env(shared).await;
        }

        let mut units = self.units.lock().await;
        for spec in specs {
            let spec = Arc::new(spec);
            self.hub.publish(StateUpdate::Registered {
                service: spec.name.clone(),
            });

            let actor = ServiceActor::new(Arc::clone(&spec), Arc::clone(&self.supervisor), self.bus.clone());
            units.spawn(actor.run(self.token.child_token()));

            let (Some(health), Some(interval)) = (spec.health.clone(), self.cfg.poll_interval()) else {
                continue;
            };
            let checker = Arc::clone(&self.checker);
            let token = self.token.child_token();
            units.spawn(async move {
                checker
                    .watch(&spec.name, &health, interval, token, |_| {})
                    .await;
            });
        }
        debug!(units = units.len(), "services launched");
    }
}

/// Top-level run context of one supervisor instance.
///
/// Build it with [`Runtime::builder`]; construction spawns the hub and
/// liveness listeners, so it must happen inside a tokio runtime.
pub struct Runtime {
    pub(crate) launcher: Launcher,
    pub(crate) orchestrator: Orchestrator,
    pub(crate) alive: Arc<AliveTracker>,
    /// Stops the bus listeners once the runtime is dropped.
    pub(crate) listeners: CancellationToken,
}

impl Runtime {
    pub fn builder(cfg: Config) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub fn config(&self) -> &Config {
        &self.launcher.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.launcher.bus
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.launcher.hub
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.launcher.supervisor
    }

    pub fn checker(&self) -> &Arc<HealthChecker> {
        &self.launcher.checker
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn alive(&self) -> &Arc<AliveTracker> {
        &self.alive
    }

    /// The run-context token; cancelling it shuts everything down.
    pub fn token(&self) -> &CancellationToken {
        &self.launcher.token
    }

    /// Current aggregate state.
    pub fn status(&self) -> StateSnapshot {
        self.launcher.hub.snapshot()
    }

    /// Registers a setup task.
    pub async fn register(&self, task: Task) -> Result<(), OrchestratorError> {
        self.orchestrator.register(task).await
    }

    /// A setup task that launches `specs` once its dependencies have run.
    ///
    /// Services live until the run context is cancelled, not just for the
    /// duration of the task.
    pub fn service_task<I, S>(&self, id: impl Into<String>, deps: I, specs: Vec<ServiceSpec>) -> Task
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let launcher = self.launcher.clone();
        let specs = Arc::new(specs);
        let action = ActionFn::arc(move |_ctx: CancellationToken| {
            let launcher = launcher.clone();
            let specs = Arc::clone(&specs);
            async move {
                launcher.launch(specs.as_ref().clone()).await;
                Ok(())
            }
        });
        Task::new(id, action).with_deps(deps)
    }

    /// Launches `specs` directly, outside the orchestrator.
    pub async fn launch(&self, specs: Vec<ServiceSpec>) {
        self.launcher.launch(specs).await;
    }

    /// Reports changed environment variables to observers.
    pub fn notify_env_changed<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        info!(keys = ?keys, "environment changed");
        self.launcher
            .bus
            .publish(Event::now(EventKind::EnvironmentChanged).with_keys(keys));
    }

    /// Cancels the run context.
    pub fn shutdown(&self) {
        self.launcher.token.cancel();
    }

    /// Runs the setup chain ending in `target`, then serves until shutdown.
    ///
    /// # Errors
    /// - [`RuntimeError::Orchestrator`] if the chain fails; anything it already
    ///   launched is shut down first
    /// - [`RuntimeError::GraceExceeded`] if units outlive the grace period
    pub async fn run(&self, target: &str) -> Result<(), RuntimeError> {
        if let Err(e) = self.orchestrator.run(target, self.token()).await {
            if e.is_cancelled() {
                debug!(task = target, "setup cancelled");
            } else {
                error!(task = target, error = %e, label = e.as_label(), "setup failed");
            }
            self.shutdown();
            self.drain().await?;
            return Err(e.into());
        }
        self.wait_for_shutdown().await
    }

    /// Waits for an OS termination signal or cancellation, then shuts down.
    pub async fn wait_for_shutdown(&self) -> Result<(), RuntimeError> {
        let token = self.token().clone();
        tokio::select! {
            res = shutdown::termination_signal() => match res {
                Ok(signal) => info!(signal, "termination signal received"),
                Err(e) => {
                    warn!(error = %e, "signal listener unavailable, waiting for cancellation");
                    token.cancelled().await;
                }
            },
            _ = token.cancelled() => {}
        }
        self.shutdown();
        self.drain().await
    }

    /// Joins every unit within the configured grace period.
    async fn drain(&self) -> Result<(), RuntimeError> {
        self.launcher.bus.publish(Event::now(EventKind::ShutdownRequested));
        let grace = self.launcher.cfg.grace;
        let mut units = self.launcher.units.lock().await;

        let joined = tokio::time::timeout(grace, async {
            while let Some(res) = units.join_next().await {
                if let Err(e) = res {
                    if e.is_panic() {
                        error!(error = %e, "unit panicked");
                    }
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                info!("all services stopped within grace");
                self.launcher.bus.publish(Event::now(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                units.abort_all();
                let stuck = self.alive.snapshot().await;
                warn!(grace_ms = grace.as_millis() as u64, ?stuck, "grace exceeded");
                self.launcher
                    .bus
                    .publish(Event::now(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.listeners.cancel();
    }
}
