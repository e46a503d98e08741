use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::alive::AliveTracker;
use super::runtime::{Launcher, Runtime};
use crate::config::Config;
use crate::events::Bus;
use crate::health::{HealthChecker, LivenessSource, Probe};
use crate::hub::BroadcastHub;
use crate::orchestrator::Orchestrator;
use crate::process::{LineHandler, ProcessSupervisor};

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    cfg: Config,
    line_handler: Option<Arc<dyn LineHandler>>,
    probe: Option<Arc<dyn Probe>>,
    token: Option<CancellationToken>,
}

impl RuntimeBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            line_handler: None,
            probe: None,
            token: None,
        }
    }

    /// Receives every output line of every service; defaults to `tracing`.
    pub fn with_line_handler(mut self, handler: Arc<dyn LineHandler>) -> Self {
        self.line_handler = Some(handler);
        self
    }

    /// Replaces the built-in HTTP / TCP / process probes.
    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Derives the run context from `token` instead of a fresh one.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Wires every component and starts the bus listeners.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Arc<Runtime> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let token = self.token.unwrap_or_default();
        let listeners = CancellationToken::new();

        let mut supervisor = ProcessSupervisor::new(bus.clone(), cfg.stop_grace);
        if let Some(handler) = self.line_handler {
            supervisor = supervisor.with_line_handler(handler);
        }
        let supervisor = Arc::new(supervisor);

        let liveness: Arc<dyn LivenessSource> = supervisor.clone();
        let mut checker = HealthChecker::builder(cfg.clone())
            .with_liveness(liveness)
            .with_bus(bus.clone());
        if let Some(probe) = self.probe {
            checker = checker.with_probe(probe);
        }
        let checker = Arc::new(checker.build());

        let hub = BroadcastHub::new(cfg.outbox_capacity);
        hub.spawn_listener(&bus, listeners.clone());
        let alive = Arc::new(AliveTracker::new());
        Arc::clone(&alive).spawn_listener(&bus, listeners.clone());

        let orchestrator = Orchestrator::new()
            .with_timeout(cfg.task_timeout())
            .with_bus(bus.clone());

        Arc::new(Runtime {
            launcher: Launcher {
                cfg,
                bus,
                hub,
                supervisor,
                checker,
                token,
                units: Arc::new(Mutex::new(JoinSet::new())),
            },
            orchestrator,
            alive,
            listeners,
        })
    }
}
