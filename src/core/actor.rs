//! # ServiceActor: keeps one service running.
//!
//! ```text
//! loop {
//!   ├─► supervisor.start(spec)
//!   │     ├─ SpawnFailed ─► exit (never retried)
//!   │     └─ Cancelled   ─► exit
//!   ├─► supervisor.wait(process)
//!   │     └─ Cancelled   ─► exit (process already stopped)
//!   ├─► expected exit    ─► exit
//!   ├─► RestartPolicy::should_restart(crashed, restarts)
//!   │     └─ false       ─► exit
//!   ├─► delay = backoff.delay(restarts); restarts += 1
//!   ├─► publish RestartScheduled{ attempt = restarts, delay }
//!   └─► sleep(delay) (cancellable)
//! }
//! ```
//!
//! Starts run sequentially: a new process is launched only after the previous
//! one exited and its output readers were joined.

use std::sync::Arc;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{Bus, Event, EventKind};
use crate::model::ServiceSpec;
use crate::process::ProcessSupervisor;

pub(crate) struct ServiceActor {
    spec: Arc<ServiceSpec>,
    supervisor: Arc<ProcessSupervisor>,
    bus: Bus,
}

impl ServiceActor {
    pub(crate) fn new(spec: Arc<ServiceSpec>, supervisor: Arc<ProcessSupervisor>, bus: Bus) -> Self {
        Self {
            spec,
            supervisor,
            bus,
        }
    }

    /// Runs until the service ends for good or `token` is cancelled.
    pub(crate) async fn run(self, token: CancellationToken) {
        let name = self.spec.name.as_str();
        let mut restarts: u32 = 0;

        loop {
            let process = match self.supervisor.start(&self.spec, &token).await {
                Ok(process) => process,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(service = name, error = %e, "service not started, not retrying");
                    break;
                }
            };

            let report = match self.supervisor.wait(&process, &token).await {
                Ok(report) => report,
                Err(_) => break,
            };
            if report.expected {
                break;
            }
            if !self.spec.restart.should_restart(report.crashed(), restarts) {
                debug!(service = name, restarts, code = ?report.code, "service left down");
                break;
            }

            let delay = self.spec.backoff.delay(restarts);
            restarts = restarts.saturating_add(1);
            info!(
                service = name,
                attempt = restarts,
                delay_ms = delay.as_millis() as u64,
                code = ?report.code,
                "restart scheduled"
            );
            self.bus.publish(
                Event::now(EventKind::RestartScheduled)
                    .with_service(name)
                    .with_attempt(restarts)
                    .with_delay(delay)
                    .with_exit_code(report.code),
            );

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }
    }
}
