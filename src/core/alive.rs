//! # Liveness of supervised units, ordered by event sequence.
//!
//! A unit is either a service process (`api`) or its health monitor
//! (`api/health`). The tracker is fed from the bus and answers "what is still
//! running" when shutdown overruns its grace period.
//!
//! ```text
//! ServiceRunning                          → api        alive
//! ServiceStopped | Crashed | SpawnFailed  → api        gone
//! MonitorStarted                          → api/health alive
//! MonitorStopped                          → api/health gone
//! ```
//!
//! Events with `seq <= last_seq` for a unit are stale and ignored.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{Bus, Event, EventKind};

#[derive(Debug, Clone, Copy)]
struct UnitState {
    last_seq: u64,
    alive: bool,
}

/// Tracks which service processes and health monitors are alive.
#[derive(Debug, Default)]
pub struct AliveTracker {
    units: RwLock<HashMap<String, UnitState>>,
}

impl AliveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `ev` if it is newer than the last event seen for its unit.
    ///
    /// Returns `true` when the alive flag was set or cleared.
    pub async fn update(&self, ev: &Event) -> bool {
        let Some(service) = ev.service.as_deref() else {
            return false;
        };
        let (unit, alive) = match ev.kind {
            EventKind::ServiceRunning => (service.to_string(), true),
            EventKind::ServiceStopped | EventKind::ServiceCrashed | EventKind::ServiceSpawnFailed => {
                (service.to_string(), false)
            }
            EventKind::MonitorStarted => (monitor_unit(service), true),
            EventKind::MonitorStopped => (monitor_unit(service), false),
            _ => return false,
        };

        let mut units = self.units.write().await;
        let entry = units.entry(unit).or_insert(UnitState {
            last_seq: 0,
            alive: false,
        });
        if ev.seq <= entry.last_seq {
            return false;
        }
        entry.last_seq = ev.seq;
        entry.alive = alive;
        true
    }

    /// Alive units, sorted.
    pub async fn snapshot(&self) -> Vec<String> {
        let units = self.units.read().await;
        let mut alive: Vec<String> = units
            .iter()
            .filter(|(_, st)| st.alive)
            .map(|(name, _)| name.clone())
            .collect();
        alive.sort_unstable();
        alive
    }

    pub async fn is_alive(&self, unit: &str) -> bool {
        self.units
            .read()
            .await
            .get(unit)
            .is_some_and(|st| st.alive)
    }

    /// Feeds the tracker from `bus` until `token` is cancelled or the bus closes.
    pub(crate) fn spawn_listener(
        self: std::sync::Arc<Self>,
        bus: &Bus,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => {
                            self.update(&ev).await;
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "alive tracker lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}

fn monitor_unit(service: &str) -> String {
    format!("{service}/health")
}
