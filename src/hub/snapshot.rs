//! Broadcast payload: aggregate service state as whole-state snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::events::{Event, EventKind};
use crate::health::BreakerState;
use crate::model::{HealthResult, HealthStatus, LifecycleState};

/// One state change fed into the [`BroadcastHub`](super::BroadcastHub).
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum StateUpdate {
    /// A service became known before any lifecycle transition.
    Registered { service: String },
    /// Process lifecycle transition.
    Lifecycle {
        service: String,
        state: LifecycleState,
        pid: Option<u32>,
        exit_code: Option<i32>,
        reason: Option<String>,
    },
    /// New health result.
    Health {
        service: String,
        result: HealthResult,
    },
    /// Circuit breaker transition.
    Breaker {
        service: String,
        state: BreakerState,
    },
    /// A crashed service is about to be started again.
    Restart { service: String, attempt: u32 },
    /// Caller-reported environment change.
    EnvironmentChanged { keys: Vec<String> },
}

impl StateUpdate {
    /// Folds a bus event into an update; `None` for events the hub ignores.
    pub fn from_event(ev: &Event) -> Option<Self> {
        if ev.kind == EventKind::EnvironmentChanged {
            let keys = ev.keys.as_deref().map(<[String]>::to_vec).unwrap_or_default();
            return Some(Self::EnvironmentChanged { keys });
        }

        let service = ev.service.as_deref()?.to_string();
        if let Some(state) = ev.lifecycle() {
            return Some(Self::Lifecycle {
                service,
                state,
                pid: ev.pid,
                exit_code: ev.exit_code,
                reason: ev.reason.as_deref().map(str::to_string),
            });
        }
        match ev.kind {
            EventKind::HealthChecked => Some(Self::Health {
                service,
                result: ev.health.as_deref()?.clone(),
            }),
            EventKind::BreakerTransition => Some(Self::Breaker {
                service,
                state: ev.breaker?,
            }),
            EventKind::RestartScheduled => Some(Self::Restart {
                service,
                attempt: ev.attempt.unwrap_or(0),
            }),
            _ => None,
        }
    }
}

/// Per-service row of a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceView {
    pub name: String,
    /// `None` until the first lifecycle transition.
    pub status: Option<LifecycleState>,
    pub health: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub breaker: Option<BreakerState>,
    pub restarts: u32,
}

impl ServiceView {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: None,
            health: HealthStatus::Unknown,
            last_check: None,
            latency_ms: None,
            error: None,
            pid: None,
            exit_code: None,
            breaker: None,
            restarts: 0,
        }
    }

    /// Equality ignoring check timestamps and latency.
    fn same_state(&self, other: &Self) -> bool {
        self.name == other.name
            && self.status == other.status
            && self.health == other.health
            && self.error == other.error
            && self.pid == other.pid
            && self.exit_code == other.exit_code
            && self.breaker == other.breaker
            && self.restarts == other.restarts
    }
}

/// Health counts over every known service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub unknown: usize,
    /// Unhealthy if any service is, else unknown if any is or none exist.
    pub overall: HealthStatus,
}

impl HealthSummary {
    pub fn from_views<'a>(views: impl IntoIterator<Item = &'a ServiceView>) -> Self {
        let mut s = Self::default();
        for v in views {
            s.total += 1;
            match v.health {
                HealthStatus::Healthy => s.healthy += 1,
                HealthStatus::Unhealthy => s.unhealthy += 1,
                HealthStatus::Unknown => s.unknown += 1,
            }
        }
        s.overall = if s.unhealthy > 0 {
            HealthStatus::Unhealthy
        } else if s.unknown > 0 || s.total == 0 {
            HealthStatus::Unknown
        } else {
            HealthStatus::Healthy
        };
        s
    }
}

/// Whole-state push delivered to every subscriber.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Bumped on every applied update.
    pub revision: u64,
    /// Bumped on every environment change.
    pub env_revision: u64,
    /// Keys reported by the latest environment change.
    pub changed_env_keys: Vec<String>,
    /// Sorted by name.
    pub services: Vec<ServiceView>,
    pub summary: HealthSummary,
    pub generated_at: DateTime<Utc>,
}

impl StateSnapshot {
    /// Renders the snapshot as a JSON document.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// View of `service`, if known.
    pub fn service(&self, name: &str) -> Option<&ServiceView> {
        self.services.iter().find(|v| v.name == name)
    }

    /// Whether an observer would see nothing new going from `self` to `other`.
    pub(crate) fn same_state(&self, other: &Self) -> bool {
        self.env_revision == other.env_revision
            && self.services.len() == other.services.len()
            && self
                .services
                .iter()
                .zip(&other.services)
                .all(|(a, b)| a.same_state(b))
    }
}

/// Mutable aggregate behind the hub lock.
#[derive(Debug, Default)]
pub(crate) struct Aggregate {
    services: BTreeMap<String, ServiceView>,
    revision: u64,
    env_revision: u64,
    changed_env_keys: Vec<String>,
}

impl Aggregate {
    /// Applies `update`; returns `false` if nothing changed.
    pub(crate) fn apply(&mut self, update: StateUpdate) -> bool {
        let before_services = self.services.len();
        let changed = match update {
            StateUpdate::Registered { service } => {
                self.view(&service);
                self.services.len() != before_services
            }
            StateUpdate::Lifecycle {
                service,
                state,
                pid,
                exit_code,
                reason,
            } => {
                let v = self.view(&service);
                let prev = v.clone();
                v.status = Some(state);
                match state {
                    LifecycleState::Starting => {
                        v.exit_code = None;
                    }
                    LifecycleState::Running => {
                        v.pid = pid.or(v.pid);
                    }
                    LifecycleState::Stopping => {}
                    LifecycleState::Stopped => {
                        v.pid = None;
                        v.exit_code = exit_code;
                        v.health = HealthStatus::Unknown;
                    }
                    LifecycleState::Crashed => {
                        v.pid = None;
                        v.exit_code = exit_code;
                        if reason.is_some() {
                            v.error = reason;
                        }
                    }
                }
                *v != prev
            }
            StateUpdate::Health { service, result } => {
                let v = self.view(&service);
                let prev = v.clone();
                v.health = result.status;
                v.last_check = Some(result.checked_at);
                v.latency_ms = Some(result.latency.as_millis().min(u128::from(u64::MAX)) as u64);
                v.error = result.error;
                *v != prev
            }
            StateUpdate::Breaker { service, state } => {
                let v = self.view(&service);
                let changed = v.breaker != Some(state);
                v.breaker = Some(state);
                changed
            }
            StateUpdate::Restart { service, attempt } => {
                let v = self.view(&service);
                let changed = v.restarts != attempt;
                v.restarts = attempt;
                changed
            }
            StateUpdate::EnvironmentChanged { keys } => {
                self.env_revision += 1;
                self.changed_env_keys = keys;
                true
            }
        };
        if changed {
            self.revision += 1;
        }
        changed
    }

    pub(crate) fn snapshot(&self) -> StateSnapshot {
        let services: Vec<ServiceView> = self.services.values().cloned().collect();
        StateSnapshot {
            revision: self.revision,
            env_revision: self.env_revision,
            changed_env_keys: self.changed_env_keys.clone(),
            summary: HealthSummary::from_views(&services),
            services,
            generated_at: Utc::now(),
        }
    }

    fn view(&mut self, service: &str) -> &mut ServiceView {
        self.services
            .entry(service.to_string())
            .or_insert_with(|| ServiceView::new(service))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lifecycle(service: &str, state: LifecycleState, pid: Option<u32>) -> StateUpdate {
        StateUpdate::Lifecycle {
            service: service.into(),
            state,
            pid,
            exit_code: None,
            reason: None,
        }
    }

    #[test]
    fn summary_overall() {
        let mut a = ServiceView::new("a");
        let mut b = ServiceView::new("b");
        assert_eq!(HealthSummary::from_views([]).overall, HealthStatus::Unknown);

        a.health = HealthStatus::Healthy;
        b.health = HealthStatus::Healthy;
        assert_eq!(HealthSummary::from_views([&a, &b]).overall, HealthStatus::Healthy);

        b.health = HealthStatus::Unknown;
        assert_eq!(HealthSummary::from_views([&a, &b]).overall, HealthStatus::Unknown);

        a.health = HealthStatus::Unhealthy;
        let s = HealthSummary::from_views([&a, &b]);
        assert_eq!(s.overall, HealthStatus::Unhealthy);
        assert_eq!((s.total, s.healthy, s.unhealthy, s.unknown), (2, 0, 1, 1));
    }

    #[test]
    fn lifecycle_and_health_fold_into_view() {
        let mut agg = Aggregate::default();
        assert!(agg.apply(lifecycle("api", LifecycleState::Running, Some(42))));
        assert!(agg.apply(StateUpdate::Health {
            service: "api".into(),
            result: HealthResult::healthy(Duration::from_millis(12)),
        }));

        let snap = agg.snapshot();
        let api = snap.service("api").unwrap();
        assert_eq!(api.status, Some(LifecycleState::Running));
        assert_eq!(api.pid, Some(42));
        assert_eq!(api.health, HealthStatus::Healthy);
        assert_eq!(api.latency_ms, Some(12));
        assert_eq!(snap.revision, 2);

        assert!(agg.apply(lifecycle("api", LifecycleState::Stopped, None)));
        let api = agg.snapshot().service("api").cloned().unwrap();
        assert_eq!(api.pid, None);
        assert_eq!(api.health, HealthStatus::Unknown);
    }

    #[test]
    fn repeated_update_is_not_a_change() {
        let mut agg = Aggregate::default();
        assert!(agg.apply(StateUpdate::Registered { service: "web".into() }));
        assert!(!agg.apply(StateUpdate::Registered { service: "web".into() }));
        assert!(agg.apply(lifecycle("web", LifecycleState::Running, None)));
        assert!(!agg.apply(lifecycle("web", LifecycleState::Running, None)));
        assert_eq!(agg.snapshot().revision, 2);
    }

    #[test]
    fn environment_change_bumps_env_revision() {
        let mut agg = Aggregate::default();
        agg.apply(StateUpdate::EnvironmentChanged {
            keys: vec!["DATABASE_URL".into()],
        });
        let snap = agg.snapshot();
        assert_eq!(snap.env_revision, 1);
        assert_eq!(snap.changed_env_keys, vec!["DATABASE_URL".to_string()]);
    }

    #[test]
    fn from_event_maps_service_events() {
        let ev = Event::new(EventKind::ServiceCrashed)
            .with_service("api")
            .with_exit_code(Some(3))
            .with_reason("exit code 3");
        assert_eq!(
            StateUpdate::from_event(&ev),
            Some(StateUpdate::Lifecycle {
                service: "api".into(),
                state: LifecycleState::Crashed,
                pid: None,
                exit_code: Some(3),
                reason: Some("exit code 3".into()),
            })
        );
        assert_eq!(StateUpdate::from_event(&Event::new(EventKind::TaskStarted)), None);
        assert_eq!(
            StateUpdate::from_event(&Event::new(EventKind::ShutdownRequested).with_service("api")),
            None
        );
    }

    #[test]
    fn json_uses_camel_case() {
        let mut agg = Aggregate::default();
        agg.apply(lifecycle("api", LifecycleState::Running, Some(7)));
        let v: serde_json::Value = serde_json::from_str(&agg.snapshot().to_json().unwrap()).unwrap();
        assert_eq!(v["services"][0]["status"], "running");
        assert_eq!(v["services"][0]["health"], "unknown");
        assert!(v["services"][0]["lastCheck"].is_null());
        assert_eq!(v["summary"]["overall"], "unknown");
        assert_eq!(v["envRevision"], 0);
    }
}
