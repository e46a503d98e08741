use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::ProcessError;
use crate::model::LifecycleState;

/// How a process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    /// `true` when the exit followed an explicit stop request.
    pub expected: bool,
}

impl ExitReport {
    /// Unexpected exit with a non-zero code or a signal.
    pub fn crashed(&self) -> bool {
        !self.expected && self.code != Some(0)
    }

    /// Terminal lifecycle state for this exit.
    pub fn state(&self) -> LifecycleState {
        if self.crashed() {
            LifecycleState::Crashed
        } else {
            LifecycleState::Stopped
        }
    }

    /// `Err(Exited)` for a crash, `Ok` otherwise.
    pub fn into_result(self, service: &str) -> Result<Self, ProcessError> {
        if self.crashed() {
            Err(ProcessError::Exited {
                service: service.to_string(),
                code: self.code,
            })
        } else {
            Ok(self)
        }
    }
}

/// Lifecycle state plus exit report once terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessStatus {
    pub state: LifecycleState,
    pub exit: Option<ExitReport>,
}

/// Runtime record of one launched service.
///
/// Owned by the [`ProcessSupervisor`](super::ProcessSupervisor); callers get a
/// shared handle and observe it through accessors only. The record outlives
/// the OS process: once terminal it keeps the exit report.
#[derive(Debug)]
pub struct ServiceProcess {
    name: String,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    status: watch::Sender<ProcessStatus>,
    stop: watch::Sender<Option<Duration>>,
}

impl ServiceProcess {
    pub(crate) fn new(name: String, pid: Option<u32>) -> Self {
        let (status, _) = watch::channel(ProcessStatus {
            state: LifecycleState::Running,
            exit: None,
        });
        let (stop, _) = watch::channel(None);
        Self {
            name,
            pid,
            started_at: Utc::now(),
            status,
            stop,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    /// Last exit report; `None` while the process runs.
    pub fn exit(&self) -> Option<ExitReport> {
        self.status.borrow().exit
    }

    /// Waits for the process to exit.
    ///
    /// Completes only after its output readers have been joined.
    pub async fn exited(&self) -> ExitReport {
        let mut rx = self.status.subscribe();
        let report = rx.wait_for(|s| s.exit.is_some()).await.ok().and_then(|s| s.exit);
        report.unwrap_or(ExitReport {
            code: None,
            expected: false,
        })
    }

    /// Asks the monitor to terminate the process with `grace` before SIGKILL.
    ///
    /// Returns `false` if a stop was already requested or the process ended.
    pub(crate) fn request_stop(&self, grace: Duration) -> bool {
        if self.exit().is_some() {
            return false;
        }
        self.stop.send_if_modified(|req| {
            if req.is_some() {
                false
            } else {
                *req = Some(grace);
                true
            }
        })
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.borrow().is_some()
    }

    pub(crate) fn stop_receiver(&self) -> watch::Receiver<Option<Duration>> {
        self.stop.subscribe()
    }

    pub(crate) fn set_status(&self, state: LifecycleState, exit: Option<ExitReport>) {
        self.status.send_replace(ProcessStatus { state, exit });
    }
}
