//! # Restart policies for supervised services.
//!
//! [`RestartPolicy`] decides whether a service whose process exited without
//! being asked to is started again.
//!
//! - [`RestartPolicy::Never`] the exit is reported and the service stays down (default).
//! - [`RestartPolicy::OnFailure`] restart only after a crash (non-zero code or signal).
//! - [`RestartPolicy::Always`] restart after any unexpected exit, clean or not.
//!
//! Explicit stops and cancellation never trigger a restart, and a spawn
//! failure is never retried regardless of policy.
//!
//! ```text
//! exit(expected)            ─► done
//! exit(unexpected, code 0)  ─► Always    ─► restart
//! exit(unexpected, crash)   ─► OnFailure ─► restart
//!                           ─► Always    ─► restart
//! restarts == max_restarts  ─► done
//! ```

/// Policy controlling whether an unexpectedly exited service is started again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart.
    #[default]
    Never,
    /// Restart after a crash; `max_restarts = 0` means unlimited.
    OnFailure { max_restarts: u32 },
    /// Restart after every unexpected exit; `max_restarts = 0` means unlimited.
    Always { max_restarts: u32 },
}

impl RestartPolicy {
    /// Returns `true` if another start should follow an unexpected exit.
    ///
    /// `crashed` is `true` for a non-zero exit code or signal termination;
    /// `restarts` counts restarts already performed for this service.
    pub fn should_restart(&self, crashed: bool, restarts: u32) -> bool {
        let within = |max: u32| max == 0 || restarts < max;
        match *self {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure { max_restarts } => crashed && within(max_restarts),
            RestartPolicy::Always { max_restarts } => within(max_restarts),
        }
    }
}
