//! # Per-service circuit breaker.
//!
//! ```text
//!            failures == threshold
//!   Closed ───────────────────────────► Open
//!     ▲                                 │  ▲
//!     │ trial ok          recovery      │  │ trial failed
//!     │                   elapsed       ▼  │
//!     └─────────────────────────────── HalfOpen
//! ```
//!
//! Time is passed in explicitly so the state machine stays a plain value; the
//! health checker owns one instance per service under that service's lock.
//! `HalfOpen` admits exactly one trial at a time. A trial carries a deadline
//! (the probe timeout); one still unresolved past it was dropped by its caller
//! and the slot goes to the next check.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision for one check attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// Closed: run the check normally.
    Allowed,
    /// Half-open: this check is the single trial.
    Trial,
    /// Open, or a trial is already in flight.
    Denied,
}

#[derive(Clone, Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    recovery: Duration,
    state: BreakerState,
    failures: u32,
    changed_at: Instant,
    trial_deadline: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery: Duration, now: Instant) -> Self {
        Self {
            threshold: threshold.max(1),
            recovery,
            state: BreakerState::Closed,
            failures: 0,
            changed_at: now,
            trial_deadline: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Consecutive failures counted while closed.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Instant of the last state transition.
    pub fn changed_at(&self) -> Instant {
        self.changed_at
    }

    /// Decides whether a check may run, moving `Open → HalfOpen` once recovery elapsed.
    ///
    /// A granted trial must resolve within `trial_timeout`.
    pub fn permit(&mut self, now: Instant, trial_timeout: Duration) -> Permit {
        match self.state {
            BreakerState::Closed => Permit::Allowed,
            BreakerState::Open => {
                if now.saturating_duration_since(self.changed_at) >= self.recovery {
                    self.transition(BreakerState::HalfOpen, now);
                    self.trial_deadline = Some(now + trial_timeout);
                    Permit::Trial
                } else {
                    Permit::Denied
                }
            }
            BreakerState::HalfOpen => match self.trial_deadline {
                Some(deadline) if now <= deadline => Permit::Denied,
                _ => {
                    self.trial_deadline = Some(now + trial_timeout);
                    Permit::Trial
                }
            },
        }
    }

    pub fn on_success(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => self.failures = 0,
            BreakerState::HalfOpen => self.transition(BreakerState::Closed, now),
            BreakerState::Open => {}
        }
    }

    pub fn on_failure(&mut self, now: Instant) {
        match self.state {
            BreakerState::Closed => {
                self.failures += 1;
                if self.failures >= self.threshold {
                    self.transition(BreakerState::Open, now);
                }
            }
            BreakerState::HalfOpen => self.transition(BreakerState::Open, now),
            BreakerState::Open => {}
        }
    }

    /// Releases a trial that never reached the probe.
    pub fn abandon_trial(&mut self) {
        self.trial_deadline = None;
    }

    fn transition(&mut self, to: BreakerState, now: Instant) {
        self.state = to;
        self.changed_at = now;
        self.trial_deadline = None;
        if to == BreakerState::Closed {
            self.failures = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECOVERY: Duration = Duration::from_secs(30);
    const TRIAL: Duration = Duration::from_secs(5);

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(3, RECOVERY, t0);
        for _ in 0..2 {
            assert_eq!(b.permit(t0, TRIAL), Permit::Allowed);
            b.on_failure(t0);
        }
        assert_eq!(b.state(), BreakerState::Closed);
        b.on_failure(t0);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.permit(t0, TRIAL), Permit::Denied);
    }

    #[test]
    fn success_resets_the_counter() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(3, RECOVERY, t0);
        b.on_failure(t0);
        b.on_failure(t0);
        b.on_success(t0);
        assert_eq!(b.failures(), 0);
        b.on_failure(t0);
        b.on_failure(t0);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn single_trial_after_recovery_then_close() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(1, RECOVERY, t0);
        b.on_failure(t0);
        assert_eq!(b.permit(t0 + RECOVERY - Duration::from_millis(1), TRIAL), Permit::Denied);

        let t1 = t0 + RECOVERY;
        assert_eq!(b.permit(t1, TRIAL), Permit::Trial);
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.permit(t1, TRIAL), Permit::Denied);

        b.on_success(t1);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failures(), 0);
        assert_eq!(b.permit(t1, TRIAL), Permit::Allowed);
    }

    #[test]
    fn failed_trial_reopens_and_restarts_timer() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(2, RECOVERY, t0);
        b.on_failure(t0);
        b.on_failure(t0);

        let t1 = t0 + RECOVERY;
        assert_eq!(b.permit(t1, TRIAL), Permit::Trial);
        b.on_failure(t1);
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.changed_at(), t1);
        assert_eq!(b.permit(t1 + RECOVERY / 2, TRIAL), Permit::Denied);
        assert_eq!(b.permit(t1 + RECOVERY, TRIAL), Permit::Trial);
    }

    #[test]
    fn abandoned_trial_frees_the_slot() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(1, RECOVERY, t0);
        b.on_failure(t0);
        let t1 = t0 + RECOVERY;
        assert_eq!(b.permit(t1, TRIAL), Permit::Trial);
        b.abandon_trial();
        assert_eq!(b.state(), BreakerState::HalfOpen);
        assert_eq!(b.permit(t1, TRIAL), Permit::Trial);
    }

    #[test]
    fn unresolved_trial_expires_after_its_deadline() {
        let t0 = Instant::now();
        let mut b = CircuitBreaker::new(1, RECOVERY, t0);
        b.on_failure(t0);

        let t1 = t0 + RECOVERY;
        assert_eq!(b.permit(t1, TRIAL), Permit::Trial);
        assert_eq!(b.permit(t1 + TRIAL, TRIAL), Permit::Denied);

        let t2 = t1 + TRIAL + Duration::from_millis(1);
        assert_eq!(b.permit(t2, TRIAL), Permit::Trial);
        assert_eq!(b.permit(t2, TRIAL), Permit::Denied);
        b.on_success(t2);
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
