//! Restart policies for supervised services.
//!
//! ## Contents
//! - [`RestartPolicy`] whether an unexpectedly exited service starts again
//! - [`BackoffPolicy`] how long to wait before each restart
//! - [`JitterPolicy`]  randomization of those delays
//!
//! ## Quick wiring
//! ```text
//! ServiceSpec { restart: RestartPolicy, backoff: BackoffPolicy }
//!      └─► core::actor::ServiceActor uses:
//!           - restart.should_restart(crashed, restarts) to decide continue/exit
//!           - backoff.delay(restarts) to schedule the next start
//! ```

mod backoff;
mod jitter;
mod restart;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use restart::RestartPolicy;
