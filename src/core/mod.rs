//! Top-level run context.
//!
//! The public API of this module is [`Runtime`] and its [`RuntimeBuilder`].
//!
//! Internal modules:
//! - [`runtime`]: owns the components, launches services, drives shutdown;
//! - [`builder`]: wires bus, supervisor, checker, hub and orchestrator;
//! - [`actor`]: keeps one service running with restart policy and backoff;
//! - [`alive`]: which processes and health loops are still running;
//! - [`shutdown`]: OS termination signals.

mod actor;
mod alive;
mod builder;
mod runtime;
mod shutdown;

pub use alive::AliveTracker;
pub use builder::RuntimeBuilder;
pub use runtime::Runtime;
