//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the orchestrator, process
//! supervisor, health checker and runtime.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator`, `ProcessSupervisor`, `HealthChecker`, `Runtime`.
//! - **Consumers**: the hub listener (`BroadcastHub::spawn_listener`), which folds
//!   events into snapshots, and the runtime's `AliveTracker`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
