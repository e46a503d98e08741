//! Event broadcast hub.
//!
//! ## Contents
//! - [`BroadcastHub`], [`Subscription`] fan-out to observers with bounded outboxes
//! - [`StateUpdate`] one change fed into the hub, usually folded from a bus event
//! - [`StateSnapshot`], [`ServiceView`], [`HealthSummary`] whole-state payload

mod broadcast;
mod snapshot;

pub use broadcast::{BroadcastHub, Subscription};
pub use snapshot::{HealthSummary, ServiceView, StateSnapshot, StateUpdate};
