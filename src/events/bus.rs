//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]: every component
//! publishes without blocking, and a small number of listeners consume.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                      Listeners:
//!   Orchestrator      ──┐
//!   ProcessSupervisor ──┼──► Bus ──┬──► hub listener ──► BroadcastHub ──► Subscriptions
//!   HealthChecker     ──┤          └──► alive listener ──► AliveTracker
//!   Runtime           ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits on a listener.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events sent with no receiver are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; returns immediately.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn publish_without_receivers_is_silent() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ShutdownRequested));
    }

    #[tokio::test]
    async fn receivers_see_later_events_in_order() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::ServiceStarting).with_service("api"));
        bus.publish(Event::new(EventKind::ServiceRunning).with_service("api"));

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.kind, EventKind::ServiceStarting);
        assert_eq!(b.kind, EventKind::ServiceRunning);
        assert!(a.seq < b.seq);
    }
}
