//! # Broadcast hub: fan-out of aggregate state to observers.
//!
//! Observers [`subscribe`](BroadcastHub::subscribe) and immediately receive the
//! current snapshot; every later [`publish`](BroadcastHub::publish) that changes
//! what they would see pushes a fresh snapshot into their outbox.
//!
//! ```text
//! Bus ──► listener ──► publish(update) ──► Aggregate ──► snapshot
//!                                                         │
//!                             ┌───────────────────────────┼──────────────┐
//!                             ▼                           ▼              ▼
//!                         outbox #1                   outbox #2      outbox #N
//!                    (bounded, drop oldest)             ...            ...
//!                             ▼
//!                     Subscription::recv()
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: a full outbox drops its oldest snapshot.
//! - **Whole-state pushes**: no deltas; the latest snapshot is all an observer needs.
//! - **No redundant pushes**: a subscriber is skipped when nothing it would see
//!   changed since its last push (timestamps and latency alone don't count).
//! - **One lock**: the aggregate and the subscriber set share one mutex.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::snapshot::{Aggregate, StateSnapshot, StateUpdate};
use crate::events::Bus;

/// Bounded per-subscriber queue.
#[derive(Debug)]
struct Outbox {
    queue: Mutex<VecDeque<Arc<StateSnapshot>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueues `snap`; returns `true` if an older snapshot was dropped.
    fn push(&self, snap: Arc<StateSnapshot>) -> bool {
        let dropped = {
            let mut q = lock(&self.queue);
            let dropped = q.len() >= self.capacity && q.pop_front().is_some();
            q.push_back(snap);
            dropped
        };
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Arc<StateSnapshot>> {
        lock(&self.queue).pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        lock(&self.queue).clear();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
struct Subscriber {
    outbox: Arc<Outbox>,
    last_sent: Arc<StateSnapshot>,
}

#[derive(Debug, Default)]
struct Inner {
    aggregate: Aggregate,
    subscribers: HashMap<u64, Subscriber>,
    next_id: u64,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    outbox_capacity: usize,
}

/// Fan-out of the current service/health state. Cheap to clone.
#[derive(Clone, Debug)]
pub struct BroadcastHub {
    shared: Arc<Shared>,
}

impl BroadcastHub {
    /// Creates a hub whose subscribers buffer up to `outbox_capacity` snapshots (min 1).
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                outbox_capacity: outbox_capacity.max(1),
            }),
        }
    }

    /// Registers an observer; its first [`recv`](Subscription::recv) yields the current state.
    pub fn subscribe(&self) -> Subscription {
        let outbox = Arc::new(Outbox::new(self.shared.outbox_capacity));
        let mut inner = lock(&self.shared.inner);
        let snap = Arc::new(inner.aggregate.snapshot());
        outbox.push(Arc::clone(&snap));

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(
            id,
            Subscriber {
                outbox: Arc::clone(&outbox),
                last_sent: snap,
            },
        );
        debug!(subscriber = id, total = inner.subscribers.len(), "hub subscriber added");

        Subscription {
            id,
            outbox,
            hub: Arc::downgrade(&self.shared),
        }
    }

    /// Removes subscriber `id` and releases its outbox.
    ///
    /// Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        remove(&self.shared, id)
    }

    /// Applies `update` and pushes the new state to every subscriber that would see a change.
    ///
    /// Never waits on a subscriber.
    pub fn publish(&self, update: StateUpdate) {
        let mut inner = lock(&self.shared.inner);
        if !inner.aggregate.apply(update) {
            return;
        }
        let snap = Arc::new(inner.aggregate.snapshot());
        for (id, sub) in inner.subscribers.iter_mut() {
            if sub.last_sent.same_state(&snap) {
                continue;
            }
            if sub.outbox.push(Arc::clone(&snap)) {
                debug!(subscriber = *id, revision = snap.revision, "hub outbox full, dropped oldest");
            }
            sub.last_sent = Arc::clone(&snap);
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> StateSnapshot {
        lock(&self.shared.inner).aggregate.snapshot()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.inner).subscribers.len()
    }

    /// Spawns the fan-out worker that folds `bus` events into hub updates.
    ///
    /// The bus receiver is created before this returns, so no event published
    /// afterwards is missed. The worker exits when `token` is cancelled.
    pub fn spawn_listener(&self, bus: &Bus, token: CancellationToken) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(ev) => {
                            if let Some(update) = StateUpdate::from_event(&ev) {
                                hub.publish(update);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "hub listener lagged behind the event bus");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        })
    }
}

/// Receiving end of one observer.
///
/// Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    outbox: Arc<Outbox>,
    hub: Weak<Shared>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next pending snapshot; `None` once unsubscribed or the hub is gone.
    pub async fn recv(&mut self) -> Option<Arc<StateSnapshot>> {
        loop {
            if self.outbox.is_closed() {
                return None;
            }
            if let Some(snap) = self.outbox.pop() {
                return Some(snap);
            }
            if self.hub.strong_count() == 0 {
                return None;
            }
            self.outbox.notify.notified().await;
        }
    }

    /// Next pending snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<StateSnapshot>> {
        if self.outbox.is_closed() {
            return None;
        }
        self.outbox.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.hub.upgrade() {
            remove(&shared, self.id);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        for sub in inner.subscribers.values() {
            sub.outbox.notify.notify_one();
        }
    }
}

fn remove(shared: &Shared, id: u64) -> bool {
    let removed = lock(&shared.inner).subscribers.remove(&id);
    match removed {
        Some(sub) => {
            sub.outbox.close();
            debug!(subscriber = id, "hub subscriber removed");
            true
        }
        None => false,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
