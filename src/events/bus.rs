//! # Lifecycle event bus.
//!
//! Every worker transition, crash, restart and reload step is published on a
//! single [`Bus`]. Publishers are the worker pumps, the pool and the
//! reloader; the supervisor forwards what it receives to the subscriber set.
//!
//! ```text
//! WorkerHandle pump ─┐
//! Pool              ─┼──► Bus ──► Supervisor::subscriber_listener ──► SubscriberSet
//! Reloader          ─┘        └─► extra receivers (tests, embedders)
//! ```
//!
//! Publishing never waits: a crash or a stop timeout is reported from the
//! exit path without depending on how fast anyone reads. A receiver that
//! falls more than `capacity` events behind gets `RecvError::Lagged(n)` and
//! resumes from the oldest retained event. Nothing is kept for receivers
//! that subscribe later.

use tokio::sync::broadcast;

use super::event::Event;

/// Shared channel for supervisor lifecycle events.
///
/// Cloning is cheap; every component of one supervisor holds a clone of
/// the same bus.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus retaining at most `capacity` events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes a lifecycle event; dropped when nobody listens.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn subscribers_see_events_published_after_subscribe() {
        let bus = Bus::new(8);
        bus.publish(Event::new(EventKind::WorkerSpawned));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::WorkerReady));

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::WorkerReady);
    }

    #[tokio::test]
    async fn zero_capacity_keeps_the_latest_event() {
        let bus = Bus::new(0);
        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::WorkerSpawned));
        bus.publish(Event::new(EventKind::WorkerCrashed));

        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(1))
        ));
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::WorkerCrashed);
    }
}
