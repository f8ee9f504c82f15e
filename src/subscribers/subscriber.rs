//! # Subscribers: where supervisor events leave the crate.
//!
//! A [`Subscribe`] implementation receives every lifecycle event of the
//! pool: spawns, readiness, crashes, restarts, reload pairs and shutdown.
//! The built-in `LogWriter` turns them into `tracing`
//! records; alerting or metrics hooks plug in the same way.
//!
//! The [`SubscriberSet`](crate::SubscriberSet) gives each subscriber its own
//! queue and task. A subscriber that stalls loses its own events
//! (`SubscriberOverflow`) and one that panics is reported
//! (`SubscriberPanicked`); neither ever delays a restart or a reload.
//!
//! ```rust
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use async_trait::async_trait;
//! use workvisor::{Event, EventKind, Subscribe};
//!
//! #[derive(Default)]
//! struct CrashCounter(AtomicUsize);
//!
//! #[async_trait]
//! impl Subscribe for CrashCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::WorkerCrashed {
//!             self.0.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str {
//!         "crash-counter"
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Consumer of supervisor lifecycle events.
///
/// Events arrive one at a time, in publish order, on a task owned by the
/// subscriber set. Handle failures inside `on_event`.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event.
    async fn on_event(&self, event: &Event);

    /// Name reported in overflow and panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Events that may queue up before this subscriber starts losing them.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
