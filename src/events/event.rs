//! # Runtime events emitted by the pool, worker handles and the reloader.
//!
//! The [`EventKind`] enum classifies events into:
//! - **Worker lifecycle**: spawned, ready, stop requested, disconnected, exited;
//! - **Failure handling**: crash, restart scheduling, restart failure, stop timeout;
//! - **Reload**: session start/finish, per-pair progress, rejections;
//! - **Shutdown**: requested, settled;
//! - **Subscriber health**: overflow, panic.
//!
//! The [`Event`] struct carries the optional metadata (worker id, address,
//! delay, counter, reason).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order in which things happened.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use workvisor::{Event, EventKind, WorkerId};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_worker(WorkerId::new(3))
//!     .with_delay(Duration::from_millis(2200))
//!     .with_deaths(11);
//!
//! assert_eq!(ev.kind, EventKind::RestartScheduled);
//! assert_eq!(ev.worker, Some(WorkerId::new(3)));
//! assert_eq!(ev.delay_ms, Some(2200));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::runtime::WorkerId;
use crate::worker::ExitReason;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Worker lifecycle ===
    /// The runtime created a worker process.
    ///
    /// Sets: `worker`.
    WorkerSpawned,

    /// Spawning a worker failed.
    ///
    /// Sets: `reason`.
    SpawnFailed,

    /// The worker became ready (network-active or self-reported).
    ///
    /// Sets: `worker`, `addr` (if bound).
    WorkerReady,

    /// A graceful stop was requested for the worker.
    ///
    /// Sets: `worker`, `timeout_ms`.
    StopRequested,

    /// The worker disconnected from the supervisor.
    ///
    /// Sets: `worker`.
    WorkerDisconnected,

    /// The worker did not disconnect in time and was force-killed.
    ///
    /// Sets: `worker`, `timeout_ms`.
    StopTimedOut,

    /// The worker process is gone.
    ///
    /// Sets: `worker`, `exit`.
    WorkerExited,

    // === Crash handling ===
    /// The worker exited without being asked to.
    ///
    /// Sets: `worker`, `exit`, `deaths` (counter after recording).
    WorkerCrashed,

    /// A replacement for a crashed worker will be spawned after `delay_ms`.
    ///
    /// Sets: `worker` (the crashed one), `delay_ms`, `deaths`.
    RestartScheduled,

    /// Spawning the replacement for a crashed worker failed.
    ///
    /// Sets: `worker` (the crashed one), `reason`.
    RestartFailed,

    // === Reload ===
    /// A rolling reload session started.
    ///
    /// Sets: `count` (number of swap pairs).
    ReloadStarted,

    /// A reload request was rejected.
    ///
    /// Sets: `reason`.
    ReloadRejected,

    /// A replacement became ready; its original is being retired.
    ///
    /// Sets: `worker` (replacement), `peer` (original).
    ReplacementReady,

    /// A swap pair finished.
    ///
    /// Sets: `worker` (original), `peer` (replacement, if any), `reason` (on failure/degraded).
    SwapFinished,

    /// The reload session finished.
    ///
    /// Sets: `count` (completed pairs), `reason` (summary when failed).
    ReloadFinished,

    // === Shutdown ===
    /// A pool shutdown was requested.
    ///
    /// Sets: `count` (workers being stopped), `timeout_ms`.
    ShutdownRequested,

    /// Every worker settled (disconnected or killed).
    ///
    /// Sets: `count` (workers that were force-killed).
    ShutdownSettled,

    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (`subscriber=... info=...`).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (`subscriber=... reason=...`).
    SubscriberOverflow,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker the event is about.
    pub worker: Option<WorkerId>,
    /// Related worker (the other half of a swap pair).
    pub peer: Option<WorkerId>,
    /// Address the worker listens on.
    pub addr: Option<SocketAddr>,
    /// Why the worker exited.
    pub exit: Option<ExitReason>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Backoff death counter.
    pub deaths: Option<u32>,
    /// Generic count (pairs, workers).
    pub count: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            peer: None,
            addr: None,
            exit: None,
            timeout_ms: None,
            delay_ms: None,
            deaths: None,
            count: None,
            reason: None,
        }
    }

    /// Attaches the worker the event is about.
    #[inline]
    pub fn with_worker(mut self, id: WorkerId) -> Self {
        self.worker = Some(id);
        self
    }

    /// Attaches the other half of a swap pair.
    #[inline]
    pub fn with_peer(mut self, id: WorkerId) -> Self {
        self.peer = Some(id);
        self
    }

    /// Attaches a listening address, if any.
    #[inline]
    pub fn with_addr(mut self, addr: Option<SocketAddr>) -> Self {
        self.addr = addr;
        self
    }

    /// Attaches an exit reason.
    #[inline]
    pub fn with_exit(mut self, exit: ExitReason) -> Self {
        self.exit = Some(exit);
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches the backoff death counter.
    #[inline]
    pub fn with_deaths(mut self, n: u32) -> Self {
        self.deaths = Some(n);
        self
    }

    /// Attaches a generic count.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::WorkerSpawned);
        let b = Event::new(EventKind::WorkerReady);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn durations_are_compacted_to_millis() {
        let ev = Event::new(EventKind::StopTimedOut)
            .with_timeout(Duration::from_secs(10))
            .with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(10_000));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }

    #[test]
    fn overflow_event_names_subscriber() {
        let ev = Event::subscriber_overflow("audit", "full");
        assert_eq!(ev.kind, EventKind::SubscriberOverflow);
        assert_eq!(ev.reason.as_deref(), Some("subscriber=audit reason=full"));
    }
}
