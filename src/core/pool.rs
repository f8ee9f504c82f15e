//! # Pool controller: owns the live workers.
//!
//! The pool keeps the map of live [`WorkerHandle`]s and reacts to their exits:
//! - `start_pool(n)` spawns `n` workers concurrently (failures are reported, not fatal);
//! - an unplanned exit is recorded in the [`BackoffTracker`], and after
//!   `current_delay()` exactly one replacement is spawned;
//! - `shutdown_all(timeout)` gracefully stops every live worker and reports
//!   per-worker outcomes, it never fails as a whole.
//!
//! ## Architecture
//! ```text
//! WorkerHandle pumps ── WorkerExit ──► Pool.exit_listener()
//!                                        ├─► remove from live map (exactly once)
//!                                        ├─► planned?          → done
//!                                        ├─► record death, notify crash observer
//!                                        ├─► checked out?      → deferred to the reload pair
//!                                        ├─► shutting down?    → done
//!                                        └─► spawn restart: sleep(delay) → spawn_worker()
//! ```
//!
//! ## Rules
//! - The live map and the checkout set live under one lock; every mutation
//!   (insert on spawn, remove on exit, checkout/release) is atomic.
//! - A handle is inserted before its events are applied, so an exit can never
//!   overtake the insertion.
//! - A checked-out worker that crashes is not restarted while its reload pair
//!   may still replace it. The pair either [`retire`](Pool::retire)s it or
//!   [`reclaim`](Pool::reclaim)s it, and a reclaimed crash is restarted then.
//! - A restart never propagates a failure: a failed replacement spawn is
//!   published as `RestartFailed` and not retried here.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::SpawnError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::BackoffTracker;
use crate::runtime::{RuntimeRef, WorkerId};
use crate::worker::{WorkerExit, WorkerHandle, WorkerState};

/// Callback invoked for every unplanned worker exit (logging/alerting only).
pub type CrashObserver = Arc<dyn Fn(&WorkerExit) + Send + Sync>;

/// Outcome of [`Pool::start_pool`].
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    /// Requested pool size.
    pub requested: usize,
    /// Workers that were spawned.
    pub spawned: Vec<WorkerId>,
    /// Spawn failures, one per missing worker.
    pub failed: Vec<SpawnError>,
}

/// Outcome of [`Pool::shutdown_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers that disconnected in time (or were already gone).
    pub stopped: Vec<WorkerId>,
    /// Workers that were force-killed after the timeout.
    pub timed_out: Vec<WorkerId>,
}

impl ShutdownReport {
    /// Total number of workers that settled.
    pub fn settled(&self) -> usize {
        self.stopped.len() + self.timed_out.len()
    }
}

/// Who decides what happens when a checked-out worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Custody {
    /// Held by a reload pair.
    Held,
    /// Crashed while held; the restart waits for `reclaim`.
    Crashed,
    /// Given up by its pair; the exit is never restarted.
    Retired,
}

#[derive(Default)]
struct Members {
    workers: HashMap<WorkerId, WorkerHandle>,
    checked_out: HashMap<WorkerId, Custody>,
}

/// Owns the set of live workers.
pub struct Pool {
    runtime: RuntimeRef,
    bus: Bus,
    backoff: Arc<BackoffTracker>,
    stop_timeout: Duration,
    members: RwLock<Members>,
    exits_tx: mpsc::UnboundedSender<WorkerExit>,
    exits_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerExit>>>,
    token: CancellationToken,
    target: AtomicUsize,
    shutting_down: AtomicBool,
    crash_observer: Option<CrashObserver>,
}

impl Pool {
    /// Creates an empty pool. Call [`spawn_listener`](Self::spawn_listener) once.
    pub fn new(
        runtime: RuntimeRef,
        bus: Bus,
        backoff: BackoffTracker,
        stop_timeout: Duration,
        crash_observer: Option<CrashObserver>,
    ) -> Arc<Self> {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            runtime,
            bus,
            backoff: Arc::new(backoff),
            stop_timeout,
            members: RwLock::new(Members::default()),
            exits_tx,
            exits_rx: Mutex::new(Some(exits_rx)),
            token: CancellationToken::new(),
            target: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            crash_observer,
        })
    }

    /// Spawns the exit listener and the backoff decay task.
    ///
    /// Both stop when the pool is closed by [`shutdown_all`](Self::shutdown_all).
    pub fn spawn_listener(self: &Arc<Self>) {
        let Some(mut rx) = self.exits_rx.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };

        let me = Arc::clone(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Some(exit) => me.handle_exit(exit).await,
                        None => break,
                    }
                }
            }
        });

        let backoff = Arc::clone(&self.backoff);
        let token = self.token.clone();
        tokio::spawn(async move { backoff.run_decay(token).await });
    }

    /// Spawns `target` workers concurrently.
    pub async fn start_pool(&self, target: usize) -> StartReport {
        self.target.store(target, Ordering::Release);

        let results = join_all((0..target).map(|_| self.spawn_worker(false))).await;

        let mut report = StartReport {
            requested: target,
            ..StartReport::default()
        };
        for res in results {
            match res {
                Ok(handle) => report.spawned.push(handle.id()),
                Err(e) => report.failed.push(e),
            }
        }
        report
    }

    /// Spawns one worker and registers it as live.
    ///
    /// With `checkout`, the worker starts checked out: a crash is not
    /// restarted by the pool until it is [`release`](Self::release)d.
    pub async fn spawn_worker(&self, checkout: bool) -> Result<WorkerHandle, SpawnError> {
        let handle = WorkerHandle::spawn(Arc::clone(&self.runtime), self.bus.clone()).await?;
        {
            let mut members = self.members.write().await;
            members.workers.insert(handle.id(), handle.clone());
            if checkout {
                members.checked_out.insert(handle.id(), Custody::Held);
            }
        }
        handle.monitor(self.exits_tx.clone());

        if self.is_shutting_down() {
            // Raced with shutdown_all's last sweep.
            let late = handle.clone();
            let timeout = self.stop_timeout;
            tokio::spawn(async move {
                let _ = late.request_graceful_stop(timeout).await;
            });
        }
        Ok(handle)
    }

    /// Checks out every live, serving worker that nobody else is retiring.
    pub async fn checkout_live(&self) -> Vec<WorkerHandle> {
        let mut members = self.members.write().await;
        let Members {
            workers,
            checked_out,
        } = &mut *members;

        let mut taken: Vec<WorkerHandle> = workers
            .values()
            .filter(|h| !checked_out.contains_key(&h.id()))
            .filter(|h| matches!(h.state(), WorkerState::Spawning | WorkerState::Ready))
            .cloned()
            .collect();
        taken.sort_unstable_by_key(|h| h.id());

        for h in &taken {
            checked_out.insert(h.id(), Custody::Held);
        }
        taken
    }

    /// Returns a checked-out worker to the pool's crash handling.
    ///
    /// A worker that already exited stays checked out until its exit is
    /// handled, so it is never restarted; `false` is returned then.
    pub async fn release(&self, id: WorkerId) -> bool {
        let mut members = self.members.write().await;
        let exited = members
            .workers
            .get(&id)
            .is_none_or(|h| h.state() == WorkerState::Exited);
        if !exited {
            members.checked_out.remove(&id);
        }
        !exited
    }

    /// Gives a checked-out worker back for good, whatever state it is in.
    ///
    /// A crash that happened while it was checked out is restarted now; a
    /// crash still in flight is restarted when its exit is handled.
    pub async fn reclaim(self: &Arc<Self>, id: WorkerId) {
        let custody = self.members.write().await.checked_out.remove(&id);
        if custody == Some(Custody::Crashed) && !self.is_shutting_down() {
            let me = Arc::clone(self);
            tokio::spawn(async move { me.restart(id).await });
        }
    }

    /// Drops a checked-out worker from the pool's crash handling.
    ///
    /// Used for retired originals and abandoned replacements: their exit,
    /// past or future, is never restarted.
    pub async fn retire(&self, id: WorkerId) {
        let mut members = self.members.write().await;
        if !members.checked_out.contains_key(&id) {
            return;
        }
        if members.workers.contains_key(&id) {
            members.checked_out.insert(id, Custody::Retired);
        } else {
            members.checked_out.remove(&id);
        }
    }

    /// Gracefully stops every live worker with the given timeout.
    ///
    /// Workers that appear while the shutdown runs (restarts already in flight)
    /// are stopped too. Closes the pool: no restart happens afterwards.
    pub async fn shutdown_all(&self, timeout: Duration) -> ShutdownReport {
        self.shutting_down.store(true, Ordering::Release);

        let mut report = ShutdownReport::default();
        let mut seen: HashSet<WorkerId> = HashSet::new();

        loop {
            let batch: Vec<WorkerHandle> = {
                let members = self.members.read().await;
                members
                    .workers
                    .values()
                    .filter(|h| !seen.contains(&h.id()))
                    .cloned()
                    .collect()
            };
            if batch.is_empty() {
                break;
            }

            self.bus.publish(
                Event::new(EventKind::ShutdownRequested)
                    .with_count(batch.len())
                    .with_timeout(timeout),
            );

            let outcomes = join_all(batch.iter().map(|h| async move {
                (h.id(), h.request_graceful_stop(timeout).await)
            }))
            .await;

            for (id, res) in outcomes {
                seen.insert(id);
                match res {
                    Ok(()) => report.stopped.push(id),
                    Err(_) => report.timed_out.push(id),
                }
            }
        }

        {
            let mut members = self.members.write().await;
            for id in &seen {
                members.workers.remove(id);
                members.checked_out.remove(id);
            }
        }
        self.token.cancel();

        report.stopped.sort_unstable();
        report.timed_out.sort_unstable();
        self.bus
            .publish(Event::new(EventKind::ShutdownSettled).with_count(report.timed_out.len()));
        report
    }

    /// Graceful-stop timeout used by reloads and shutdown.
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    /// Target size passed to the last [`start_pool`](Self::start_pool).
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// True once [`shutdown_all`](Self::shutdown_all) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// The crash-restart backoff tracker.
    pub fn backoff(&self) -> &BackoffTracker {
        &self.backoff
    }

    /// Number of live workers (any state but exited).
    pub async fn len(&self) -> usize {
        self.members.read().await.workers.len()
    }

    /// True when no worker is live.
    pub async fn is_empty(&self) -> bool {
        self.members.read().await.workers.is_empty()
    }

    /// Number of live workers that are currently ready.
    pub async fn ready_count(&self) -> usize {
        self.members
            .read()
            .await
            .workers
            .values()
            .filter(|h| h.state() == WorkerState::Ready)
            .count()
    }

    /// Sorted ids of the live workers.
    pub async fn ids(&self) -> Vec<WorkerId> {
        let members = self.members.read().await;
        let mut ids: Vec<WorkerId> = members.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Handle of a live worker.
    pub async fn get(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.members.read().await.workers.get(&id).cloned()
    }

    /// Handles exactly one exit notification.
    async fn handle_exit(self: &Arc<Self>, exit: WorkerExit) {
        let unplanned = exit.reason.is_unplanned();
        let checked_out = {
            let mut members = self.members.write().await;
            members.workers.remove(&exit.id);
            match members.checked_out.remove(&exit.id) {
                Some(Custody::Held) if unplanned && !self.is_shutting_down() => {
                    members.checked_out.insert(exit.id, Custody::Crashed);
                    true
                }
                Some(_) => true,
                None => false,
            }
        };

        if !unplanned {
            return;
        }

        let deaths = self.backoff.record_unplanned_death();
        self.bus.publish(
            Event::new(EventKind::WorkerCrashed)
                .with_worker(exit.id)
                .with_exit(exit.reason)
                .with_deaths(deaths),
        );
        if let Some(observer) = &self.crash_observer {
            observer(&exit);
        }

        if checked_out || self.is_shutting_down() {
            return;
        }

        let me = Arc::clone(self);
        tokio::spawn(async move { me.restart(exit.id).await });
    }

    /// Spawns a single replacement for `crashed` after the backoff delay.
    async fn restart(&self, crashed: WorkerId) {
        let delay = self.backoff.current_delay();
        self.bus.publish(
            Event::new(EventKind::RestartScheduled)
                .with_worker(crashed)
                .with_delay(delay)
                .with_deaths(self.backoff.deaths()),
        );

        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.token.cancelled() => return,
            }
        }
        if self.is_shutting_down() {
            return;
        }

        if let Err(e) = self.spawn_worker(false).await {
            self.bus.publish(
                Event::new(EventKind::RestartFailed)
                    .with_worker(crashed)
                    .with_reason(e.to_string()),
            );
        }
    }
}
