//! # WorkerHandle: supervisor-side proxy for one worker process.
//!
//! A handle wraps the [`Lifecycle`] state machine in a `watch` channel and
//! drives it from the runtime's per-worker event stream.
//!
//! ```text
//! ProcessRuntime ── RuntimeEvent ──► pump (monitor task) ──► Lifecycle (watch)
//!                                         │                      │
//!                                         ├─► Bus events         ├─► ready()
//!                                         └─► exit notification  └─► request_graceful_stop()
//! ```
//!
//! ## Graceful stop
//! `request_graceful_stop(timeout)` races the disconnect notification against
//! a timer; the first one wins:
//! - disconnect first → `Ok(())`;
//! - timer first → `force_kill`, `Err(WorkerError::StopTimeout)`.
//!
//! The race runs in its own task and is shared: every caller observes the
//! outcome of the first request, later timeouts are ignored. A stop, once
//! requested, always runs to completion even if every caller goes away.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant};

use super::state::{ExitReason, Lifecycle, Transition, WorkerState};
use crate::error::{SpawnError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::runtime::{RuntimeEvent, RuntimeEvents, RuntimeRef, WorkerId};

/// Exit notification delivered to the handle's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Worker that exited.
    pub id: WorkerId,
    /// Why it exited.
    pub reason: ExitReason,
}

/// Result of the (single) graceful-stop race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker disconnected in time.
    Disconnected,
    /// The worker was already gone when the stop was requested.
    AlreadyExited,
    /// The timer fired first; the worker was force-killed.
    TimedOut(Duration),
}

type StopFuture = Shared<BoxFuture<'static, StopOutcome>>;

struct Inner {
    id: WorkerId,
    spawned_at: Instant,
    runtime: RuntimeRef,
    bus: Bus,
    lifecycle: watch::Sender<Lifecycle>,
    events: Mutex<Option<RuntimeEvents>>,
    stop: Mutex<Option<StopFuture>>,
}

/// Cheap, cloneable handle to one worker.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl WorkerHandle {
    /// Asks the runtime for a new worker; the handle starts in `spawning`.
    ///
    /// Events are buffered until [`monitor`](Self::monitor) is called, so the
    /// owner can register the handle before any transition is applied.
    pub async fn spawn(runtime: RuntimeRef, bus: Bus) -> Result<Self, SpawnError> {
        let spawned = match runtime.spawn().await {
            Ok(s) => s,
            Err(e) => {
                bus.publish(Event::new(EventKind::SpawnFailed).with_reason(e.to_string()));
                return Err(e);
            }
        };

        let (lifecycle, _) = watch::channel(Lifecycle::new());
        bus.publish(Event::new(EventKind::WorkerSpawned).with_worker(spawned.id));

        Ok(Self {
            inner: Arc::new(Inner {
                id: spawned.id,
                spawned_at: Instant::now(),
                runtime,
                bus,
                lifecycle,
                events: Mutex::new(Some(spawned.events)),
                stop: Mutex::new(None),
            }),
        })
    }

    /// Starts applying runtime events; the exit is reported once on `exits`.
    ///
    /// Calling it more than once has no effect.
    pub fn monitor(&self, exits: mpsc::UnboundedSender<WorkerExit>) {
        let Some(events) = lock(&self.inner.events).take() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(pump(inner, events, exits));
    }

    /// Runtime-assigned identity.
    pub fn id(&self) -> WorkerId {
        self.inner.id
    }

    /// When the runtime confirmed the process.
    pub fn spawned_at(&self) -> Instant {
        self.inner.spawned_at
    }

    /// Current coarse state.
    pub fn state(&self) -> WorkerState {
        self.inner.lifecycle.borrow().state
    }

    /// Full lifecycle snapshot.
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle.borrow().clone()
    }

    /// Bound address, once ready.
    pub fn address(&self) -> Option<SocketAddr> {
        self.inner.lifecycle.borrow().addr
    }

    /// Exit reason, once exited.
    pub fn exit_reason(&self) -> Option<ExitReason> {
        self.inner.lifecycle.borrow().exit
    }

    /// Waits until the worker is ready; fails if it exits first.
    pub async fn ready(&self) -> Result<Option<SocketAddr>, WorkerError> {
        let mut rx = self.inner.lifecycle.subscribe();
        let snapshot = match rx
            .wait_for(|lc| lc.ready || lc.state == WorkerState::Exited)
            .await
        {
            Ok(lc) => (*lc).clone(),
            Err(_) => self.lifecycle(),
        };

        if snapshot.ready {
            Ok(snapshot.addr)
        } else {
            Err(WorkerError::ExitedBeforeReady {
                id: self.id(),
                reason: snapshot.exit.unwrap_or(ExitReason::Crashed(None)),
            })
        }
    }

    /// Like [`ready`](Self::ready), bounded by `limit` when set.
    pub async fn ready_within(
        &self,
        limit: Option<Duration>,
    ) -> Result<Option<SocketAddr>, WorkerError> {
        match limit {
            None => self.ready().await,
            Some(limit) => match time::timeout(limit, self.ready()).await {
                Ok(res) => res,
                Err(_elapsed) => Err(WorkerError::ReadyTimeout {
                    id: self.id(),
                    timeout: limit,
                }),
            },
        }
    }

    /// Waits until the worker exited.
    pub async fn exited(&self) -> ExitReason {
        let mut rx = self.inner.lifecycle.subscribe();
        let exit = match rx.wait_for(|lc| lc.exit.is_some()).await {
            Ok(lc) => lc.exit,
            Err(_) => self.exit_reason(),
        };
        exit.unwrap_or(ExitReason::Crashed(None))
    }

    /// Asks the worker to disconnect; force-kills it after `timeout`.
    ///
    /// Idempotent: only the first call arms a timer, every call resolves with
    /// the outcome of that first race.
    pub async fn request_graceful_stop(&self, timeout: Duration) -> Result<(), WorkerError> {
        let stop = {
            let mut slot = lock(&self.inner.stop);
            slot.get_or_insert_with(|| self.start_stop(timeout)).clone()
        };

        match stop.await {
            StopOutcome::Disconnected | StopOutcome::AlreadyExited => Ok(()),
            StopOutcome::TimedOut(timeout) => Err(WorkerError::StopTimeout {
                id: self.id(),
                timeout,
            }),
        }
    }

    /// Terminates the worker unconditionally.
    pub fn force_kill(&self) {
        self.inner.runtime.force_kill(self.inner.id);
    }

    fn start_stop(&self, timeout: Duration) -> StopFuture {
        let began = self.inner.lifecycle.send_if_modified(Lifecycle::begin_stop);
        if !began {
            return futures::future::ready(StopOutcome::AlreadyExited)
                .boxed()
                .shared();
        }

        let inner = Arc::clone(&self.inner);
        inner.bus.publish(
            Event::new(EventKind::StopRequested)
                .with_worker(inner.id)
                .with_timeout(timeout),
        );
        inner.runtime.request_disconnect(inner.id);

        let race = tokio::spawn(async move {
            let mut rx = inner.lifecycle.subscribe();
            tokio::select! {
                biased;
                _ = rx.wait_for(|lc| lc.disconnected) => StopOutcome::Disconnected,
                _ = time::sleep(timeout) => {
                    inner.runtime.force_kill(inner.id);
                    inner.bus.publish(
                        Event::new(EventKind::StopTimedOut)
                            .with_worker(inner.id)
                            .with_timeout(timeout),
                    );
                    StopOutcome::TimedOut(timeout)
                }
            }
        });

        race.map(move |res| res.unwrap_or(StopOutcome::TimedOut(timeout)))
            .boxed()
            .shared()
    }
}

/// Applies runtime events until the worker exits.
async fn pump(
    inner: Arc<Inner>,
    mut events: RuntimeEvents,
    exits: mpsc::UnboundedSender<WorkerExit>,
) {
    loop {
        // A runtime that drops the stream without an exit lost the worker.
        let ev = events.recv().await.unwrap_or(RuntimeEvent::Exited {
            code: None,
            signal: None,
            requested_stop: false,
        });

        let mut transition = Transition::Ignored;
        inner.lifecycle.send_if_modified(|lc| {
            transition = lc.apply(&ev);
            transition != Transition::Ignored
        });

        match transition {
            Transition::Ready(addr) => inner.bus.publish(
                Event::new(EventKind::WorkerReady)
                    .with_worker(inner.id)
                    .with_addr(addr),
            ),
            Transition::Disconnected => inner
                .bus
                .publish(Event::new(EventKind::WorkerDisconnected).with_worker(inner.id)),
            Transition::Exited(reason) => {
                inner.bus.publish(
                    Event::new(EventKind::WorkerExited)
                        .with_worker(inner.id)
                        .with_exit(reason),
                );
                let _ = exits.send(WorkerExit {
                    id: inner.id,
                    reason,
                });
                break;
            }
            Transition::Ignored => {}
        }
    }
}
