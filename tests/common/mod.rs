//! In-memory process runtime for integration tests.
//!
//! Workers are channels: the test decides when they become ready, how they
//! answer a disconnect request and when they crash. Every interaction is
//! appended to an ordered operation log.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use workvisor::{
    Event, EventKind, ProcessRuntime, RuntimeEvent, SpawnError, Spawned, WorkerId,
};

/// One interaction with the fake runtime, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Spawn(WorkerId),
    Ready(WorkerId),
    Disconnect(WorkerId),
    Kill(WorkerId),
    Crash(WorkerId),
}

/// When a new worker reports readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyMode {
    /// Right away (buffered until the handle is monitored).
    Immediate,
    /// After a delay.
    After(Duration),
    /// Never.
    Never,
}

/// How a worker answers a disconnect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectMode {
    /// Disconnects and exits after the delay.
    After(Duration),
    /// Ignores the request; only a kill ends it.
    Ignore,
}

#[derive(Debug)]
struct FakeWorker {
    tx: mpsc::UnboundedSender<RuntimeEvent>,
    disconnect: DisconnectMode,
    disconnect_requested: bool,
    exited: bool,
}

#[derive(Debug)]
struct Shared {
    workers: Mutex<HashMap<WorkerId, FakeWorker>>,
    ops: Mutex<Vec<Op>>,
    ready: Mutex<ReadyMode>,
    disconnect: Mutex<DisconnectMode>,
}

impl Shared {
    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }

    fn send(&self, id: WorkerId, ev: RuntimeEvent) {
        let mut workers = self.workers.lock().unwrap();
        let Some(w) = workers.get_mut(&id) else {
            return;
        };
        if w.exited {
            return;
        }
        if matches!(ev, RuntimeEvent::Exited { .. }) {
            w.exited = true;
        }
        let _ = w.tx.send(ev);
    }

    fn mark_ready(&self, id: WorkerId) {
        let alive = self
            .workers
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|w| !w.exited);
        if alive {
            self.record(Op::Ready(id));
            self.send(id, RuntimeEvent::Ready(Some(addr())));
        }
    }
}

/// Address every fake worker "binds".
pub fn addr() -> SocketAddr {
    "127.0.0.1:8000".parse().unwrap()
}

/// Scriptable [`ProcessRuntime`].
#[derive(Debug, Clone)]
pub struct FakeRuntime {
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    failures: Arc<AtomicUsize>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    /// Workers become ready immediately and disconnect after 10ms.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                workers: Mutex::new(HashMap::new()),
                ops: Mutex::new(Vec::new()),
                ready: Mutex::new(ReadyMode::Immediate),
                disconnect: Mutex::new(DisconnectMode::After(Duration::from_millis(10))),
            }),
            next_id: Arc::new(AtomicU64::new(1)),
            failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Readiness behaviour of workers spawned from now on.
    pub fn set_ready(&self, mode: ReadyMode) {
        *self.shared.ready.lock().unwrap() = mode;
    }

    /// Disconnect behaviour of workers spawned from now on.
    pub fn set_disconnect(&self, mode: DisconnectMode) {
        *self.shared.disconnect.lock().unwrap() = mode;
    }

    /// Disconnect behaviour of one existing worker.
    pub fn set_worker_disconnect(&self, id: WorkerId, mode: DisconnectMode) {
        if let Some(w) = self.shared.workers.lock().unwrap().get_mut(&id) {
            w.disconnect = mode;
        }
    }

    /// Makes the next `n` spawns fail.
    pub fn fail_next_spawns(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Reports readiness for a worker that was spawned with `ReadyMode::Never`.
    pub fn make_ready(&self, id: WorkerId) {
        self.shared.mark_ready(id);
    }

    /// The worker dies on its own with `code`.
    pub fn crash(&self, id: WorkerId, code: i32) {
        self.shared.record(Op::Crash(id));
        self.shared.send(
            id,
            RuntimeEvent::Exited {
                code: Some(code),
                signal: None,
                requested_stop: false,
            },
        );
    }

    /// Operation log so far.
    pub fn ops(&self) -> Vec<Op> {
        self.shared.ops.lock().unwrap().clone()
    }

    /// Ids spawned so far, in order.
    pub fn spawned(&self) -> Vec<WorkerId> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Spawn(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Position of `op` in the log.
    pub fn position(&self, op: Op) -> Option<usize> {
        self.ops().iter().position(|o| *o == op)
    }

    /// Number of times `op` was logged.
    pub fn count(&self, op: Op) -> usize {
        self.ops().iter().filter(|o| **o == op).count()
    }
}

#[async_trait]
impl ProcessRuntime for FakeRuntime {
    async fn spawn(&self) -> Result<Spawned, SpawnError> {
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(SpawnError::Rejected {
                error: "scripted failure".into(),
            });
        }

        let id = WorkerId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, events) = mpsc::unbounded_channel();
        let disconnect = *self.shared.disconnect.lock().unwrap();
        self.shared.workers.lock().unwrap().insert(
            id,
            FakeWorker {
                tx,
                disconnect,
                disconnect_requested: false,
                exited: false,
            },
        );
        self.shared.record(Op::Spawn(id));

        let ready = *self.shared.ready.lock().unwrap();
        match ready {
            ReadyMode::Immediate => self.shared.mark_ready(id),
            ReadyMode::After(delay) => {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.mark_ready(id);
                });
            }
            ReadyMode::Never => {}
        }

        Ok(Spawned { id, events })
    }

    fn request_disconnect(&self, id: WorkerId) {
        self.shared.record(Op::Disconnect(id));
        let mode = {
            let mut workers = self.shared.workers.lock().unwrap();
            let Some(w) = workers.get_mut(&id) else {
                return;
            };
            w.disconnect_requested = true;
            w.disconnect
        };

        if let DisconnectMode::After(delay) = mode {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                shared.send(id, RuntimeEvent::Disconnected);
                shared.send(
                    id,
                    RuntimeEvent::Exited {
                        code: Some(0),
                        signal: None,
                        requested_stop: true,
                    },
                );
            });
        }
    }

    fn force_kill(&self, id: WorkerId) {
        self.shared.record(Op::Kill(id));
        let requested = self
            .shared
            .workers
            .lock()
            .unwrap()
            .get(&id)
            .is_some_and(|w| w.disconnect_requested);
        self.shared.send(
            id,
            RuntimeEvent::Exited {
                code: None,
                signal: Some(9),
                requested_stop: requested,
            },
        );
    }
}

/// Receives events until one of `kind` arrives (optionally for `worker`).
pub async fn next_event(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
    worker: Option<WorkerId>,
) -> Event {
    loop {
        match rx.recv().await {
            Ok(ev) if ev.kind == kind && (worker.is_none() || ev.worker == worker) => return ev,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => panic!("bus closed waiting for {kind:?}"),
        }
    }
}

/// Receives `n` events of `kind`.
pub async fn next_events(
    rx: &mut broadcast::Receiver<Event>,
    kind: EventKind,
    n: usize,
) -> Vec<Event> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        out.push(next_event(rx, kind, None).await);
    }
    out
}
