//! # Process runtime: the collaborator that owns OS-level worker processes.
//!
//! The supervisor never touches processes directly. It talks to a
//! [`ProcessRuntime`], which creates workers, signals them and reports what
//! happened to them as a stream of [`RuntimeEvent`]s per worker.
//!
//! ```text
//! Pool/Reloader ──► WorkerHandle ──► ProcessRuntime::spawn()
//!                        ▲                   │
//!                        │        Spawned { id, events }
//!                        │                   │
//!                        └── RuntimeEvent ◄──┘  Ready(addr) / Disconnected / Exited
//! ```
//!
//! ## Rules
//! - `spawn` completes once the process exists; readiness arrives later as
//!   [`RuntimeEvent::Ready`].
//! - Each worker reports at most one `Ready`, and exactly one `Exited` (last).
//! - `request_disconnect` and `force_kill` are non-blocking requests; the
//!   outcome arrives through the event stream.
//!
//! [`CommandRuntime`] is the production implementation; tests inject their own.

mod command;

pub use command::CommandRuntime;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::SpawnError;

/// Opaque worker identifier assigned by the process runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Wraps a runtime-assigned identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle notification delivered by the runtime for one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// The worker became network-active (or signalled readiness).
    Ready(Option<SocketAddr>),
    /// The worker dropped its connection to the supervisor.
    Disconnected,
    /// The worker process is gone.
    Exited {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Terminating signal number, if killed by a signal.
        signal: Option<i32>,
        /// True when the exit followed a `request_disconnect`.
        requested_stop: bool,
    },
}

/// Receiving end of a worker's event stream.
pub type RuntimeEvents = mpsc::UnboundedReceiver<RuntimeEvent>;

/// A freshly created worker process.
#[derive(Debug)]
pub struct Spawned {
    /// Runtime-assigned identity.
    pub id: WorkerId,
    /// Events for this worker, in the order they happened.
    pub events: RuntimeEvents,
}

/// Creates, signals and tears down worker processes.
#[async_trait]
pub trait ProcessRuntime: Send + Sync + 'static {
    /// Creates a new worker running the application entry point.
    ///
    /// Must be a full re-execution of the application, so that code changes on
    /// disk take effect in the new process.
    async fn spawn(&self) -> Result<Spawned, SpawnError>;

    /// Asks the worker to disconnect and exit voluntarily.
    fn request_disconnect(&self, id: WorkerId);

    /// Terminates the worker unconditionally.
    fn force_kill(&self, id: WorkerId);
}

/// Shared handle to a process runtime.
pub type RuntimeRef = Arc<dyn ProcessRuntime>;
