//! Error types used by the workvisor runtime, workers and applications.
//!
//! - [`SpawnError`] the process runtime could not create a worker.
//! - [`WorkerError`] a per-worker lifecycle failure (stop timeout, early exit).
//! - [`ReloadError`] a rolling reload could not be started.
//! - [`RuntimeError`] supervisor-level failures.
//! - [`AppError`] returned by a worker application's `init`.
//!
//! Every type provides `as_label` (stable snake_case) for logs/metrics.
//! None of these are fatal to the supervisor: per-worker failures end up in
//! reports and events, only [`RuntimeError`] reaches the bootstrap layer.

use std::time::Duration;
use thiserror::Error;

use crate::runtime::WorkerId;
use crate::worker::ExitReason;

/// # Errors produced while asking the process runtime for a new worker.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum SpawnError {
    /// The worker executable could not be resolved.
    #[error("cannot resolve worker executable: {error}")]
    Executable {
        /// The underlying io error message.
        error: String,
    },

    /// The OS refused to create the process.
    #[error("failed to spawn worker process: {error}")]
    Io {
        /// The underlying io error message.
        error: String,
    },

    /// The process was created without the pipes the supervisor needs.
    #[error("worker process {pid:?} started without {pipe} pipe")]
    MissingPipe {
        /// OS process id, when known.
        pid: Option<u32>,
        /// Name of the missing pipe.
        pipe: &'static str,
    },

    /// Any other runtime-specific failure.
    #[error("worker runtime rejected spawn: {error}")]
    Rejected {
        /// Runtime-provided reason.
        error: String,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Executable { .. } => "spawn_executable",
            SpawnError::Io { .. } => "spawn_io",
            SpawnError::MissingPipe { .. } => "spawn_missing_pipe",
            SpawnError::Rejected { .. } => "spawn_rejected",
        }
    }
}

impl From<std::io::Error> for SpawnError {
    fn from(e: std::io::Error) -> Self {
        SpawnError::Io {
            error: e.to_string(),
        }
    }
}

/// # Errors produced by a single worker's lifecycle.
///
/// All of them are recovered locally (force-kill, pair failure) and only surface
/// in reports and log records.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker did not disconnect in time and was force-killed.
    #[error("worker {id} killed by timeout of {timeout:?} - disconnect failed")]
    StopTimeout {
        /// Worker that was killed.
        id: WorkerId,
        /// The configured stop timeout.
        timeout: Duration,
    },

    /// The worker exited before it ever became ready.
    #[error("worker {id} exited before becoming ready ({reason})")]
    ExitedBeforeReady {
        /// Worker that exited.
        id: WorkerId,
        /// Why it exited.
        reason: ExitReason,
    },

    /// The worker did not become ready within the configured bound.
    #[error("worker {id} not ready after {timeout:?}")]
    ReadyTimeout {
        /// Worker that stayed in `spawning`.
        id: WorkerId,
        /// The configured readiness bound.
        timeout: Duration,
    },
}

impl WorkerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::StopTimeout { .. } => "worker_stop_timeout",
            WorkerError::ExitedBeforeReady { .. } => "worker_exited_before_ready",
            WorkerError::ReadyTimeout { .. } => "worker_ready_timeout",
        }
    }

    /// Worker the error refers to.
    pub fn worker(&self) -> WorkerId {
        match self {
            WorkerError::StopTimeout { id, .. }
            | WorkerError::ExitedBeforeReady { id, .. }
            | WorkerError::ReadyTimeout { id, .. } => *id,
        }
    }
}

/// # Reasons a rolling reload request is rejected.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadError {
    /// Another reload session is active; requests are never queued.
    #[error("reload already in progress")]
    InProgress,

    /// The pool is shutting down.
    #[error("pool is shutting down")]
    ShuttingDown,
}

impl ReloadError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ReloadError::InProgress => "reload_in_progress",
            ReloadError::ShuttingDown => "reload_shutting_down",
        }
    }
}

/// # Errors produced by the supervisor itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS signal handlers could not be installed.
    #[error("cannot install signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    /// `start` was called on a supervisor that already started its pool.
    #[error("supervisor already started")]
    AlreadyStarted,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signal(_) => "runtime_signal",
            RuntimeError::AlreadyStarted => "runtime_already_started",
        }
    }
}

/// # Errors returned by a worker application.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AppError {
    /// The application failed; the worker exits with a non-zero code.
    #[error("application failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Io failure inside the application or the worker protocol.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Shorthand for [`AppError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        AppError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AppError::Fail { .. } => "app_failed",
            AppError::Io(_) => "app_io",
        }
    }
}
