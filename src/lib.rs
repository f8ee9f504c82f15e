//! # workvisor
//!
//! **Workvisor** supervises a pool of worker processes for multi-process
//! services: it sizes the pool, restarts crashed workers with a backoff,
//! stops everything gracefully on `SIGTERM`/`SIGINT` and replaces every
//! worker without downtime on `SIGHUP`.
//!
//! ## Architecture
//! ```text
//!                 ┌──────────────────────────────────────────────┐
//!   OS signals ──►│ Supervisor                                   │
//!                 │  - Pool      (live workers, crash restarts)  │
//!                 │  - Reloader  (rolling replacement)           │
//!                 │  - Bus ──► SubscriberSet ──► LogWriter, ...  │
//!                 └──────┬──────────────────┬────────────────────┘
//!                        ▼                  ▼
//!                 ┌─────────────┐    ┌─────────────┐
//!                 │WorkerHandle │ .. │WorkerHandle │   Lifecycle state machine,
//!                 └──────┬──────┘    └──────┬──────┘   idempotent graceful stop
//!                        ▼                  ▼
//!                 ┌────────────────────────────────┐
//!                 │ ProcessRuntime (CommandRuntime)│   spawn / disconnect / kill
//!                 └────────────────────────────────┘
//! ```
//!
//! ### Crash restart
//! ```text
//! worker exits ──► planned (stop was requested)? ──► done
//!             └──► unplanned ──► deaths += 1 ──► sleep(delay(deaths)) ──► spawn one replacement
//!
//! delay(deaths) = 0                    if deaths <= 10
//!               = 200ms × deaths       otherwise
//! every 60s: deaths -= 1 (floored at 0)
//! ```
//!
//! ### Rolling reload
//! ```text
//! for each live worker, concurrently:
//!   spawn replacement ──► replacement ready ──► graceful stop of the original
//! ```
//!
//! ## Features
//! | Area              | Description                                           | Key types                                  |
//! |-------------------|-------------------------------------------------------|--------------------------------------------|
//! | **Supervision**   | Pool start, signals, shutdown, reload                 | [`Supervisor`], [`Pool`], [`Reloader`]     |
//! | **Workers**       | Per-worker lifecycle and graceful stop                | [`WorkerHandle`], [`Lifecycle`]            |
//! | **Runtime**       | Process creation and signalling                       | [`ProcessRuntime`], [`CommandRuntime`]     |
//! | **Application**   | Code running inside a worker                          | [`Application`], [`AppFn`], [`WorkerContext`] |
//! | **Policies**      | Crash-restart backoff with decay                      | [`BackoffPolicy`], [`BackoffTracker`]      |
//! | **Subscriber API**| Observe lifecycle events                              | [`Subscribe`], [`Event`], [`EventKind`]    |
//! | **Errors**        | Typed errors                                          | [`SpawnError`], [`WorkerError`], [`ReloadError`], [`RuntimeError`] |
//!
//! ## Optional features
//! - `logging` (default): the [`LogWriter`] subscriber and [`logging::init`].
//!
//! ## Example
//! ```rust,no_run
//! use workvisor::{AppError, AppFn, Config, WorkerContext, bootstrap};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = AppFn::arc("idle", |ctx: WorkerContext| async move {
//!         ctx.notify_ready(None).await?;
//!         ctx.shutdown().cancelled().await;
//!         Ok::<_, AppError>(())
//!     });
//!
//!     std::process::exit(bootstrap::init(app, Config::from_env()).await);
//! }
//! ```

pub mod app;
pub mod bootstrap;
mod core;
mod error;
mod events;
#[cfg(feature = "logging")]
pub mod logging;
mod policies;
mod runtime;
mod subscribers;
mod worker;

// ---- Public re-exports ----

pub use app::{AppFn, AppRef, Application, WorkerContext};
pub use self::core::{
    Config, CrashObserver, PairOutcome, PairReport, PairStatus, Pool, ReloadGuard, ReloadReport,
    Reloader, ShutdownReport, Signal, StartReport, Supervisor, SupervisorBuilder, SwapState,
    config, signals,
};
pub use error::{AppError, ReloadError, RuntimeError, SpawnError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, BackoffTracker};
pub use runtime::{
    CommandRuntime, ProcessRuntime, RuntimeEvent, RuntimeEvents, RuntimeRef, Spawned, WorkerId,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::{
    ExitReason, Lifecycle, StopOutcome, Transition, WorkerExit, WorkerHandle, WorkerState,
};

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
