//! # Supervisor: the front door of the process pool.
//!
//! The [`Supervisor`] owns the event bus, a [`SubscriberSet`], the [`Pool`]
//! and the [`Reloader`], and maps OS signals onto them.
//!
//! ## High-level architecture
//! ```text
//! run():
//!   signals::listen()      (handlers installed before the first spawn)
//!   start()  ──► Config::effective_workers() ──► Pool::start_pool(n)
//!
//! Signal loop:
//!   SIGHUP          ──► Reloader::spawn_reload()      (rejected while one runs)
//!   SIGTERM/SIGINT  ──► Pool::shutdown_all(stop_timeout) ──► Ok(ShutdownReport)
//!
//! Event flow:
//!   Pool / WorkerHandle / Reloader ── publish(Event) ──► Bus ──► subscriber_listener
//!                                                                  └─► SubscriberSet::emit
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use workvisor::{CommandRuntime, Config, LogWriter, Subscribe, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Arc::new(CommandRuntime::current_exe()?);
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!
//!     let sup = Supervisor::builder(runtime, Config::from_env())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let report = sup.run().await?;
//!     println!("{} workers stopped", report.settled());
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::builder::SupervisorBuilder;
use super::config::Config;
use super::pool::{Pool, ShutdownReport, StartReport};
use super::reload::{ReloadReport, Reloader};
use super::signals::{self, Signal};
use crate::error::{ReloadError, RuntimeError};
use crate::events::Bus;
use crate::runtime::RuntimeRef;
use crate::subscribers::SubscriberSet;

/// Coordinates the worker pool, rolling reloads and graceful shutdown.
pub struct Supervisor {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    pool: Arc<Pool>,
    reloader: Arc<Reloader>,
    started: AtomicBool,
}

impl Supervisor {
    /// Creates a builder over the given process runtime.
    pub fn builder(runtime: RuntimeRef, cfg: Config) -> SupervisorBuilder {
        SupervisorBuilder::new(runtime, cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        pool: Arc<Pool>,
        reloader: Arc<Reloader>,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            pool,
            reloader,
            started: AtomicBool::new(false),
        }
    }

    /// Effective configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus; subscribe for raw events.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The worker pool.
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// The rolling reloader.
    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.reloader
    }

    /// Resolves the pool size and starts every worker concurrently.
    ///
    /// Spawn failures are reported in the [`StartReport`], never as an error:
    /// even a pool where no worker could be spawned keeps the supervisor up,
    /// so it can still be reloaded or terminated.
    pub async fn start(&self) -> Result<StartReport, RuntimeError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RuntimeError::AlreadyStarted);
        }

        let n = self.cfg.effective_workers();
        info!(workers = n, "starting worker pool");

        self.pool.spawn_listener();
        let report = self.pool.start_pool(n).await;

        if report.spawned.is_empty() && n > 0 {
            let last = report.failed.last().map(ToString::to_string);
            error!(
                requested = n,
                last = last.as_deref().unwrap_or("unknown"),
                "no worker could be started, supervisor keeps serving signals"
            );
        } else if !report.failed.is_empty() {
            warn!(
                spawned = report.spawned.len(),
                failed = report.failed.len(),
                "worker pool started degraded"
            );
        } else {
            info!(workers = report.spawned.len(), "worker pool online");
        }
        Ok(report)
    }

    /// Starts a rolling reload in the background.
    ///
    /// A second request while one is running is rejected, never queued.
    pub fn reload(&self) -> Result<JoinHandle<ReloadReport>, ReloadError> {
        self.reloader.spawn_reload()
    }

    /// Runs a rolling reload to completion.
    pub async fn reload_and_wait(&self) -> Result<ReloadReport, ReloadError> {
        self.reloader.reload().await
    }

    /// Gracefully stops every worker using the configured stop timeout.
    pub async fn terminate(&self) -> ShutdownReport {
        self.pool.shutdown_all(self.cfg.stop_timeout).await
    }

    /// Starts the pool and serves OS signals until terminated.
    pub async fn run(&self) -> Result<ShutdownReport, RuntimeError> {
        let signals = signals::listen()?;
        self.start().await?;
        Ok(self.serve(signals).await)
    }

    /// Serves an already started pool from the given signal stream.
    ///
    /// Returns after the first terminate signal, or when the stream ends.
    pub async fn serve(&self, mut signals: BoxStream<'static, Signal>) -> ShutdownReport {
        loop {
            match signals.next().await {
                Some(Signal::Reload) => {
                    info!("rolling reload requested");
                    if let Err(e) = self.reload() {
                        warn!(reason = e.as_label(), "{e}");
                    }
                }
                Some(Signal::Terminate(name)) => {
                    info!(signal = name, "graceful shutdown requested");
                    break;
                }
                None => {
                    info!("signal stream closed, shutting down");
                    break;
                }
            }
        }

        let report = self.terminate().await;
        info!(
            stopped = report.stopped.len(),
            killed = report.timed_out.len(),
            "workers disconnected"
        );
        report
    }

    /// Forwards bus events to the subscriber set.
    pub(super) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscriber listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}
