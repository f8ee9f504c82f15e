//! # Single entry point for supervisor and worker processes.
//!
//! The same binary plays both roles. [`init`] looks at the
//! [`WORKER_ENV`](crate::app::WORKER_ENV) marker:
//!
//! ```text
//! marker absent  ──► supervisor: CommandRuntime::current_exe() ─► Supervisor::run()
//! marker = <id>  ──► worker:     app::run_worker(app, id)
//! ```
//!
//! The returned value is meant for `std::process::exit`: exiting explicitly
//! also avoids waiting on the blocking stdin reader of a worker.

use std::sync::Arc;

use tracing::{error, info};

use crate::app::{self, AppRef, WORKER_ENV};
use crate::core::{Config, Supervisor};
use crate::runtime::{CommandRuntime, WorkerId};
use crate::subscribers::Subscribe;

/// Worker id from the environment marker, if this process is a worker.
pub fn worker_id() -> Option<WorkerId> {
    parse_worker_id(std::env::var(WORKER_ENV).ok()?.as_str())
}

fn parse_worker_id(raw: &str) -> Option<WorkerId> {
    raw.trim().parse::<u64>().ok().map(WorkerId::new)
}

/// Runs the supervisor or the application, whichever this process is.
///
/// Returns the process exit code: `0` after a settled shutdown or a clean
/// worker return, `1` on failure.
pub async fn init(app: AppRef, cfg: Config) -> i32 {
    match worker_id() {
        Some(id) => run_worker(app, id).await,
        None => run_supervisor(cfg, default_subscribers()).await,
    }
}

/// Like [`init`], with custom subscribers for the supervisor role.
pub async fn init_with(app: AppRef, cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> i32 {
    match worker_id() {
        Some(id) => run_worker(app, id).await,
        None => run_supervisor(cfg, subscribers).await,
    }
}

async fn run_worker(app: AppRef, id: WorkerId) -> i32 {
    info!(worker = %id, app = app.name(), pid = std::process::id(), "worker online");
    match app::run_worker(app, id).await {
        Ok(()) => 0,
        Err(e) => {
            error!(worker = %id, reason = e.as_label(), "{e}");
            1
        }
    }
}

async fn run_supervisor(cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> i32 {
    let runtime = match CommandRuntime::current_exe() {
        Ok(rt) => rt,
        Err(e) => {
            error!(reason = e.as_label(), "cannot locate worker executable: {e}");
            return 1;
        }
    };
    info!(pid = std::process::id(), "supervisor online");

    let sup = Supervisor::builder(Arc::new(runtime), cfg)
        .with_subscribers(subscribers)
        .build();

    match sup.run().await {
        Ok(_report) => 0,
        Err(e) => {
            error!(reason = e.as_label(), "supervisor stopped: {e}");
            1
        }
    }
}

#[cfg(feature = "logging")]
fn default_subscribers() -> Vec<Arc<dyn Subscribe>> {
    vec![Arc::new(crate::subscribers::LogWriter::new())]
}

#[cfg(not(feature = "logging"))]
fn default_subscribers() -> Vec<Arc<dyn Subscribe>> {
    Vec::new()
}
