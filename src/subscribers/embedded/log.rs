//! # LogWriter: events as `tracing` records.
//!
//! Maps every [`Event`] to one structured record. Severity follows what an
//! operator has to act on:
//!
//! | level   | events                                                        |
//! |---------|---------------------------------------------------------------|
//! | `error` | `WorkerCrashed`, `RestartFailed`, `SpawnFailed`, `SubscriberPanicked` |
//! | `warn`  | `RestartScheduled` with a delay, `StopTimedOut`, `ReloadRejected`, failed swaps, `SubscriberOverflow` |
//! | `info`  | readiness, stops, reload and shutdown progress                |
//! | `debug` | `WorkerSpawned`, immediate restarts                           |
//!
//! ## Example output (compact format)
//! ```text
//! INFO  workvisor::events: worker ready worker=#3 addr=0.0.0.0:8080
//! ERROR workvisor::events: worker crashed worker=#3 exit="died with code 1" deaths=1
//! WARN  workvisor::events: restart delayed worker=#3 delay_ms=2200 deaths=11
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "workvisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn opt<T: std::fmt::Display>(v: &Option<T>) -> String {
    v.as_ref().map_or_else(|| "-".to_string(), ToString::to_string)
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = opt(&e.worker);
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::WorkerSpawned => {
                debug!(target: TARGET, seq = e.seq, %worker, "worker spawned");
            }
            EventKind::SpawnFailed => {
                error!(target: TARGET, seq = e.seq, reason, "worker spawn failed");
            }
            EventKind::WorkerReady => {
                info!(target: TARGET, seq = e.seq, %worker, addr = %opt(&e.addr), "worker ready");
            }
            EventKind::StopRequested => {
                info!(target: TARGET, seq = e.seq, %worker, timeout_ms = e.timeout_ms, "stop requested");
            }
            EventKind::WorkerDisconnected => {
                info!(target: TARGET, seq = e.seq, %worker, "worker disconnected");
            }
            EventKind::StopTimedOut => {
                warn!(target: TARGET, seq = e.seq, %worker, timeout_ms = e.timeout_ms, "worker killed after stop timeout");
            }
            EventKind::WorkerExited => {
                info!(target: TARGET, seq = e.seq, %worker, exit = %opt(&e.exit), "worker exited");
            }
            EventKind::WorkerCrashed => {
                error!(target: TARGET, seq = e.seq, %worker, exit = %opt(&e.exit), deaths = e.deaths, "worker crashed");
            }
            EventKind::RestartScheduled => match e.delay_ms {
                Some(ms) if ms > 0 => {
                    warn!(target: TARGET, seq = e.seq, %worker, delay_ms = ms, deaths = e.deaths, "restart delayed");
                }
                _ => {
                    debug!(target: TARGET, seq = e.seq, %worker, deaths = e.deaths, "restarting");
                }
            },
            EventKind::RestartFailed => {
                error!(target: TARGET, seq = e.seq, %worker, reason, "restart failed");
            }
            EventKind::ReloadStarted => {
                info!(target: TARGET, seq = e.seq, pairs = e.count, "reload started");
            }
            EventKind::ReloadRejected => {
                warn!(target: TARGET, seq = e.seq, reason, "reload rejected");
            }
            EventKind::ReplacementReady => {
                info!(target: TARGET, seq = e.seq, %worker, original = %opt(&e.peer), "replacement ready");
            }
            EventKind::SwapFinished => {
                let replacement = opt(&e.peer);
                if reason.is_empty() {
                    info!(target: TARGET, seq = e.seq, original = %worker, %replacement, "swap complete");
                } else {
                    warn!(target: TARGET, seq = e.seq, original = %worker, %replacement, reason, "swap finished with errors");
                }
            }
            EventKind::ReloadFinished => {
                if reason.is_empty() {
                    info!(target: TARGET, seq = e.seq, completed = e.count, "reload finished");
                } else {
                    warn!(target: TARGET, seq = e.seq, completed = e.count, reason, "reload finished");
                }
            }
            EventKind::ShutdownRequested => {
                info!(target: TARGET, seq = e.seq, workers = e.count, timeout_ms = e.timeout_ms, "shutdown requested");
            }
            EventKind::ShutdownSettled => {
                info!(target: TARGET, seq = e.seq, killed = e.count, "all workers settled");
            }
            EventKind::SubscriberPanicked => {
                error!(target: TARGET, seq = e.seq, reason, "subscriber panicked");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: TARGET, seq = e.seq, reason, "subscriber dropped an event");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
