//! # Rolling reloader: zero-downtime replacement of every live worker.
//!
//! For the workers captured when the session starts, each swap pair runs
//! independently and concurrently:
//!
//! ```text
//! pending ─► replacement-spawning ─► replacement-ready ─► original-stopping ─► complete
//!                  │                       │
//!                  └── spawn failed ───────┴── exited / not ready ──────────► failed
//! ```
//!
//! ## Rules
//! - The original is asked to stop only after its replacement reported ready,
//!   so the number of serving workers never drops below the target.
//! - A stop that timed out still completes the pair (degraded).
//! - A failed pair keeps its original; other pairs are not affected. If the
//!   original crashed while the pair held it, the pool restarts it then.
//! - An original that crashes during a pair that completes is not restarted:
//!   its replacement already took its place.
//! - Only one session at a time: a second request is rejected immediately
//!   with [`ReloadError::InProgress`], never queued or merged.
//! - A session cannot be cancelled from outside once started.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;

use super::pool::Pool;
use crate::error::{ReloadError, WorkerError};
use crate::events::{Bus, Event, EventKind};
use crate::runtime::WorkerId;
use crate::worker::WorkerHandle;

/// Progress of one swap pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Not started yet.
    Pending,
    /// Replacement requested from the runtime.
    ReplacementSpawning,
    /// Replacement is serving.
    ReplacementReady,
    /// Original is being stopped.
    OriginalStopping,
    /// Original is gone, replacement serving.
    Complete,
    /// The swap was abandoned; the original keeps running.
    Failed,
}

/// Snapshot of one pair of the active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairStatus {
    /// Worker being replaced.
    pub original: WorkerId,
    /// Its replacement, once spawned.
    pub replacement: Option<WorkerId>,
    /// Current progress.
    pub state: SwapState,
}

/// Final outcome of one swap pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairOutcome {
    /// Original stopped gracefully.
    Complete,
    /// Original had to be force-killed; the swap still happened.
    Degraded(WorkerError),
    /// The replacement never served; the original was kept.
    Failed(String),
}

/// Per-pair entry of a [`ReloadReport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairReport {
    /// Worker being replaced.
    pub original: WorkerId,
    /// Its replacement, if one was spawned.
    pub replacement: Option<WorkerId>,
    /// How the swap ended.
    pub outcome: PairOutcome,
}

/// Aggregate outcome of a reload session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// One entry per worker captured at session start.
    pub pairs: Vec<PairReport>,
}

impl ReloadReport {
    /// True when no pair failed (degraded pairs count as success).
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Number of pairs whose original was retired.
    pub fn completed(&self) -> usize {
        self.pairs.len() - self.failed()
    }

    /// Number of failed pairs.
    pub fn failed(&self) -> usize {
        self.pairs
            .iter()
            .filter(|p| matches!(p.outcome, PairOutcome::Failed(_)))
            .count()
    }
}

/// Clears the reentrancy flag when the session ends, however it ends.
pub struct ReloadGuard {
    reloader: Arc<Reloader>,
}

impl Drop for ReloadGuard {
    fn drop(&mut self) {
        *lock(&self.reloader.session) = None;
        self.reloader.active.store(false, Ordering::Release);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Orchestrates rolling reloads over a [`Pool`].
pub struct Reloader {
    pool: Arc<Pool>,
    bus: Bus,
    ready_timeout: Option<Duration>,
    active: AtomicBool,
    session: Mutex<Option<Vec<PairStatus>>>,
}

impl Reloader {
    /// Creates an idle reloader.
    pub fn new(pool: Arc<Pool>, bus: Bus, ready_timeout: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            bus,
            ready_timeout,
            active: AtomicBool::new(false),
            session: Mutex::new(None),
        })
    }

    /// True while a session is running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Pairs of the running session, if any.
    pub fn session(&self) -> Option<Vec<PairStatus>> {
        lock(&self.session).clone()
    }

    /// Claims the single session slot, or rejects synchronously.
    pub fn try_begin(self: &Arc<Self>) -> Result<ReloadGuard, ReloadError> {
        let rejection = if self.pool.is_shutting_down() {
            Some(ReloadError::ShuttingDown)
        } else if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            Some(ReloadError::InProgress)
        } else {
            None
        };

        if let Some(err) = rejection {
            self.bus
                .publish(Event::new(EventKind::ReloadRejected).with_reason(err.to_string()));
            return Err(err);
        }

        *lock(&self.session) = Some(Vec::new());
        Ok(ReloadGuard {
            reloader: Arc::clone(self),
        })
    }

    /// Runs a full session and returns its report.
    pub async fn reload(self: &Arc<Self>) -> Result<ReloadReport, ReloadError> {
        let guard = self.try_begin()?;
        Ok(self.run(guard).await)
    }

    /// Starts a session in the background; rejection is immediate.
    pub fn spawn_reload(self: &Arc<Self>) -> Result<JoinHandle<ReloadReport>, ReloadError> {
        let guard = self.try_begin()?;
        let me = Arc::clone(self);
        Ok(tokio::spawn(async move { me.run(guard).await }))
    }

    async fn run(&self, guard: ReloadGuard) -> ReloadReport {
        let originals = self.pool.checkout_live().await;

        *lock(&self.session) = Some(
            originals
                .iter()
                .map(|h| PairStatus {
                    original: h.id(),
                    replacement: None,
                    state: SwapState::Pending,
                })
                .collect(),
        );
        self.bus
            .publish(Event::new(EventKind::ReloadStarted).with_count(originals.len()));

        let pairs = join_all(
            originals
                .into_iter()
                .enumerate()
                .map(|(slot, old)| self.swap(slot, old)),
        )
        .await;

        let report = ReloadReport { pairs };
        let mut finished = Event::new(EventKind::ReloadFinished).with_count(report.completed());
        if !report.is_success() {
            finished = finished.with_reason(format!(
                "{} of {} swaps failed",
                report.failed(),
                report.pairs.len()
            ));
        }
        self.bus.publish(finished);

        drop(guard);
        report
    }

    /// Replaces one worker.
    async fn swap(&self, slot: usize, old: WorkerHandle) -> PairReport {
        let original = old.id();
        self.set_state(slot, SwapState::ReplacementSpawning, None);

        let new = match self.pool.spawn_worker(true).await {
            Ok(h) => h,
            Err(e) => {
                self.pool.reclaim(original).await;
                return self.fail(slot, original, None, e.to_string());
            }
        };
        let replacement = Some(new.id());
        self.set_state(slot, SwapState::ReplacementSpawning, replacement);

        if let Err(e) = new.ready_within(self.ready_timeout).await {
            if matches!(e, WorkerError::ReadyTimeout { .. }) {
                let _ = new.request_graceful_stop(self.pool.stop_timeout()).await;
            }
            self.pool.retire(new.id()).await;
            self.pool.reclaim(original).await;
            return self.fail(slot, original, replacement, e.to_string());
        }

        if !self.pool.release(new.id()).await {
            // Died between readiness and release; the pool will not replace it.
            self.pool.retire(new.id()).await;
            self.pool.reclaim(original).await;
            return self.fail(
                slot,
                original,
                replacement,
                format!("replacement {} exited right after becoming ready", new.id()),
            );
        }

        self.set_state(slot, SwapState::ReplacementReady, replacement);
        self.bus.publish(
            Event::new(EventKind::ReplacementReady)
                .with_worker(new.id())
                .with_peer(original)
                .with_addr(new.address()),
        );

        self.set_state(slot, SwapState::OriginalStopping, replacement);
        let outcome = match old.request_graceful_stop(self.pool.stop_timeout()).await {
            Ok(()) => PairOutcome::Complete,
            Err(e) => PairOutcome::Degraded(e),
        };
        self.pool.retire(original).await;
        self.set_state(slot, SwapState::Complete, replacement);

        let mut ev = Event::new(EventKind::SwapFinished)
            .with_worker(original)
            .with_peer(new.id());
        if let PairOutcome::Degraded(e) = &outcome {
            ev = ev.with_reason(e.to_string());
        }
        self.bus.publish(ev);

        PairReport {
            original,
            replacement,
            outcome,
        }
    }

    fn fail(
        &self,
        slot: usize,
        original: WorkerId,
        replacement: Option<WorkerId>,
        reason: String,
    ) -> PairReport {
        self.set_state(slot, SwapState::Failed, replacement);

        let mut ev = Event::new(EventKind::SwapFinished)
            .with_worker(original)
            .with_reason(reason.as_str());
        if let Some(id) = replacement {
            ev = ev.with_peer(id);
        }
        self.bus.publish(ev);

        PairReport {
            original,
            replacement,
            outcome: PairOutcome::Failed(reason),
        }
    }

    fn set_state(&self, slot: usize, state: SwapState, replacement: Option<WorkerId>) {
        if let Some(pair) = lock(&self.session)
            .as_mut()
            .and_then(|pairs| pairs.get_mut(slot))
        {
            pair.state = state;
            if replacement.is_some() {
                pair.replacement = replacement;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(outcome: PairOutcome) -> PairReport {
        PairReport {
            original: WorkerId::new(1),
            replacement: Some(WorkerId::new(2)),
            outcome,
        }
    }

    #[test]
    fn degraded_pairs_still_count_as_success() {
        let report = ReloadReport {
            pairs: vec![
                pair(PairOutcome::Complete),
                pair(PairOutcome::Degraded(WorkerError::StopTimeout {
                    id: WorkerId::new(1),
                    timeout: Duration::from_secs(10),
                })),
            ],
        };
        assert!(report.is_success());
        assert_eq!(report.completed(), 2);
    }

    #[test]
    fn a_failed_pair_fails_the_session() {
        let report = ReloadReport {
            pairs: vec![
                pair(PairOutcome::Complete),
                pair(PairOutcome::Failed("spawn".into())),
            ],
        };
        assert!(!report.is_success());
        assert_eq!(report.completed(), 1);
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn empty_session_is_success() {
        assert!(ReloadReport::default().is_success());
    }
}
