use std::sync::Arc;

use tracing::error;

use super::config::Config;
use super::pool::{CrashObserver, Pool};
use super::reload::Reloader;
use super::supervisor::Supervisor;
use crate::events::Bus;
use crate::policies::BackoffTracker;
use crate::runtime::RuntimeRef;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::worker::WorkerExit;

/// Builder for constructing a [`Supervisor`].
pub struct SupervisorBuilder {
    runtime: RuntimeRef,
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    crash_observer: Option<CrashObserver>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given runtime and configuration.
    pub fn new(runtime: RuntimeRef, cfg: Config) -> Self {
        Self {
            runtime,
            cfg,
            subscribers: Vec::new(),
            crash_observer: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive every lifecycle event through dedicated workers
    /// with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the default crash observer.
    ///
    /// The observer runs synchronously on the exit path; keep it cheap.
    pub fn with_crash_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&WorkerExit) + Send + Sync + 'static,
    {
        self.crash_observer = Some(Arc::new(observer));
        self
    }

    /// Builds the supervisor and starts its subscriber workers.
    ///
    /// Must be called inside a tokio runtime. The pool itself is started by
    /// [`Supervisor::start`] or [`Supervisor::run`].
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        let observer = self.crash_observer.unwrap_or_else(|| Arc::new(alert_on_crash));
        let pool = Pool::new(
            self.runtime,
            bus.clone(),
            BackoffTracker::new(self.cfg.backoff),
            self.cfg.stop_timeout,
            Some(observer),
        );
        let reloader = Reloader::new(Arc::clone(&pool), bus.clone(), self.cfg.ready_timeout);

        let sup = Arc::new(Supervisor::new_internal(self.cfg, bus, subs, pool, reloader));
        sup.subscriber_listener();
        sup
    }
}

/// Default crash observer: one alert-level record per unplanned exit.
///
/// The pool decides on the restart afterwards, so the record only states
/// what happened.
fn alert_on_crash(exit: &WorkerExit) {
    error!(
        target: "workvisor::alert",
        worker = %exit.id,
        "{}",
        crash_alert(exit)
    );
}

fn crash_alert(exit: &WorkerExit) -> String {
    format!("worker {} {}", exit.id, exit.reason)
}
