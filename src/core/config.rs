//! # Global supervisor configuration.
//!
//! Provides [`Config`] centralized settings for the pool, reloads and shutdown.
//!
//! ## Pool size resolution
//! ```text
//! Config::workers (explicit) ──► NUM_WORKERS (env) ──► default
//!                 └──────── outside [2, 50] or unparsable ──► default
//! default = 2 × available CPU count
//! ```
//!
//! ## Environment
//! - `NUM_WORKERS`: pool size when no explicit value is configured;
//! - `WORKER_SHUTDOWN_TIMEOUT_MS`: graceful-stop timeout (read by [`Config::from_env`]);
//! - `WORKER_READY_TIMEOUT_MS`: reload readiness bound, `0` waits forever.

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Environment variable consulted for the pool size.
pub const WORKERS_ENV: &str = "NUM_WORKERS";

/// Environment variable consulted for the graceful-stop timeout (milliseconds).
pub const STOP_TIMEOUT_ENV: &str = "WORKER_SHUTDOWN_TIMEOUT_MS";

/// Environment variable consulted for the reload readiness bound (milliseconds).
pub const READY_TIMEOUT_ENV: &str = "WORKER_READY_TIMEOUT_MS";

/// Smallest accepted pool size.
pub const MIN_WORKERS: usize = 2;

/// Largest accepted pool size.
pub const MAX_WORKERS: usize = 50;

/// Global configuration for the supervisor.
///
/// ## Field semantics
/// - `workers`: explicit pool size (`None` = environment, then default)
/// - `stop_timeout`: wait for a worker to disconnect before force-killing it
/// - `ready_timeout`: bound on a reload replacement's readiness (`None` = wait forever)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `backoff`: crash-restart backoff knobs
#[derive(Clone, Debug)]
pub struct Config {
    /// Explicit pool size; validated by [`Config::resolve_workers`].
    pub workers: Option<usize>,

    /// Graceful-stop timeout per worker.
    ///
    /// After it elapses the worker is force-killed and the stop resolves with
    /// a timeout outcome.
    pub stop_timeout: Duration,

    /// How long a reload waits for a replacement to become ready.
    ///
    /// A replacement that misses it is stopped and its pair fails, which ends
    /// the session. `None` waits indefinitely: a worker that never reports
    /// ready then holds the session open and every later reload is rejected.
    pub ready_timeout: Option<Duration>,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Crash-restart backoff policy.
    pub backoff: BackoffPolicy,
}

impl Config {
    /// Default configuration with the timeouts overridden from the environment.
    ///
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Applies [`STOP_TIMEOUT_ENV`] and [`READY_TIMEOUT_ENV`] from `lookup`.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(ms) = millis(STOP_TIMEOUT_ENV) {
            self.stop_timeout = Duration::from_millis(ms);
        }
        match millis(READY_TIMEOUT_ENV) {
            Some(0) => self.ready_timeout = None,
            Some(ms) => self.ready_timeout = Some(Duration::from_millis(ms)),
            None => {}
        }
        self
    }

    /// Sets an explicit pool size.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = Some(n);
        self
    }

    /// Sets the graceful-stop timeout.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets the reload readiness bound; `None` waits forever.
    pub fn with_ready_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Resolves the effective pool size.
    ///
    /// `env` is the raw value of [`WORKERS_ENV`], if set.
    pub fn resolve_workers(&self, env: Option<&str>) -> usize {
        resolve_pool_size(self.workers, env, default_workers())
    }

    /// Resolves the effective pool size from the process environment.
    pub fn effective_workers(&self) -> usize {
        let env = std::env::var(WORKERS_ENV).ok();
        self.resolve_workers(env.as_deref())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `workers = None` (environment, then `2 × CPU count`)
    /// - `stop_timeout = 10s`
    /// - `ready_timeout = 60s`
    /// - `bus_capacity = 1024`
    /// - `backoff = BackoffPolicy::default()`
    fn default() -> Self {
        Self {
            workers: None,
            stop_timeout: Duration::from_secs(10),
            ready_timeout: Some(Duration::from_secs(60)),
            bus_capacity: 1024,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Default pool size: twice the available parallelism.
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_mul(2)
}

/// Explicit value, else environment, else `default`; out-of-range falls back to `default`.
///
/// A zero or missing explicit value defers to the environment.
pub fn resolve_pool_size(explicit: Option<usize>, env: Option<&str>, default: usize) -> usize {
    let requested = explicit
        .filter(|n| *n > 0)
        .or_else(|| env.and_then(|v| v.trim().parse::<usize>().ok()));

    match requested {
        Some(n) if (MIN_WORKERS..=MAX_WORKERS).contains(&n) => n,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: usize = 16;

    #[test]
    fn explicit_value_in_range_wins() {
        assert_eq!(resolve_pool_size(Some(10), Some("4"), DEFAULT), 10);
        assert_eq!(resolve_pool_size(Some(2), None, DEFAULT), 2);
        assert_eq!(resolve_pool_size(Some(50), None, DEFAULT), 50);
    }

    #[test]
    fn environment_used_without_explicit_value() {
        assert_eq!(resolve_pool_size(None, Some("4"), DEFAULT), 4);
        assert_eq!(resolve_pool_size(Some(0), Some(" 7 "), DEFAULT), 7);
    }

    #[test]
    fn out_of_range_falls_back_to_default() {
        for n in [1, 51, 100, usize::MAX] {
            assert_eq!(resolve_pool_size(Some(n), None, DEFAULT), DEFAULT, "n={n}");
        }
        assert_eq!(resolve_pool_size(None, Some("1"), DEFAULT), DEFAULT);
        assert_eq!(resolve_pool_size(None, Some("51"), DEFAULT), DEFAULT);
    }

    #[test]
    fn explicit_out_of_range_does_not_fall_through_to_env() {
        assert_eq!(resolve_pool_size(Some(60), Some("4"), DEFAULT), DEFAULT);
    }

    #[test]
    fn garbage_falls_back_to_default() {
        assert_eq!(resolve_pool_size(None, Some("lots"), DEFAULT), DEFAULT);
        assert_eq!(resolve_pool_size(None, Some("-3"), DEFAULT), DEFAULT);
        assert_eq!(resolve_pool_size(None, None, DEFAULT), DEFAULT);
    }

    #[test]
    fn default_is_twice_the_cpu_count() {
        let cpus = std::thread::available_parallelism().unwrap().get();
        assert_eq!(default_workers(), cpus * 2);
        assert_eq!(Config::default().resolve_workers(Some("0")), cpus * 2);
    }

    #[test]
    fn defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.stop_timeout, Duration::from_secs(10));
        assert_eq!(cfg.ready_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.bus_capacity_clamped(), 1024);
        assert_eq!(cfg.backoff, BackoffPolicy::default());
    }

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn timeouts_from_env() {

        let cfg = Config::default().with_env(env(&[
            (STOP_TIMEOUT_ENV, "2500"),
            (READY_TIMEOUT_ENV, " 5000 "),
        ]));
        assert_eq!(cfg.stop_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.ready_timeout, Some(Duration::from_secs(5)));

        let cfg = Config::default().with_env(env(&[(READY_TIMEOUT_ENV, "0")]));
        assert_eq!(cfg.ready_timeout, None);

        let cfg = Config::default().with_env(env(&[(STOP_TIMEOUT_ENV, "soon")]));
        assert_eq!(cfg.stop_timeout, Duration::from_secs(10));
        assert_eq!(cfg.ready_timeout, Some(Duration::from_secs(60)));
    }
}
