//! # Crash-restart backoff.
//!
//! [`BackoffTracker`] keeps a decaying counter of recent unplanned worker deaths
//! and turns it into a restart delay using a [`BackoffPolicy`]:
//! - [`BackoffPolicy::threshold`] deaths are tolerated with no delay at all;
//! - above it the delay is `step × counter`, growing linearly with no cap;
//! - [`BackoffPolicy::decay`] is the period after which one death is forgotten.
//!
//! An isolated crash restarts immediately to preserve capacity. A crash loop
//! gets slower and slower restarts, and louder log records, until it stops.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use workvisor::{BackoffPolicy, BackoffTracker};
//!
//! let tracker = BackoffTracker::new(BackoffPolicy::default());
//! for _ in 0..10 {
//!     tracker.record_unplanned_death();
//! }
//! assert_eq!(tracker.current_delay(), Duration::ZERO);
//!
//! tracker.record_unplanned_death();
//! assert_eq!(tracker.current_delay(), Duration::from_millis(2200));
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Crash-restart backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Deaths tolerated before any delay is applied.
    pub threshold: u32,
    /// Delay added per counted death once above the threshold.
    pub step: Duration,
    /// Period after which the counter is decremented by one.
    pub decay: Duration,
}

impl Default for BackoffPolicy {
    /// Returns:
    /// - `threshold = 10`;
    /// - `step = 200ms`;
    /// - `decay = 60s` (roughly a ten minute memory for a loop of ten crashes).
    fn default() -> Self {
        Self {
            threshold: 10,
            step: Duration::from_millis(200),
            decay: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given death counter.
    ///
    /// Non-decreasing in `deaths`; zero while `deaths <= threshold`.
    pub fn delay_for(&self, deaths: u32) -> Duration {
        if deaths <= self.threshold {
            Duration::ZERO
        } else {
            self.step.saturating_mul(deaths)
        }
    }
}

/// Decaying counter of unplanned worker deaths.
///
/// Owned by the pool; shared with the decay task through `Arc`.
#[derive(Debug)]
pub struct BackoffTracker {
    policy: BackoffPolicy,
    deaths: AtomicU32,
}

impl BackoffTracker {
    /// Creates a tracker with a zero counter.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            deaths: AtomicU32::new(0),
        }
    }

    /// Returns the policy in use.
    pub fn policy(&self) -> BackoffPolicy {
        self.policy
    }

    /// Counts one unplanned death and returns the new counter.
    pub fn record_unplanned_death(&self) -> u32 {
        let prev = self
            .deaths
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_add(1))
            })
            .unwrap_or_else(|n| n);
        prev.saturating_add(1)
    }

    /// Current death counter.
    pub fn deaths(&self) -> u32 {
        self.deaths.load(Ordering::Acquire)
    }

    /// Delay to apply before the next crash-triggered restart.
    pub fn current_delay(&self) -> Duration {
        self.policy.delay_for(self.deaths())
    }

    /// Forgets one death (never below zero). Returns the new counter.
    pub fn decay(&self) -> u32 {
        match self
            .deaths
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        {
            Ok(prev) => prev - 1,
            Err(zero) => zero,
        }
    }

    /// Decrements the counter once per [`BackoffPolicy::decay`] until `token` is cancelled.
    ///
    /// The first decrement happens one full period after the call.
    pub async fn run_decay(&self, token: CancellationToken) {
        let period = self.policy.decay.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.decay();
                }
            }
        }
    }
}
