//! Crash-restart policy.
//!
//! ## Contents
//! - [`BackoffPolicy`] knobs: free-restart threshold, per-death step, decay interval
//! - [`BackoffTracker`] decaying counter of unplanned deaths and the delay derived from it
//!
//! ## Quick wiring
//! ```text
//! Pool ── crash exit ──► tracker.record_unplanned_death()
//!                        tracker.current_delay() ──► sleep ──► spawn replacement
//! tracker.run_decay(token) ── every 60s ──► counter -= 1 (floored at 0)
//! ```
//!
//! ## Defaults
//! - restarts are immediate while the counter is `<= 10`;
//! - above that, `200ms × counter` (linear, uncapped);
//! - the counter loses one unit per minute.

mod backoff;

pub use backoff::{BackoffPolicy, BackoffTracker};
