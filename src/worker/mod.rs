//! Worker handles and their lifecycle.
//!
//! - [`WorkerHandle`] proxy for one worker process (ready / stop / kill)
//! - [`Lifecycle`], [`WorkerState`] the explicit per-worker state machine
//! - [`ExitReason`] planned disconnect vs signal vs crash

mod handle;
mod state;

pub use handle::{StopOutcome, WorkerExit, WorkerHandle};
pub use state::{ExitReason, Lifecycle, Transition, WorkerState};
