//! Supervisor core: pool, reloads, signals and configuration.
//!
//! The public entry point is [`Supervisor`]; [`Pool`] and [`Reloader`] are
//! exposed for embedding without the signal loop.
//!
//! Internal modules:
//! - `config`: pool size resolution and timeouts;
//! - `pool`: live worker map, crash restarts, graceful shutdown;
//! - `reload`: rolling replacement of every live worker;
//! - `signals`: OS signals mapped onto supervisor commands;
//! - `supervisor`: wires everything to the event bus and subscribers.

mod builder;
pub mod config;
mod pool;
mod reload;
pub mod signals;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::Config;
pub use pool::{CrashObserver, Pool, ShutdownReport, StartReport};
pub use reload::{PairOutcome, PairReport, PairStatus, ReloadGuard, ReloadReport, Reloader, SwapState};
pub use signals::Signal;
pub use supervisor::Supervisor;
