//! # Built-in subscribers
//!
//! - [`LogWriter`]: forwards events to `tracing` with a severity per kind.

mod log;

pub use log::LogWriter;
