//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by worker handles, the pool, the
//! reloader and the supervisor front door.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `WorkerHandle` pump, `Pool`, `Reloader`, `Supervisor`,
//!   `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Supervisor` listener (fans out to `SubscriberSet`), tests.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
