//! # Event subscribers.
//!
//! Subscribers observe the events the pool, the worker handles and the
//! reloader publish on the [`Bus`](crate::events::Bus).
//!
//! ```text
//! Pool / WorkerHandle / Reloader ── publish(Event) ──► Bus ──► Supervisor listener
//!                                                                   │
//!                                                             SubscriberSet::emit
//!                                                          ┌────────┼─────────┐
//!                                                          ▼        ▼         ▼
//!                                                      LogWriter  Metrics   Custom
//! ```

#[cfg(feature = "logging")]
mod embedded;
mod subscriber;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
