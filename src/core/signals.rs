//! # Cross-platform OS signal handling.
//!
//! Turns process signals into supervisor commands:
//!
//! **Unix platforms:**
//! - `SIGTERM`, `SIGINT` → [`Signal::Terminate`]
//! - `SIGHUP` → [`Signal::Reload`]
//!
//! **Other platforms:**
//! - `Ctrl-C` → [`Signal::Terminate`] (no reload trigger)
//!
//! Handlers are installed once by [`listen`] and stay installed for the
//! stream's lifetime, so a second signal is never lost between two waits.

use futures::Stream;
use futures::stream::{self, BoxStream, StreamExt};

/// A command delivered by the operating system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Gracefully stop every worker, then exit.
    Terminate(&'static str),
    /// Start a rolling reload.
    Reload,
}

/// Installs the handlers and returns the stream of received signals.
#[cfg(unix)]
pub fn listen() -> std::io::Result<BoxStream<'static, Signal>> {
    use tokio::signal::unix::{SignalKind, signal};

    struct Handlers {
        term: tokio::signal::unix::Signal,
        int: tokio::signal::unix::Signal,
        hup: tokio::signal::unix::Signal,
    }

    let handlers = Handlers {
        term: signal(SignalKind::terminate())?,
        int: signal(SignalKind::interrupt())?,
        hup: signal(SignalKind::hangup())?,
    };

    Ok(stream::unfold(handlers, |mut h| async move {
        let sig = tokio::select! {
            Some(()) = h.term.recv() => Signal::Terminate("SIGTERM"),
            Some(()) = h.int.recv() => Signal::Terminate("SIGINT"),
            Some(()) = h.hup.recv() => Signal::Reload,
            else => return None,
        };
        Some((sig, h))
    })
    .boxed())
}

/// Installs the handlers and returns the stream of received signals.
#[cfg(not(unix))]
pub fn listen() -> std::io::Result<BoxStream<'static, Signal>> {
    Ok(stream::unfold((), |()| async {
        tokio::signal::ctrl_c().await.ok()?;
        Some((Signal::Terminate("CTRL_C"), ()))
    })
    .boxed())
}

/// Adapts any stream of signals (tests, embedding) to the supervisor loop.
pub fn from_stream<S>(signals: S) -> BoxStream<'static, Signal>
where
    S: Stream<Item = Signal> + Send + 'static,
{
    signals.boxed()
}
