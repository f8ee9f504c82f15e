//! # Per-worker lifecycle state machine.
//!
//! ```text
//!            Ready(addr)              begin_stop()
//! spawning ─────────────► ready ─────────────────► stopping
//!     │                     │                          │
//!     └──── begin_stop() ───┼──────────────────────────┤
//!                           ▼                          ▼
//!                        exited  ◄──── Exited(..) ─────┘
//! ```
//!
//! ## Rules
//! - `spawning → ready` happens at most once;
//! - `* → exited` happens exactly once, later exits are ignored;
//! - an exit is planned when a stop was requested (by us or per the runtime),
//!   anything else is a crash.
//!
//! Pure data: [`Lifecycle::apply`] can be driven without any runtime.

use std::fmt;
use std::net::SocketAddr;

use crate::runtime::RuntimeEvent;

/// Coarse worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Process exists, not yet ready.
    Spawning,
    /// Network-active or self-reported ready.
    Ready,
    /// A graceful stop was requested.
    Stopping,
    /// Process is gone.
    Exited,
}

/// Why a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The exit followed a graceful stop request.
    Planned,
    /// Killed by a signal nobody on our side asked for.
    Signal(i32),
    /// Exited on its own (any code, including 0) or for an unknown reason.
    Crashed(Option<i32>),
}

impl ExitReason {
    /// Classifies a raw exit notification.
    pub fn classify(code: Option<i32>, signal: Option<i32>, planned: bool) -> Self {
        match (planned, signal) {
            (true, _) => ExitReason::Planned,
            (false, Some(sig)) => ExitReason::Signal(sig),
            (false, None) => ExitReason::Crashed(code),
        }
    }

    /// True for exits that must be answered with a restart.
    pub fn is_unplanned(&self) -> bool {
        !matches!(self, ExitReason::Planned)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Planned => write!(f, "planned disconnect"),
            ExitReason::Signal(sig) => write!(f, "terminated by signal {sig}"),
            ExitReason::Crashed(Some(code)) => write!(f, "died with code {code}"),
            ExitReason::Crashed(None) => write!(f, "died for an unknown reason"),
        }
    }
}

/// Observable effect of applying a runtime event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `spawning → ready`.
    Ready(Option<SocketAddr>),
    /// First disconnect notification.
    Disconnected,
    /// `* → exited`.
    Exited(ExitReason),
    /// Duplicate or out-of-order event; nothing changed.
    Ignored,
}

/// Full lifecycle snapshot of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    /// Current coarse state.
    pub state: WorkerState,
    /// True once the worker has been ready (stays true while stopping).
    pub ready: bool,
    /// Bound address reported with readiness.
    pub addr: Option<SocketAddr>,
    /// True once the worker disconnected (or exited).
    pub disconnected: bool,
    /// True once a graceful stop was requested.
    pub stop_requested: bool,
    /// Exit reason, once exited.
    pub exit: Option<ExitReason>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// A freshly spawned worker.
    pub fn new() -> Self {
        Self {
            state: WorkerState::Spawning,
            ready: false,
            addr: None,
            disconnected: false,
            stop_requested: false,
            exit: None,
        }
    }

    /// Applies one runtime event.
    pub fn apply(&mut self, ev: &RuntimeEvent) -> Transition {
        match *ev {
            RuntimeEvent::Ready(addr) => {
                if self.state != WorkerState::Spawning {
                    return Transition::Ignored;
                }
                self.state = WorkerState::Ready;
                self.ready = true;
                self.addr = addr;
                Transition::Ready(addr)
            }
            RuntimeEvent::Disconnected => {
                if self.disconnected || self.state == WorkerState::Exited {
                    return Transition::Ignored;
                }
                self.disconnected = true;
                Transition::Disconnected
            }
            RuntimeEvent::Exited {
                code,
                signal,
                requested_stop,
            } => {
                if self.state == WorkerState::Exited {
                    return Transition::Ignored;
                }
                let reason =
                    ExitReason::classify(code, signal, self.stop_requested || requested_stop);
                self.state = WorkerState::Exited;
                self.disconnected = true;
                self.exit = Some(reason);
                Transition::Exited(reason)
            }
        }
    }

    /// Marks a graceful stop. Returns `false` if the worker already exited.
    pub fn begin_stop(&mut self) -> bool {
        match self.state {
            WorkerState::Exited => false,
            _ => {
                self.state = WorkerState::Stopping;
                self.stop_requested = true;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exited(code: Option<i32>, signal: Option<i32>, requested_stop: bool) -> RuntimeEvent {
        RuntimeEvent::Exited {
            code,
            signal,
            requested_stop,
        }
    }

    #[test]
    fn ready_happens_at_most_once() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        let mut lc = Lifecycle::new();
        assert_eq!(
            lc.apply(&RuntimeEvent::Ready(Some(addr))),
            Transition::Ready(Some(addr))
        );
        assert_eq!(lc.apply(&RuntimeEvent::Ready(None)), Transition::Ignored);
        assert_eq!(lc.state, WorkerState::Ready);
        assert_eq!(lc.addr, Some(addr));
    }

    #[test]
    fn exit_happens_exactly_once() {
        let mut lc = Lifecycle::new();
        assert_eq!(
            lc.apply(&exited(Some(1), None, false)),
            Transition::Exited(ExitReason::Crashed(Some(1)))
        );
        assert_eq!(lc.apply(&exited(Some(0), None, false)), Transition::Ignored);
        assert_eq!(lc.exit, Some(ExitReason::Crashed(Some(1))));
        assert_eq!(lc.apply(&RuntimeEvent::Ready(None)), Transition::Ignored);
    }

    #[test]
    fn stop_request_makes_exit_planned() {
        let mut lc = Lifecycle::new();
        lc.apply(&RuntimeEvent::Ready(None));
        assert!(lc.begin_stop());
        assert_eq!(lc.state, WorkerState::Stopping);
        assert!(lc.ready);

        // Force-killed after a stop request is still planned.
        assert_eq!(
            lc.apply(&exited(None, Some(9), false)),
            Transition::Exited(ExitReason::Planned)
        );
    }

    #[test]
    fn runtime_flag_makes_exit_planned() {
        let mut lc = Lifecycle::new();
        assert_eq!(
            lc.apply(&exited(Some(0), None, true)),
            Transition::Exited(ExitReason::Planned)
        );
    }

    #[test]
    fn signal_without_stop_is_unplanned() {
        let reason = ExitReason::classify(None, Some(15), false);
        assert_eq!(reason, ExitReason::Signal(15));
        assert!(reason.is_unplanned());
        assert!(ExitReason::classify(Some(0), None, false).is_unplanned());
        assert!(!ExitReason::Planned.is_unplanned());
    }

    #[test]
    fn disconnect_is_reported_once_and_not_after_exit() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.apply(&RuntimeEvent::Disconnected), Transition::Disconnected);
        assert_eq!(lc.apply(&RuntimeEvent::Disconnected), Transition::Ignored);

        let mut lc = Lifecycle::new();
        lc.apply(&exited(Some(1), None, false));
        assert_eq!(lc.apply(&RuntimeEvent::Disconnected), Transition::Ignored);
    }

    #[test]
    fn cannot_stop_an_exited_worker() {
        let mut lc = Lifecycle::new();
        lc.apply(&exited(Some(1), None, false));
        assert!(!lc.begin_stop());
        assert_eq!(lc.state, WorkerState::Exited);
    }
}
