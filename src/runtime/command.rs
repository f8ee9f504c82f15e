//! # `CommandRuntime`: workers as re-executed copies of the current binary.
//!
//! Each worker is `current_exe()` started again with the same arguments and
//! the [`WORKER_ENV`] marker set, so [`bootstrap::init`](crate::bootstrap::init)
//! runs the application instead of the supervisor.
//!
//! ## Wire protocol
//! ```text
//! supervisor                              worker
//!   stdin  (piped) ───────────────────────►  EOF == "please disconnect"
//!   stdout (piped) ◄─────────────────────── "@workvisor:ready [addr]"
//!                                           other lines → forwarded to our stdout
//!   stderr (inherited)
//! ```
//! - stdout EOF is reported as [`RuntimeEvent::Disconnected`];
//! - process exit is reported as [`RuntimeEvent::Exited`] (always last);
//! - `force_kill` sends SIGKILL (or `TerminateProcess`).
//!
//! One driver task per child owns the `Child`, its pipes and the control
//! channel; the runtime keeps only the control senders.

use std::collections::HashMap;
use std::ffi::OsString;
use std::net::SocketAddr;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use super::{ProcessRuntime, RuntimeEvent, Spawned, WorkerId};
use crate::app::{READY_PREFIX, WORKER_ENV};
use crate::error::SpawnError;

/// Control requests sent to a child's driver task.
#[derive(Debug, Clone, Copy)]
enum Control {
    Disconnect,
    Kill,
}

/// Process runtime backed by `tokio::process`.
pub struct CommandRuntime {
    program: OsString,
    args: Vec<OsString>,
    next_id: AtomicU64,
    controls: Arc<Controls>,
}

type Controls = Mutex<HashMap<WorkerId, mpsc::UnboundedSender<Control>>>;

fn lock(controls: &Controls) -> MutexGuard<'_, HashMap<WorkerId, mpsc::UnboundedSender<Control>>> {
    match controls.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl CommandRuntime {
    /// Re-executes the current binary with the current arguments.
    pub fn current_exe() -> Result<Self, SpawnError> {
        let program = std::env::current_exe().map_err(|e| SpawnError::Executable {
            error: e.to_string(),
        })?;
        let args = std::env::args_os().skip(1).collect();
        Ok(Self::new(program, args))
    }

    /// Runs an explicit program as the worker.
    pub fn new(program: impl Into<OsString>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            next_id: AtomicU64::new(1),
            controls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn send(&self, id: WorkerId, ctl: Control) {
        if let Some(tx) = lock(&self.controls).get(&id) {
            let _ = tx.send(ctl);
        }
    }
}

#[async_trait]
impl ProcessRuntime for CommandRuntime {
    async fn spawn(&self) -> Result<Spawned, SpawnError> {
        let id = WorkerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(WORKER_ENV, id.get().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe {
            pid,
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe {
            pid,
            pipe: "stdout",
        })?;

        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (ev_tx, ev_rx) = mpsc::unbounded_channel();
        lock(&self.controls).insert(id, ctl_tx);

        tracing::debug!(worker = %id, pid = ?pid, "worker process started");
        let controls = Arc::clone(&self.controls);
        tokio::spawn(async move {
            drive(child, stdin, stdout, ctl_rx, ev_tx).await;
            lock(&controls).remove(&id);
        });

        Ok(Spawned { id, events: ev_rx })
    }

    fn request_disconnect(&self, id: WorkerId) {
        self.send(id, Control::Disconnect);
    }

    fn force_kill(&self, id: WorkerId) {
        self.send(id, Control::Kill);
    }
}

/// Owns one child until it exits, translating pipes and status into events.
async fn drive(
    mut child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    mut ctl: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) {
    let mut stdin = Some(stdin);
    let mut lines = BufReader::new(stdout).lines();
    let mut stdout_open = true;
    let mut ctl_open = true;
    let mut requested_stop = false;

    let status = loop {
        tokio::select! {
            line = lines.next_line(), if stdout_open => match line {
                Ok(Some(line)) => {
                    if let Some(ev) = parse_protocol_line(&line) {
                        let _ = events.send(ev);
                    } else {
                        forward_line(&line).await;
                    }
                }
                Ok(None) | Err(_) => {
                    stdout_open = false;
                    let _ = events.send(RuntimeEvent::Disconnected);
                }
            },
            cmd = ctl.recv(), if ctl_open => match cmd {
                Some(Control::Disconnect) => {
                    requested_stop = true;
                    // Dropping stdin delivers EOF to the worker.
                    if let Some(mut pipe) = stdin.take() {
                        let _ = pipe.shutdown().await;
                    }
                }
                Some(Control::Kill) => {
                    let _ = child.start_kill();
                }
                None => ctl_open = false,
            },
            status = child.wait() => break status,
        }
    };

    if stdout_open {
        let _ = events.send(RuntimeEvent::Disconnected);
    }
    let (code, signal) = match status {
        Ok(status) => split_status(status),
        Err(e) => {
            tracing::warn!(error = %e, "cannot collect worker exit status");
            (None, None)
        }
    };
    let _ = events.send(RuntimeEvent::Exited {
        code,
        signal,
        requested_stop,
    });
}

/// Parses a `@workvisor:ready [addr]` line.
fn parse_protocol_line(line: &str) -> Option<RuntimeEvent> {
    let rest = line.strip_prefix(READY_PREFIX)?;
    let addr = rest.trim().parse::<SocketAddr>().ok();
    Some(RuntimeEvent::Ready(addr))
}

async fn forward_line(line: &str) {
    let mut out = tokio::io::stdout();
    let _ = out.write_all(line.as_bytes()).await;
    let _ = out.write_all(b"\n").await;
}

#[cfg(unix)]
fn split_status(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

#[cfg(not(unix))]
fn split_status(status: ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}
