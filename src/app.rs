//! # Worker-side application contract.
//!
//! Inside a worker process the user's code is an [`Application`]. It receives
//! a [`WorkerContext`] through which it reports readiness and learns that the
//! supervisor wants it gone.
//!
//! ```text
//! supervisor ── stdin EOF ──► stdin watcher ──► ctx.shutdown() cancelled
//!                                                    │
//! Application::init(ctx) ◄───────────────────────────┘  (finish in-flight work, return)
//!        │
//!        └── ctx.notify_ready(addr) ── "@workvisor:ready addr" ──► supervisor stdout reader
//! ```
//!
//! An application that returns `Ok(())` without being asked to stop is
//! treated as a crash by the supervisor and restarted.

use std::borrow::Cow;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::runtime::WorkerId;

/// Environment marker set on every worker process; its value is the worker id.
pub const WORKER_ENV: &str = "WORKVISOR_WORKER";

/// Stdout line prefix announcing readiness, optionally followed by the bound address.
pub const READY_PREFIX: &str = "@workvisor:ready";

/// Formats the readiness line (without the trailing newline).
pub fn ready_line(addr: Option<SocketAddr>) -> String {
    match addr {
        Some(addr) => format!("{READY_PREFIX} {addr}"),
        None => READY_PREFIX.to_string(),
    }
}

/// User code run inside each worker process.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use workvisor::{AppError, Application, WorkerContext};
///
/// struct Batch;
///
/// #[async_trait]
/// impl Application for Batch {
///     fn name(&self) -> &str { "batch" }
///
///     async fn init(&self, ctx: WorkerContext) -> Result<(), AppError> {
///         ctx.notify_ready(None).await?;
///         ctx.shutdown().cancelled().await;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Runs the worker until the supervisor asks it to disconnect.
    async fn init(&self, ctx: WorkerContext) -> Result<(), AppError>;
}

/// Shared handle to an application.
pub type AppRef = Arc<dyn Application>;

/// Function-backed application.
pub struct AppFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> AppFn<F> {
    /// Creates a new function-backed application.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the application and returns it as a shared handle.
    ///
    /// ```rust
    /// use workvisor::{AppError, AppFn, AppRef, WorkerContext};
    ///
    /// let app: AppRef = AppFn::arc("idle", |ctx: WorkerContext| async move {
    ///     ctx.shutdown().cancelled().await;
    ///     Ok::<_, AppError>(())
    /// });
    /// assert_eq!(app.name(), "idle");
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Application for AppFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), AppError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, ctx: WorkerContext) -> Result<(), AppError> {
        (self.f)(ctx).await
    }
}

type ReadySink = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// What a worker knows about its supervision.
#[derive(Clone)]
pub struct WorkerContext {
    id: WorkerId,
    shutdown: CancellationToken,
    sink: ReadySink,
}

impl WorkerContext {
    /// Context reporting readiness on this process's stdout.
    pub fn new(id: WorkerId, shutdown: CancellationToken) -> Self {
        Self::with_writer(id, shutdown, tokio::io::stdout())
    }

    /// Context reporting readiness on an arbitrary writer.
    pub fn with_writer<W>(id: WorkerId, shutdown: CancellationToken, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            shutdown,
            sink: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Id the supervisor assigned to this worker.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Cancelled when the supervisor requests a disconnect.
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Tells the supervisor this worker is serving.
    ///
    /// Only the first notification counts; later ones are ignored by the
    /// supervisor. During a reload the old worker is only retired once its
    /// replacement called this; a replacement that never does is stopped when
    /// the supervisor's `ready_timeout` elapses, or holds the reload open
    /// forever when that bound is disabled.
    pub async fn notify_ready(&self, addr: Option<SocketAddr>) -> Result<(), AppError> {
        let mut line = ready_line(addr);
        line.push('\n');

        let mut sink = self.sink.lock().await;
        sink.write_all(line.as_bytes()).await?;
        sink.flush().await?;
        Ok(())
    }
}

/// Cancels `token` once `input` reaches EOF (or fails).
pub async fn watch_disconnect<R>(mut input: R, token: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match input.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => continue,
        }
    }
    token.cancel();
}

/// Runs `app` as worker `id`: stdin EOF becomes the shutdown request.
pub async fn run_worker(app: AppRef, id: WorkerId) -> Result<(), AppError> {
    let token = CancellationToken::new();
    tokio::spawn(watch_disconnect(tokio::io::stdin(), token.clone()));
    app.init(WorkerContext::new(id, token)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_line_format() {
        let addr: SocketAddr = "127.0.0.1:8000".parse().unwrap();
        assert_eq!(ready_line(Some(addr)), "@workvisor:ready 127.0.0.1:8000");
        assert_eq!(ready_line(None), "@workvisor:ready");
    }

    #[tokio::test]
    async fn notify_ready_writes_one_line() {
        let (client, mut server) = tokio::io::duplex(256);
        let ctx = WorkerContext::with_writer(WorkerId::new(3), CancellationToken::new(), client);
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        ctx.notify_ready(Some(addr)).await.unwrap();
        drop(ctx);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "@workvisor:ready 10.0.0.1:9000\n");
    }

    #[tokio::test]
    async fn eof_cancels_shutdown_token() {
        let (client, server) = tokio::io::duplex(64);
        let token = CancellationToken::new();
        let watcher = tokio::spawn(watch_disconnect(server, token.clone()));

        assert!(!token.is_cancelled());
        drop(client);
        watcher.await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn app_fn_runs_closure() {
        let app: AppRef = AppFn::arc("noop", |ctx: WorkerContext| async move {
            if ctx.id() == WorkerId::new(1) {
                Ok(())
            } else {
                Err(AppError::fail("wrong id"))
            }
        });
        let ctx = WorkerContext::with_writer(WorkerId::new(1), CancellationToken::new(), tokio::io::sink());
        assert!(app.init(ctx).await.is_ok());
        assert_eq!(app.name(), "noop");
    }
}
