//! HTTP echo service run by a pool of worker processes.
//!
//! Every worker binds `0.0.0.0:8000` with `SO_REUSEPORT`, so the kernel spreads
//! connections over the pool and a replacement can bind while its original is
//! still serving.
//!
//! ```text
//! cargo run --example http_echo
//! curl http://127.0.0.1:8000/          # served by any worker
//! kill -HUP  <supervisor pid>          # rolling reload, no refused connection
//! kill -TERM <supervisor pid>          # graceful shutdown
//! ```

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info};
use workvisor::logging::{self, LogConfig};
use workvisor::{AppError, AppFn, Config, WorkerContext, bootstrap};

const ADDR: &str = "0.0.0.0:8000";

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn answer(mut stream: TcpStream, peer: SocketAddr) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let mut read = 0;
    while read < buf.len() {
        let n = stream.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let body = format!(
        "Your IP address is {} and your source port is {}.",
        peer.ip(),
        peer.port()
    );
    let response = format!(
        "HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

async fn serve(ctx: WorkerContext) -> Result<(), AppError> {
    let addr: SocketAddr = ADDR
        .parse()
        .map_err(|e| AppError::fail(format!("bad address {ADDR}: {e}")))?;
    let listener = bind(addr)?;
    ctx.notify_ready(Some(listener.local_addr()?)).await?;
    info!(worker = %ctx.id(), %addr, "listening");

    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            _ = ctx.shutdown().cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                inflight.spawn(async move {
                    if let Err(e) = answer(stream, peer).await {
                        debug!(%peer, "connection failed: {e}");
                    }
                });
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
        }
    }

    drop(listener);
    info!(worker = %ctx.id(), open = inflight.len(), "draining connections");
    while inflight.join_next().await.is_some() {}
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init(LogConfig::default().with_env_overrides());

    let app = AppFn::arc("http-echo", serve);
    let cfg = Config::from_env().with_workers(10);
    std::process::exit(bootstrap::init(app, cfg).await);
}
