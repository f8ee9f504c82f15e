//! Workers without a network socket: they report readiness explicitly.
//!
//! Worker ids divisible by 5 crash after a few ticks, so the log shows crash
//! restarts next to planned disconnects.
//!
//! ```text
//! NUM_WORKERS=4 cargo run --example batch_worker
//! ```

use std::time::Duration;

use tracing::info;
use workvisor::logging::{self, LogConfig, LogFormat};
use workvisor::{AppError, AppFn, Config, WorkerContext, bootstrap};

async fn work(ctx: WorkerContext) -> Result<(), AppError> {
    ctx.notify_ready(None).await?;

    let mut tick = tokio::time::interval(Duration::from_millis(500));
    let mut done: u64 = 0;
    loop {
        tokio::select! {
            _ = ctx.shutdown().cancelled() => break,
            _ = tick.tick() => {
                done += 1;
                if ctx.id().get() % 5 == 0 && done == 6 {
                    return Err(AppError::fail("simulated failure"));
                }
            }
        }
    }

    info!(worker = %ctx.id(), batches = done, "finished in-flight batch");
    Ok(())
}

#[tokio::main]
async fn main() {
    logging::init(
        LogConfig::default()
            .with_format(LogFormat::Compact)
            .with_env_overrides(),
    );

    let app = AppFn::arc("batch", work);
    let cfg = Config::from_env().with_stop_timeout(Duration::from_secs(3));
    std::process::exit(bootstrap::init(app, cfg).await);
}
