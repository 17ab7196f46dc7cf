use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use crate::{folders, pipeline, Context};
use crate::error::HopperError;

///
/// One scan of the watch folder: every discovered file gets its own task,
/// bounded by the worker-count semaphore. Returns once every discovered
/// file's pipeline has reached a terminal state.
///
/// A panicking pipeline is contained here - it is logged and alerted, and no
/// other file is affected.
///
pub async fn run_once(ctx: &Arc<Context>) -> Result<usize, HopperError> {
    let files = folders::files_in_watch(ctx.settings())?;

    if files.is_empty() {
        return Ok(0)
    }

    log::info!("Discovered {} files in {:?}", files.len(), ctx.settings().watch_dir());

    let permits = Arc::new(Semaphore::new(ctx.settings().workers()));
    let mut tasks = JoinSet::new();

    for file in files {
        let ctx = Arc::clone(ctx);
        let permits = Arc::clone(&permits);

        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.expect("worker semaphore closed");

            // A shutdown between discovery and dispatch starts no new work.
            if ctx.cancelled() {
                return
            }

            pipeline::process_file(&ctx, &file).await;
        });
    }

    let mut finished = 0;
    while let Some(result) = tasks.join_next().await {
        finished += 1;
        if let Err(err) = result {
            log::error!("A file pipeline task aborted: {}", err);
            ctx.notifier().internal_error("scheduler", &err.to_string());
        }
    }

    Ok(finished)
}

///
/// Poll the watch folder until shutdown. Each pass drains completely before
/// the next is scheduled, so a file is never dispatched twice.
///
pub async fn watch(ctx: &Arc<Context>) -> Result<(), HopperError> {
    log::info!("Watching {:?} every {:?}", ctx.settings().watch_dir(), ctx.settings().poll_interval());

    loop {
        if ctx.cancelled() {
            log::info!("Shutdown signal received - scheduler stopping");
            return Ok(())
        }

        run_once(ctx).await?;

        tokio::select! {
            _ = ctx.cancel_token().cancelled() => {
                log::info!("Shutdown signal received - scheduler stopping");
                return Ok(())
            },
            _ = tokio::time::sleep(ctx.settings().poll_interval()) => {},
        }
    }
}
