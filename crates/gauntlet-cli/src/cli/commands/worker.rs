use super::{build_engine, EngineOptions};
use crate::cli::args::WorkerArgs;
use gauntlet_core::engine::worker::WorkerPool;
use tokio::time::Duration;

pub async fn run(args: WorkerArgs) -> anyhow::Result<i32> {
    let engine = build_engine(EngineOptions {
        db: args.db,
        runtime_url: Some(args.runtime_url),
        webhook_base: args.webhook_base,
        webhook_secret: args.webhook_secret,
        settings: args.settings,
    })?;

    // Periodic liveness sweep: runs whose external trials never call back
    // still reach finalization through the reaper.
    let sweeper = engine.clone();
    let reap_interval = Duration::from_millis(args.reap_interval_ms.max(1000));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(reap_interval);
        loop {
            tick.tick().await;
            let runs = match sweeper.store.running_runs() {
                Ok(runs) => runs,
                Err(e) => {
                    tracing::error!(event = "reap_sweep.list_failed", error = %e);
                    continue;
                }
            };
            for run_id in runs {
                match sweeper.reap_threshold(run_id) {
                    Ok(threshold) => {
                        if let Err(e) = sweeper.trigger_reap(run_id, threshold) {
                            tracing::error!(event = "reap_sweep.enqueue_failed", run_id, error = %e);
                        }
                    }
                    Err(e) => {
                        tracing::error!(event = "reap_sweep.threshold_failed", run_id, error = %e)
                    }
                }
            }
        }
    });

    tracing::info!(
        event = "worker.start",
        parallel = engine.settings.parallel,
        poll_interval_ms = engine.settings.poll_interval_ms
    );
    WorkerPool::new(engine).run().await?;
    Ok(0)
}
