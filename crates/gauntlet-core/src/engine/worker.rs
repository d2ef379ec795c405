use super::Engine;
use crate::queue::{Job, QueuedJob};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{sleep, Duration};

/// Consumes the durable queue with bounded parallelism. Handlers are
/// idempotent, so a job interrupted mid-flight (crash, restart) is simply
/// claimed and replayed by the next worker.
pub struct WorkerPool {
    engine: Engine,
}

impl WorkerPool {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Long-running consumption loop.
    pub async fn run(&self) -> anyhow::Result<()> {
        let parallel = self.engine.settings.parallel.max(1);
        let poll = Duration::from_millis(self.engine.settings.poll_interval_ms);
        let sem = Arc::new(Semaphore::new(parallel));
        loop {
            let permit = sem.clone().acquire_owned().await?;
            match self.engine.store.claim_next()? {
                Some(claimed) => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        process(&engine, claimed).await;
                    });
                }
                None => {
                    drop(permit);
                    sleep(poll).await;
                }
            }
        }
    }

    /// Processes jobs sequentially until the queue drains. Used by one-shot
    /// invocations and tests where deterministic completion matters.
    pub async fn run_until_idle(&self) -> anyhow::Result<u64> {
        let mut processed = 0u64;
        while let Some(claimed) = self.engine.store.claim_next()? {
            process(&self.engine, claimed).await;
            processed += 1;
        }
        Ok(processed)
    }
}

async fn process(engine: &Engine, claimed: QueuedJob) {
    let op = claimed.job.op_name();
    match engine.handle(claimed.job.clone()).await {
        Ok(()) => {
            if let Err(e) = engine.store.ack_done(claimed.id) {
                tracing::error!(event = "job.ack_failed", job_id = claimed.id, error = %e);
            }
        }
        Err(e) => {
            tracing::warn!(
                event = "job.failed",
                job_id = claimed.id,
                op,
                attempt = claimed.attempts,
                error = %e
            );
            if let Err(ack_err) = engine.store.ack_retry(
                claimed.id,
                claimed.attempts,
                engine.settings.max_job_attempts,
                engine.settings.retry_backoff_ms,
                &e.to_string(),
            ) {
                tracing::error!(event = "job.retry_failed", job_id = claimed.id, error = %ack_err);
            }
        }
    }
}

impl Engine {
    /// Routes one durable step to its handler.
    pub async fn handle(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::Paginate {
                run_id,
                cursor,
                test_case_ids,
            } => self.handle_paginate(run_id, cursor, test_case_ids),
            Job::Execute {
                run_id,
                test_case_id,
            } => self.handle_execute(run_id, &test_case_id).await,
            Job::Trajectory {
                run_id,
                test_case_id,
            } => self.run_trajectory(run_id, &test_case_id).await,
            Job::ThreadTrajectory {
                run_id,
                test_case_id,
                thread_id,
                topic_id,
            } => {
                self.run_thread_trajectory(run_id, &test_case_id, &thread_id, topic_id)
                    .await
            }
            Job::Finalize { run_id } => self.finalize_run(run_id).map(|_| ()),
            Job::Reap {
                run_id,
                threshold_ms,
            } => self.reap(run_id, threshold_ms).map(|_| ()),
        }
    }
}
