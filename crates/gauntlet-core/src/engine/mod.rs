pub mod complete;
pub mod dispatch;
pub mod finalize;
pub mod paginate;
pub mod reaper;
pub mod worker;

use crate::config::EngineSettings;
use crate::providers::agent::AgentRuntime;
use crate::providers::judge::Judge;
use crate::queue::Job;
use crate::storage::Store;
use crate::webhook::WebhookConfig;
use std::sync::Arc;

/// The orchestrator. Every public operation is either a trigger (enqueue a
/// durable step) or an idempotent handler over current store state; workers
/// may replay any handler at any time.
#[derive(Clone)]
pub struct Engine {
    pub store: Store,
    pub runtime: Arc<dyn AgentRuntime>,
    pub judge: Arc<dyn Judge>,
    pub settings: EngineSettings,
    pub webhook: WebhookConfig,
}

impl Engine {
    pub fn new(
        store: Store,
        runtime: Arc<dyn AgentRuntime>,
        judge: Arc<dyn Judge>,
        settings: EngineSettings,
        webhook: WebhookConfig,
    ) -> Self {
        Self {
            store,
            runtime,
            judge,
            settings,
            webhook,
        }
    }

    // trigger operations: fire-and-forget, delivered at least once

    pub fn trigger_paginate(
        &self,
        run_id: i64,
        cursor: Option<String>,
        test_case_ids: Option<Vec<String>>,
    ) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::Paginate {
            run_id,
            cursor,
            test_case_ids,
        })
    }

    pub fn trigger_execute(&self, run_id: i64, test_case_id: &str) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::Execute {
            run_id,
            test_case_id: test_case_id.to_string(),
        })
    }

    pub fn trigger_trajectory(&self, run_id: i64, test_case_id: &str) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::Trajectory {
            run_id,
            test_case_id: test_case_id.to_string(),
        })
    }

    pub fn trigger_thread_trajectory(
        &self,
        run_id: i64,
        test_case_id: &str,
        thread_id: &str,
        topic_id: i64,
    ) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::ThreadTrajectory {
            run_id,
            test_case_id: test_case_id.to_string(),
            thread_id: thread_id.to_string(),
            topic_id,
        })
    }

    pub fn trigger_finalize(&self, run_id: i64) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::Finalize { run_id })
    }

    pub fn trigger_reap(&self, run_id: i64, threshold_ms: i64) -> anyhow::Result<i64> {
        self.store.enqueue(&Job::Reap {
            run_id,
            threshold_ms,
        })
    }

    // run lifecycle entry points

    /// Moves the run to `running` and kicks off pagination from the start.
    pub fn start_run(&self, user_id: &str, run_id: i64) -> anyhow::Result<()> {
        let started = self.store.mark_run_started(user_id, run_id)?;
        if !started {
            anyhow::bail!("run {run_id} not found or not startable");
        }
        tracing::info!(event = "run.started", run_id);
        self.trigger_paginate(run_id, None, None)?;
        Ok(())
    }

    pub fn abort_run(&self, user_id: &str, run_id: i64) -> anyhow::Result<bool> {
        let aborted = self.store.abort_run(user_id, run_id)?;
        if aborted {
            tracing::info!(event = "run.aborted", run_id);
        }
        Ok(aborted)
    }

    /// Deletes error/timeout topics and re-walks the dataset so only those
    /// cases are re-dispatched (existing topics are filtered out).
    pub fn retry_failures(&self, user_id: &str, run_id: i64) -> anyhow::Result<usize> {
        let run = self
            .store
            .find_run(user_id, run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if run.status == crate::model::RunStatus::Aborted {
            anyhow::bail!("run {run_id} is aborted");
        }
        let deleted = self.store.delete_error_topics(run_id)?;
        if !deleted.is_empty() {
            self.store.reopen_run(run_id)?;
            self.trigger_paginate(run_id, None, None)?;
        }
        tracing::info!(event = "run.retry_failures", run_id, retried = deleted.len());
        Ok(deleted.len())
    }

    /// True once every dataset case has a terminal topic.
    pub(crate) fn is_resolved(&self, run_id: i64) -> anyhow::Result<bool> {
        let Some((terminal, total)) = self.store.resolution_counts(run_id)? else {
            return Ok(false);
        };
        Ok(total > 0 && terminal >= total)
    }
}
