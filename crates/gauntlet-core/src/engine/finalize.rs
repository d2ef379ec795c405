use super::Engine;
use crate::model::{RunMetrics, RunStatus, RunTopic, TopicStatus};

impl Engine {
    /// Aggregates all topic records into run metrics and the terminal run
    /// status. A pure function of already-terminal state, so re-running it
    /// (completion races, reaper re-checks) writes the same result.
    pub fn finalize_run(&self, run_id: i64) -> anyhow::Result<Option<RunMetrics>> {
        let run = self
            .store
            .find_run_by_id(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if run.status == RunStatus::Aborted {
            tracing::info!(event = "finalize.skipped_aborted", run_id);
            return Ok(None);
        }

        let topics = self.store.topics_for_run(run_id)?;
        let metrics = compute_metrics(&topics);
        let status = if metrics.total_cases > 0
            && metrics.error_cases + metrics.timeout_cases >= metrics.total_cases
        {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        self.store.finalize_run(run_id, status, &metrics)?;
        tracing::info!(
            event = "run.finalized",
            run_id,
            status = status.as_str(),
            total = metrics.total_cases,
            passed = metrics.passed_cases,
            pass_rate = metrics.pass_rate
        );
        Ok(Some(metrics))
    }
}

fn compute_metrics(topics: &[RunTopic]) -> RunMetrics {
    let total = topics.len() as u64;
    let mut passed = 0u64;
    let mut failed = 0u64;
    let mut errored = 0u64;
    let mut timed_out = 0u64;
    let mut score_sum = 0.0f64;
    for t in topics {
        match t.status {
            TopicStatus::Passed => passed += 1,
            TopicStatus::Failed => failed += 1,
            TopicStatus::Error => errored += 1,
            TopicStatus::Timeout => timed_out += 1,
            TopicStatus::Pending | TopicStatus::Running => {}
        }
        score_sum += t.score.unwrap_or(0.0);
    }
    RunMetrics {
        total_cases: total,
        passed_cases: passed,
        failed_cases: failed,
        error_cases: errored,
        timeout_cases: timed_out,
        pass_rate: if total > 0 {
            passed as f64 / total as f64
        } else {
            0.0
        },
        average_score: if total > 0 {
            score_sum / total as f64
        } else {
            0.0
        },
    }
}
