use super::Engine;
use crate::model::RunTopic;

impl Engine {
    /// Sweeps trials stuck in `running` past the threshold into terminal
    /// `timeout`, then rechecks run resolution. This is the liveness
    /// complement to the event-driven completion path: a run whose external
    /// trials never call back still reaches finalization.
    pub fn reap(&self, run_id: i64, threshold_ms: i64) -> anyhow::Result<Vec<RunTopic>> {
        let swept = self.store.batch_mark_timeout(run_id, threshold_ms)?;
        if !swept.is_empty() {
            tracing::warn!(event = "reaper.swept", run_id, count = swept.len());
            if self.is_resolved(run_id)? {
                self.trigger_finalize(run_id)?;
            }
        }
        Ok(swept)
    }

    /// Threshold for a run: per-run override, else engine default.
    pub fn reap_threshold(&self, run_id: i64) -> anyhow::Result<i64> {
        let threshold = self
            .store
            .find_run_by_id(run_id)?
            .and_then(|r| r.config.timeout_ms)
            .unwrap_or(self.settings.timeout_ms);
        Ok(threshold)
    }
}
