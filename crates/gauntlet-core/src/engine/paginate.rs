use super::Engine;
use crate::model::RunStatus;

impl Engine {
    /// Walks the test-case set page by page and fans work out in bounded
    /// chunks. Page traversal and fan-out are both expressed as re-enqueued
    /// Paginate steps, so a restart resumes from the last durable cursor and
    /// in-flight width per level stays capped at `chunk_size`.
    pub(crate) fn handle_paginate(
        &self,
        run_id: i64,
        cursor: Option<String>,
        test_case_ids: Option<Vec<String>>,
    ) -> anyhow::Result<()> {
        // Terminal recursion case: an explicit fan-out chunk.
        if let Some(ids) = test_case_ids {
            for id in &ids {
                self.trigger_execute(run_id, id)?;
            }
            tracing::debug!(event = "paginate.chunk", run_id, dispatched = ids.len());
            return Ok(());
        }

        let status = self
            .store
            .run_status(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if status == RunStatus::Aborted {
            tracing::info!(event = "paginate.cancelled", run_id);
            return Ok(());
        }

        let run = self
            .store
            .find_run_by_id(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;

        let page_size = self.settings.page_size;
        let page = self
            .store
            .cases_after(&run.dataset_id, cursor.as_deref(), page_size)?;
        if page.is_empty() {
            tracing::debug!(event = "paginate.exhausted", run_id);
            return Ok(());
        }

        // Idempotent re-entry: cases that already have a topic were dispatched
        // by an earlier delivery of this step.
        let mut pending = Vec::new();
        for case in &page {
            if self.store.find_topic(run_id, &case.id)?.is_none() {
                pending.push(case.id.clone());
            }
        }

        let chunk_size = self.settings.chunk_size as usize;
        if pending.len() > chunk_size {
            for chunk in pending.chunks(chunk_size) {
                self.trigger_paginate(run_id, None, Some(chunk.to_vec()))?;
            }
        } else {
            for id in &pending {
                self.trigger_execute(run_id, id)?;
            }
        }

        // A full page means more cases likely remain.
        if page.len() == page_size as usize {
            if let Some(last) = page.last() {
                self.trigger_paginate(run_id, Some(last.id.clone()), None)?;
            }
        }

        tracing::debug!(
            event = "paginate.page",
            run_id,
            page_len = page.len(),
            pending = pending.len()
        );
        Ok(())
    }
}
