use super::Engine;
use crate::model::{EvalResult, Run, RunStatus, ThreadResult, TopicStatus};
use crate::providers::agent::TrialRequest;
use anyhow::Context;

impl Engine {
    /// Decides single-trial vs k-way execution for one test case.
    pub(crate) async fn handle_execute(
        &self,
        run_id: i64,
        test_case_id: &str,
    ) -> anyhow::Result<()> {
        let run = self
            .store
            .find_run_by_id(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if run.status == RunStatus::Aborted {
            return Ok(());
        }
        let k = run.config.k.max(1);
        if k == 1 {
            self.trigger_trajectory(run_id, test_case_id)?;
        } else {
            self.dispatch_threads(&run, test_case_id, k).await?;
        }
        Ok(())
    }

    /// k=1 path: one trial against the runtime, one `running` topic holding
    /// the runtime's operation id. A synchronous start failure still leaves a
    /// terminal `error` topic behind so the run can finalize.
    pub(crate) async fn run_trajectory(
        &self,
        run_id: i64,
        test_case_id: &str,
    ) -> anyhow::Result<()> {
        let run = self
            .store
            .find_run_by_id(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if run.status == RunStatus::Aborted {
            return Ok(());
        }
        if self.store.find_topic(run_id, test_case_id)?.is_some() {
            // Redelivered step; the earlier delivery already dispatched.
            return Ok(());
        }
        let case = self
            .store
            .find_test_case(&run.dataset_id, test_case_id)?
            .ok_or_else(|| anyhow::anyhow!("test case {test_case_id} not found"))?;

        let trial = TrialRequest {
            prompt: case.prompt.clone(),
            env_prompt: run.config.env_prompt.clone(),
            target_agent_id: run.target_agent_id.clone(),
            webhook: self
                .webhook
                .trajectory_hook(run_id, test_case_id, &run.user_id),
            headless: true,
        };

        match self.runtime.invoke(trial).await {
            Ok(receipt) => {
                let eval = EvalResult {
                    operation_id: Some(receipt.operation_id),
                    ..Default::default()
                };
                self.store.create_topic(
                    run_id,
                    test_case_id,
                    TopicStatus::Running,
                    None,
                    None,
                    &eval,
                )?;
                tracing::debug!(event = "trial.dispatched", run_id, test_case_id);
                Ok(())
            }
            Err(e) => {
                self.record_dispatch_failure(run_id, test_case_id, &e)?;
                Err(e).with_context(|| format!("failed to start trial for case {test_case_id}"))
            }
        }
    }

    /// k>1 path: one topic with K thread placeholders, K thread-trial steps.
    async fn dispatch_threads(
        &self,
        run: &Run,
        test_case_id: &str,
        k: u32,
    ) -> anyhow::Result<()> {
        if let Some(existing) = self.store.find_topic(run.id, test_case_id)? {
            if existing.status.is_terminal() {
                return Ok(());
            }
            // Replay after a partial enqueue: re-trigger all threads; the
            // per-thread handler skips slots that already dispatched.
            for t in &existing.eval_result.threads {
                self.trigger_thread_trajectory(run.id, test_case_id, &t.thread_id, existing.id)?;
            }
            return Ok(());
        }

        let mut eval = EvalResult::default();
        for i in 1..=k {
            eval.put_thread(ThreadResult::placeholder(format!("thread-{i}")));
        }
        let Some(topic_id) = self.store.create_topic(
            run.id,
            test_case_id,
            TopicStatus::Running,
            None,
            None,
            &eval,
        )?
        else {
            // Lost a race with a sibling delivery of the same step.
            return Ok(());
        };

        for i in 1..=k {
            let thread_id = format!("thread-{i}");
            if let Err(e) =
                self.trigger_thread_trajectory(run.id, test_case_id, &thread_id, topic_id)
            {
                // Start-time failure: record the whole topic as terminal error
                // so finalization is never blocked.
                self.record_dispatch_failure(run.id, test_case_id, &e)?;
                return Err(e);
            }
        }
        tracing::debug!(event = "threads.dispatched", run_id = run.id, test_case_id, k);
        Ok(())
    }

    /// One thread of a k>1 topic: invoke the runtime with a webhook carrying
    /// the thread and topic identifiers.
    pub(crate) async fn run_thread_trajectory(
        &self,
        run_id: i64,
        test_case_id: &str,
        thread_id: &str,
        topic_id: i64,
    ) -> anyhow::Result<()> {
        let run = self
            .store
            .find_run_by_id(run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {run_id} not found"))?;
        if run.status == RunStatus::Aborted {
            return Ok(());
        }
        let topic = self
            .store
            .find_topic_by_id(topic_id)?
            .ok_or_else(|| anyhow::anyhow!("topic {topic_id} not found"))?;
        if topic.status.is_terminal() {
            return Ok(());
        }
        if let Some(slot) = topic
            .eval_result
            .threads
            .iter()
            .find(|t| t.thread_id == thread_id)
        {
            if slot.operation_id.is_some() || slot.status.is_terminal() {
                // Redelivered step; this thread already dispatched or resolved.
                return Ok(());
            }
        }
        let case = self
            .store
            .find_test_case(&run.dataset_id, test_case_id)?
            .ok_or_else(|| anyhow::anyhow!("test case {test_case_id} not found"))?;

        let trial = TrialRequest {
            prompt: case.prompt.clone(),
            env_prompt: run.config.env_prompt.clone(),
            target_agent_id: run.target_agent_id.clone(),
            webhook: self.webhook.thread_hook(
                run_id,
                test_case_id,
                &run.user_id,
                thread_id,
                topic_id,
            ),
            headless: true,
        };

        match self.runtime.invoke(trial).await {
            Ok(receipt) => {
                let mut slot = topic
                    .eval_result
                    .threads
                    .iter()
                    .find(|t| t.thread_id == thread_id)
                    .cloned()
                    .unwrap_or_else(|| ThreadResult::placeholder(thread_id));
                slot.status = TopicStatus::Running;
                slot.operation_id = Some(receipt.operation_id);
                self.store.store_thread_result(topic_id, slot)?;
                Ok(())
            }
            Err(e) => {
                let mut eval = topic.eval_result.clone();
                eval.completion_reason = Some("error".into());
                eval.error_message = Some(e.to_string());
                self.store.complete_topic(
                    topic_id,
                    TopicStatus::Error,
                    Some(0.0),
                    Some(false),
                    &eval,
                )?;
                if self.is_resolved(run_id)? {
                    self.trigger_finalize(run_id)?;
                }
                Err(e).with_context(|| {
                    format!("failed to start thread {thread_id} for case {test_case_id}")
                })
            }
        }
    }

    /// Dispatch-start failures become terminal `error` topics instead of
    /// rows stuck in `running` forever.
    fn record_dispatch_failure(
        &self,
        run_id: i64,
        test_case_id: &str,
        error: &anyhow::Error,
    ) -> anyhow::Result<()> {
        let eval = EvalResult {
            completion_reason: Some("error".into()),
            error_message: Some(error.to_string()),
            ..Default::default()
        };
        let created = self.store.create_topic(
            run_id,
            test_case_id,
            TopicStatus::Error,
            Some(0.0),
            Some(false),
            &eval,
        )?;
        if created.is_none() {
            if let Some(topic) = self.store.find_topic(run_id, test_case_id)? {
                self.store.complete_topic(
                    topic.id,
                    TopicStatus::Error,
                    Some(0.0),
                    Some(false),
                    &eval,
                )?;
            }
        }
        tracing::warn!(event = "trial.start_failed", run_id, test_case_id, error = %error);
        if self.is_resolved(run_id)? {
            self.trigger_finalize(run_id)?;
        }
        Ok(())
    }
}
