use super::Engine;
use crate::model::{
    CompletionAck, RunStatus, ThreadCompletion, ThreadResult, TopicStatus, TrajectoryCompletion,
    TrialStatus,
};
use crate::providers::judge::Verdict;

fn threads_done(threads: &[ThreadResult], k: usize) -> bool {
    threads.len() >= k && threads.iter().all(|s| s.status.is_terminal())
}

impl Engine {
    /// Ingests a k=1 completion callback. Delivery is at least once, so the
    /// write is guarded: a topic already terminal is acknowledged without
    /// being rewritten, and the ack recomputes "all done" from counts.
    pub async fn record_trajectory_completion(
        &self,
        payload: &TrajectoryCompletion,
    ) -> anyhow::Result<CompletionAck> {
        payload.validate()?;
        let run = self
            .store
            .find_run(&payload.user_id, payload.run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {} not found", payload.run_id))?;
        if run.status == RunStatus::Aborted {
            // Acknowledge receipt but never resurrect an aborted run.
            tracing::info!(event = "completion.ignored_aborted", run_id = run.id);
            return Ok(CompletionAck::default());
        }
        let topic = self
            .store
            .find_topic(run.id, &payload.test_case_id)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no topic for run {} case {}",
                    run.id,
                    payload.test_case_id
                )
            })?;
        if topic.status.is_terminal() {
            return Ok(CompletionAck {
                applied: false,
                all_threads_done: false,
                all_done: self.is_resolved(run.id)?,
            });
        }

        let verdict = self.judge_trial(payload, &run.dataset_id).await;
        let status = match payload.status {
            TrialStatus::Error => TopicStatus::Error,
            TrialStatus::Success if verdict.passed => TopicStatus::Passed,
            TrialStatus::Success => TopicStatus::Failed,
        };

        let mut eval = topic.eval_result.clone();
        eval.completion_reason = Some(match payload.status {
            TrialStatus::Success => "completed".into(),
            TrialStatus::Error => "error".into(),
        });
        eval.error_message = payload.error_message.clone();
        eval.rubric = verdict.rubric;
        eval.cost = payload.cost;
        eval.duration_ms = payload.duration_ms;
        eval.steps = payload.steps;
        eval.total_tokens = payload.total_tokens;

        let applied = self.store.complete_topic(
            topic.id,
            status,
            Some(verdict.score),
            Some(verdict.passed),
            &eval,
        )?;
        let all_done = self.is_resolved(run.id)?;
        if applied && all_done {
            self.trigger_finalize(run.id)?;
        }
        tracing::debug!(
            event = "completion.recorded",
            run_id = run.id,
            test_case_id = %payload.test_case_id,
            status = status.as_str(),
            applied,
            all_done
        );
        Ok(CompletionAck {
            applied,
            all_threads_done: false,
            all_done,
        })
    }

    /// Ingests one thread's completion for a k>1 topic. The thread result is
    /// slot-upserted (redelivery overwrites its own slot only); once all K
    /// slots are terminal the configured policy collapses them into the
    /// topic verdict.
    pub async fn record_thread_completion(
        &self,
        payload: &ThreadCompletion,
    ) -> anyhow::Result<CompletionAck> {
        payload.validate()?;
        let t = &payload.trajectory;
        let run = self
            .store
            .find_run(&t.user_id, t.run_id)?
            .ok_or_else(|| anyhow::anyhow!("run {} not found", t.run_id))?;
        if run.status == RunStatus::Aborted {
            tracing::info!(event = "completion.ignored_aborted", run_id = run.id);
            return Ok(CompletionAck::default());
        }
        let topic = self
            .store
            .find_topic_by_id(payload.topic_id)?
            .ok_or_else(|| anyhow::anyhow!("topic {} not found", payload.topic_id))?;
        if topic.run_id != t.run_id || topic.test_case_id != t.test_case_id {
            anyhow::bail!(
                "topic {} does not belong to run {} case {}",
                payload.topic_id,
                t.run_id,
                t.test_case_id
            );
        }
        let k = run.config.k.max(1) as usize;
        if topic.status.is_terminal() {
            return Ok(CompletionAck {
                applied: false,
                all_threads_done: threads_done(&topic.eval_result.threads, k),
                all_done: self.is_resolved(run.id)?,
            });
        }

        let verdict = self.judge_trial(t, &run.dataset_id).await;
        let mut slot = topic
            .eval_result
            .threads
            .iter()
            .find(|s| s.thread_id == payload.thread_id)
            .cloned()
            .unwrap_or_else(|| ThreadResult::placeholder(&payload.thread_id));
        slot.status = match t.status {
            TrialStatus::Error => TopicStatus::Error,
            TrialStatus::Success if verdict.passed => TopicStatus::Passed,
            TrialStatus::Success => TopicStatus::Failed,
        };
        slot.score = Some(verdict.score);
        slot.passed = Some(verdict.passed);
        slot.cost = t.cost;
        slot.duration_ms = t.duration_ms;
        slot.error_message = t.error_message.clone();

        let Some(updated) = self.store.store_thread_result(topic.id, slot)? else {
            // The topic went terminal between our read and the write.
            return Ok(CompletionAck {
                applied: false,
                all_threads_done: threads_done(&topic.eval_result.threads, k),
                all_done: self.is_resolved(run.id)?,
            });
        };

        let threads = &updated.eval_result.threads;
        let all_threads_done = threads_done(threads, k);

        let mut all_done = false;
        if all_threads_done {
            let collapsed = run.config.aggregation.collapse(threads);
            let mut eval = updated.eval_result.clone();
            eval.completion_reason = Some(match collapsed.status {
                TopicStatus::Error => "error".into(),
                _ => "completed".into(),
            });
            let applied = self.store.complete_topic(
                topic.id,
                collapsed.status,
                Some(collapsed.score),
                Some(collapsed.passed),
                &eval,
            )?;
            all_done = self.is_resolved(run.id)?;
            if applied && all_done {
                self.trigger_finalize(run.id)?;
            }
            tracing::debug!(
                event = "topic.collapsed",
                run_id = run.id,
                topic_id = topic.id,
                status = collapsed.status.as_str(),
                all_done
            );
        }

        Ok(CompletionAck {
            applied: true,
            all_threads_done,
            all_done,
        })
    }

    /// Scores a successful trial via the judge; runtime-reported errors and
    /// judge failures both yield a zero-score non-pass so a single bad case
    /// can never wedge the run.
    async fn judge_trial(&self, payload: &TrajectoryCompletion, dataset_id: &str) -> Verdict {
        if payload.status == TrialStatus::Error {
            return Verdict {
                passed: false,
                score: 0.0,
                rubric: serde_json::Value::Null,
            };
        }
        let case = match self.store.find_test_case(dataset_id, &payload.test_case_id) {
            Ok(Some(case)) => case,
            _ => {
                tracing::warn!(
                    event = "judge.case_missing",
                    test_case_id = %payload.test_case_id
                );
                return Verdict {
                    passed: false,
                    score: 0.0,
                    rubric: serde_json::Value::Null,
                };
            }
        };
        let transcript = payload.transcript.as_deref().unwrap_or_default();
        match self.judge.score(transcript, &case).await {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!(event = "judge.failed", error = %e);
                Verdict {
                    passed: false,
                    score: 0.0,
                    rubric: serde_json::json!({ "judge_error": e.to_string() }),
                }
            }
        }
    }
}
