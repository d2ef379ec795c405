mod common;

use common::*;
use gauntlet_core::model::{RunConfig, RunStatus, TestCase, TopicStatus};
use gauntlet_core::providers::fake::RecordingRuntime;
use gauntlet_core::providers::judge::SubstringJudge;
use std::sync::Arc;

/// A runtime that cannot even start a trial must still leave a terminal
/// `error` topic behind, or the run would never finalize.
#[tokio::test]
async fn synchronous_start_failure_leaves_terminal_error_topic() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::failing_on("POISON"),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 2);
    h.engine.store.insert_test_case(&TestCase {
        id: "case-bad".into(),
        dataset_id: DATASET.into(),
        prompt: "POISON pill".into(),
        expected: None,
        sort_order: 99,
    })?;
    let run_id = start_run(&h.engine, &RunConfig::default());
    drain(&h.engine).await;

    let bad = h.engine.store.find_topic(run_id, "case-bad")?.unwrap();
    assert_eq!(bad.status, TopicStatus::Error);
    assert_eq!(bad.score, Some(0.0));
    assert_eq!(bad.passed, Some(false));
    assert_eq!(bad.eval_result.completion_reason.as_deref(), Some("error"));

    // The healthy cases dispatched normally.
    assert_eq!(h.runtime.invocation_count(), 2);

    // Their completions resolve the run despite the poisoned case.
    h.engine
        .record_trajectory_completion(&success_completion(run_id, "case-000", "MAGIC"))
        .await?;
    let ack = h
        .engine
        .record_trajectory_completion(&success_completion(run_id, "case-001", "MAGIC"))
        .await?;
    assert!(ack.all_done);

    drain(&h.engine).await;
    let run = h.engine.store.find_run(USER, run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    let metrics = run.metrics.unwrap();
    assert_eq!(metrics.total_cases, 3);
    assert_eq!(metrics.error_cases, 1);
    assert_eq!(metrics.passed_cases, 2);
    Ok(())
}

/// k>1: a thread that cannot start fails the whole topic immediately so
/// finalization is never blocked waiting for callbacks that will not come.
#[tokio::test]
async fn thread_start_failure_fails_the_topic() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::failing_on("POISON"),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    h.engine.store.insert_test_case(&TestCase {
        id: "case-bad".into(),
        dataset_id: DATASET.into(),
        prompt: "POISON pill".into(),
        expected: None,
        sort_order: 0,
    })?;
    let config = RunConfig {
        k: 3,
        ..RunConfig::default()
    };
    let run_id = start_run(&h.engine, &config);
    drain(&h.engine).await;

    let topic = h.engine.store.find_topic(run_id, "case-bad")?.unwrap();
    assert_eq!(topic.status, TopicStatus::Error);

    // The one poisoned case was the whole dataset, so the run resolves.
    drain(&h.engine).await;
    let run = h.engine.store.find_run(USER, run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    Ok(())
}

/// Retrying failures deletes error/timeout topics and re-dispatches exactly
/// those cases.
#[tokio::test]
async fn retry_failures_redispatches_only_failed_cases() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::failing_on("POISON"),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 2);
    h.engine.store.insert_test_case(&TestCase {
        id: "case-bad".into(),
        dataset_id: DATASET.into(),
        prompt: "POISON pill".into(),
        expected: None,
        sort_order: 99,
    })?;
    let run_id = start_run(&h.engine, &RunConfig::default());
    drain(&h.engine).await;
    assert_eq!(h.runtime.invocation_count(), 2);

    h.engine
        .record_trajectory_completion(&success_completion(run_id, "case-000", "MAGIC"))
        .await?;
    h.engine
        .record_trajectory_completion(&success_completion(run_id, "case-001", "MAGIC"))
        .await?;
    drain(&h.engine).await;

    let retried = h.engine.retry_failures(USER, run_id)?;
    assert_eq!(retried, 1);
    drain(&h.engine).await;

    // The poisoned case was re-dispatched (and failed to start again); the
    // passed cases were not re-run.
    assert_eq!(h.runtime.invocation_count(), 2);
    let bad = h.engine.store.find_topic(run_id, "case-bad")?.unwrap();
    assert_eq!(bad.status, TopicStatus::Error);
    let run = h.engine.store.find_run(USER, run_id)?.unwrap();
    assert!(run.status.is_terminal());
    Ok(())
}
