mod common;

use common::*;
use gauntlet_core::model::{
    RunConfig, RunStatus, ThreadCompletion, TopicStatus, TrajectoryCompletion, TrialStatus,
};
use gauntlet_core::passk::PassKPolicy;
use gauntlet_core::providers::fake::RecordingRuntime;
use gauntlet_core::providers::judge::SubstringJudge;
use std::sync::Arc;

fn thread_completion(
    run_id: i64,
    topic_id: i64,
    thread_id: &str,
    status: TrialStatus,
    transcript: &str,
) -> ThreadCompletion {
    ThreadCompletion {
        trajectory: TrajectoryCompletion {
            run_id,
            test_case_id: "case-000".into(),
            user_id: USER.into(),
            status,
            error_message: matches!(status, TrialStatus::Error).then(|| "agent crashed".into()),
            cost: Some(0.02),
            duration_ms: Some(800),
            steps: Some(3),
            total_tokens: Some(500),
            transcript: Some(transcript.into()),
        },
        thread_id: thread_id.into(),
        topic_id,
    }
}

#[tokio::test]
async fn k3_fail_pass_error_collapses_to_passed() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::new(),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 1);
    let config = RunConfig {
        k: 3,
        ..RunConfig::default()
    };
    let run_id = start_run(&h.engine, &config);
    drain(&h.engine).await;

    // Three independent trials were started for the one case.
    assert_eq!(h.runtime.invocation_count(), 3);
    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(topic.status, TopicStatus::Running);
    assert_eq!(topic.eval_result.threads.len(), 3);

    let a1 = h
        .engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-1",
            TrialStatus::Success,
            "not it",
        ))
        .await?;
    assert!(!a1.all_threads_done);

    let a2 = h
        .engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-2",
            TrialStatus::Success,
            "MAGIC found",
        ))
        .await?;
    assert!(!a2.all_threads_done);

    let a3 = h
        .engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-3",
            TrialStatus::Error,
            "",
        ))
        .await?;
    assert!(a3.all_threads_done);
    assert!(a3.all_done);

    // pass@k: one passing thread passes the topic, best thread score wins.
    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(topic.status, TopicStatus::Passed);
    assert_eq!(topic.passed, Some(true));
    assert_eq!(topic.score, Some(1.0));
    let threads = &topic.eval_result.threads;
    assert_eq!(threads.len(), 3);
    assert_eq!(threads[0].status, TopicStatus::Failed);
    assert_eq!(threads[1].status, TopicStatus::Passed);
    assert_eq!(threads[2].status, TopicStatus::Error);

    drain(&h.engine).await;
    let run = h.engine.store.find_run(USER, run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.metrics.unwrap().passed_cases, 1);
    Ok(())
}

#[tokio::test]
async fn redelivered_thread_completion_overwrites_own_slot_only() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::new(),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 1);
    let config = RunConfig {
        k: 2,
        ..RunConfig::default()
    };
    let run_id = start_run(&h.engine, &config);
    drain(&h.engine).await;
    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();

    let p1 = thread_completion(run_id, topic.id, "thread-1", TrialStatus::Success, "MAGIC");
    h.engine.record_thread_completion(&p1).await?;
    h.engine.record_thread_completion(&p1).await?;

    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(topic.status, TopicStatus::Running, "k=2 still waiting");
    assert_eq!(topic.eval_result.threads.len(), 2);
    assert_eq!(topic.eval_result.threads[0].status, TopicStatus::Passed);
    assert_eq!(topic.eval_result.threads[1].status, TopicStatus::Running);
    Ok(())
}

#[tokio::test]
async fn majority_policy_rejects_single_pass_of_three() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::new(),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 1);
    let config = RunConfig {
        k: 3,
        aggregation: PassKPolicy::Majority,
        ..RunConfig::default()
    };
    let run_id = start_run(&h.engine, &config);
    drain(&h.engine).await;
    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();

    for (thread_id, transcript) in [
        ("thread-1", "MAGIC"),
        ("thread-2", "miss"),
        ("thread-3", "miss"),
    ] {
        h.engine
            .record_thread_completion(&thread_completion(
                run_id,
                topic.id,
                thread_id,
                TrialStatus::Success,
                transcript,
            ))
            .await?;
    }

    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(topic.status, TopicStatus::Failed);
    assert_eq!(topic.passed, Some(false));
    Ok(())
}

#[tokio::test]
async fn late_thread_completion_after_collapse_is_ignored() -> anyhow::Result<()> {
    let h = harness(
        RecordingRuntime::new(),
        Arc::new(SubstringJudge),
        fast_settings(),
    );
    seed_cases(&h.engine.store, 1);
    let config = RunConfig {
        k: 2,
        ..RunConfig::default()
    };
    let run_id = start_run(&h.engine, &config);
    drain(&h.engine).await;
    let topic = h.engine.store.find_topic(run_id, "case-000")?.unwrap();

    h.engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-1",
            TrialStatus::Success,
            "MAGIC",
        ))
        .await?;
    h.engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-2",
            TrialStatus::Success,
            "miss",
        ))
        .await?;

    let collapsed = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(collapsed.status, TopicStatus::Passed);

    // A duplicate of thread-2 arriving after the collapse must not flip
    // anything.
    let ack = h
        .engine
        .record_thread_completion(&thread_completion(
            run_id,
            topic.id,
            "thread-2",
            TrialStatus::Error,
            "",
        ))
        .await?;
    assert!(!ack.applied);

    let after = h.engine.store.find_topic(run_id, "case-000")?.unwrap();
    assert_eq!(
        serde_json::to_value(&collapsed)?,
        serde_json::to_value(&after)?
    );
    Ok(())
}
