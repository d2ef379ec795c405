mod common;

use common::*;
use gauntlet_core::model::{EvalResult, RunConfig, TopicStatus};
use gauntlet_core::providers::fake::RecordingRuntime;
use gauntlet_core::providers::judge::SubstringJudge;
use gauntlet_core::storage::Store;
use std::sync::Arc;
use tempfile::tempdir;

/// Backdates every topic row so the sweep threshold is in their future.
fn backdate_topics(db_path: &std::path::Path, by_ms: i64) {
    let conn = rusqlite::Connection::open(db_path).expect("raw conn");
    conn.execute(
        "UPDATE run_topics SET created_at = created_at - ?1",
        rusqlite::params![by_ms],
    )
    .expect("backdate");
}

#[tokio::test]
async fn sweep_touches_only_running_rows() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gauntlet.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;

    seed_cases(&store, 6);
    let run_id = store.create_run(USER, DATASET, None, &RunConfig::default())?;
    store.mark_run_started(USER, run_id)?;

    let eval = EvalResult::default();
    let statuses = [
        ("case-000", TopicStatus::Pending),
        ("case-001", TopicStatus::Running),
        ("case-002", TopicStatus::Passed),
        ("case-003", TopicStatus::Failed),
        ("case-004", TopicStatus::Error),
        ("case-005", TopicStatus::Timeout),
    ];
    for (case_id, status) in statuses {
        store.create_topic(run_id, case_id, status, None, None, &eval)?;
    }

    backdate_topics(&db_path, 120_000);
    let swept = store.batch_mark_timeout(run_id, 60_000)?;

    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].test_case_id, "case-001");
    assert_eq!(swept[0].status, TopicStatus::Timeout);
    assert_eq!(swept[0].score, Some(0.0));
    assert_eq!(swept[0].passed, Some(false));

    // Every other status is untouched.
    for (case_id, status) in statuses {
        if case_id == "case-001" {
            continue;
        }
        let topic = store.find_topic(run_id, case_id)?.unwrap();
        assert_eq!(topic.status, status, "status {status:?} must not be swept");
    }
    Ok(())
}

#[tokio::test]
async fn fresh_running_rows_are_not_swept() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gauntlet.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;

    seed_cases(&store, 1);
    let run_id = store.create_run(USER, DATASET, None, &RunConfig::default())?;
    store.create_topic(
        run_id,
        "case-000",
        TopicStatus::Running,
        None,
        None,
        &EvalResult::default(),
    )?;

    let swept = store.batch_mark_timeout(run_id, 60_000)?;
    assert!(swept.is_empty());
    Ok(())
}

#[tokio::test]
async fn reaper_unblocks_finalization() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gauntlet.db");
    let store = Store::open(&db_path)?;
    store.init_schema()?;
    let h_store = store.clone();

    let engine = gauntlet_core::engine::Engine::new(
        h_store,
        Arc::new(RecordingRuntime::new()),
        Arc::new(SubstringJudge),
        fast_settings(),
        gauntlet_core::webhook::WebhookConfig::new("http://127.0.0.1:8700", None),
    );

    seed_cases(&engine.store, 2);
    let run_id = start_run(&engine, &RunConfig::default());
    drain(&engine).await;

    // One case resolves normally, the other never calls back.
    engine
        .record_trajectory_completion(&success_completion(run_id, "case-000", "MAGIC"))
        .await?;

    backdate_topics(&db_path, 120_000);
    let swept = engine.reap(run_id, 60_000)?;
    assert_eq!(swept.len(), 1);

    drain(&engine).await;
    let run = engine.store.find_run(USER, run_id)?.unwrap();
    assert!(run.status.is_terminal());
    let metrics = run.metrics.unwrap();
    assert_eq!(metrics.timeout_cases, 1);
    assert_eq!(metrics.passed_cases, 1);
    Ok(())
}
