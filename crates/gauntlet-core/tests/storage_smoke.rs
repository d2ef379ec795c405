use gauntlet_core::model::{EvalResult, RunConfig, RunMetrics, RunStatus, TestCase, TopicStatus};
use gauntlet_core::storage::Store;
use tempfile::tempdir;

#[test]
fn storage_lifecycle_smoke() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("gauntlet.db");

    let store = Store::open(&db_path)?;
    store.init_schema()?;

    // Dataset
    for i in 0..3 {
        store.insert_test_case(&TestCase {
            id: format!("c{i}"),
            dataset_id: "ds".into(),
            prompt: format!("p{i}"),
            expected: None,
            sort_order: i,
        })?;
    }
    assert_eq!(store.count_cases("ds")?, 3);

    let page = store.cases_after("ds", None, 2)?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].id, "c0");
    let rest = store.cases_after("ds", Some("c1"), 10)?;
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, "c2");

    // Run lifecycle
    let run_id = store.create_run("u1", "ds", None, &RunConfig::default())?;
    assert_eq!(store.run_status(run_id)?, Some(RunStatus::Idle));
    assert!(store.mark_run_started("u1", run_id)?);
    assert!(!store.mark_run_started("u1", run_id)?, "already running");

    // Scoping: another user cannot see or mutate the run.
    assert!(store.find_run("u2", run_id)?.is_none());
    assert!(!store.abort_run("u2", run_id)?);

    // Topics
    let eval = EvalResult::default();
    let topic_id = store
        .create_topic(run_id, "c0", TopicStatus::Running, None, None, &eval)?
        .expect("created");
    assert!(
        store
            .create_topic(run_id, "c0", TopicStatus::Running, None, None, &eval)?
            .is_none(),
        "unique per (run, case)"
    );

    assert!(store.complete_topic(topic_id, TopicStatus::Passed, Some(1.0), Some(true), &eval)?);
    assert!(
        !store.complete_topic(topic_id, TopicStatus::Failed, Some(0.0), Some(false), &eval)?,
        "terminal topics are never rewritten"
    );

    store.create_topic(run_id, "c1", TopicStatus::Error, Some(0.0), Some(false), &eval)?;
    let (terminal, total) = store.resolution_counts(run_id)?.unwrap();
    assert_eq!((terminal, total), (2, 3));

    // Retry support: error/timeout rows come back out and disappear.
    let deleted = store.delete_error_topics(run_id)?;
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].test_case_id, "c1");
    assert!(store.find_topic(run_id, "c1")?.is_none());

    // Finalize write is status + metrics in one shot.
    let metrics = RunMetrics {
        total_cases: 1,
        passed_cases: 1,
        failed_cases: 0,
        error_cases: 0,
        timeout_cases: 0,
        pass_rate: 1.0,
        average_score: 1.0,
    };
    assert!(store.finalize_run(run_id, RunStatus::Completed, &metrics)?);
    let run = store.find_run("u1", run_id)?.unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.metrics, Some(metrics));

    // Raw SQL sanity: cascade delete of topics with their run.
    let conn = rusqlite::Connection::open(&db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.execute("DELETE FROM runs WHERE id=?1", rusqlite::params![run_id])?;
    let count: i64 = conn.query_row("SELECT count(*) FROM run_topics", [], |r| r.get(0))?;
    assert_eq!(count, 0);

    Ok(())
}

#[test]
fn aborted_run_cannot_be_finalized_or_reopened() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;

    let run_id = store.create_run("u1", "ds", None, &RunConfig::default())?;
    store.mark_run_started("u1", run_id)?;
    assert!(store.abort_run("u1", run_id)?);

    let metrics = RunMetrics {
        total_cases: 0,
        passed_cases: 0,
        failed_cases: 0,
        error_cases: 0,
        timeout_cases: 0,
        pass_rate: 0.0,
        average_score: 0.0,
    };
    assert!(!store.finalize_run(run_id, RunStatus::Completed, &metrics)?);
    assert!(!store.reopen_run(run_id)?);
    assert_eq!(store.run_status(run_id)?, Some(RunStatus::Aborted));
    Ok(())
}
