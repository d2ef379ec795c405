#![allow(dead_code)]

use gauntlet_core::config::EngineSettings;
use gauntlet_core::engine::worker::WorkerPool;
use gauntlet_core::engine::Engine;
use gauntlet_core::model::{RunConfig, TestCase, TrajectoryCompletion, TrialStatus};
use gauntlet_core::providers::fake::RecordingRuntime;
use gauntlet_core::providers::judge::Judge;
use gauntlet_core::storage::Store;
use gauntlet_core::webhook::WebhookConfig;
use std::sync::Arc;

pub const USER: &str = "user-1";
pub const DATASET: &str = "bench-1";

pub struct Harness {
    pub engine: Engine,
    pub runtime: Arc<RecordingRuntime>,
}

pub fn harness(
    runtime: RecordingRuntime,
    judge: Arc<dyn Judge>,
    settings: EngineSettings,
) -> Harness {
    let store = Store::memory().expect("in-memory store");
    store.init_schema().expect("schema");
    let runtime = Arc::new(runtime);
    let engine = Engine::new(
        store,
        runtime.clone(),
        judge,
        settings,
        WebhookConfig::new("http://127.0.0.1:8700", None),
    );
    Harness { engine, runtime }
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry_backoff_ms: 0,
        ..EngineSettings::default()
    }
}

/// Seeds `n` cases, ids `case-000`.. in sort order.
pub fn seed_cases(store: &Store, n: usize) {
    for i in 0..n {
        store
            .insert_test_case(&TestCase {
                id: format!("case-{i:03}"),
                dataset_id: DATASET.into(),
                prompt: format!("prompt {i}"),
                expected: Some("MAGIC".into()),
                sort_order: i as i64,
            })
            .expect("insert case");
    }
}

/// Creates and starts a run; the first paginate step is on the queue.
pub fn start_run(engine: &Engine, config: &RunConfig) -> i64 {
    let run_id = engine
        .store
        .create_run(USER, DATASET, None, config)
        .expect("create run");
    engine.start_run(USER, run_id).expect("start run");
    run_id
}

/// Drains the durable queue to quiescence.
pub async fn drain(engine: &Engine) -> u64 {
    WorkerPool::new(engine.clone())
        .run_until_idle()
        .await
        .expect("drain queue")
}

pub fn success_completion(run_id: i64, case_id: &str, transcript: &str) -> TrajectoryCompletion {
    TrajectoryCompletion {
        run_id,
        test_case_id: case_id.into(),
        user_id: USER.into(),
        status: TrialStatus::Success,
        error_message: None,
        cost: Some(0.01),
        duration_ms: Some(1200),
        steps: Some(4),
        total_tokens: Some(900),
        transcript: Some(transcript.into()),
    }
}

pub fn error_completion(run_id: i64, case_id: &str, message: &str) -> TrajectoryCompletion {
    TrajectoryCompletion {
        run_id,
        test_case_id: case_id.into(),
        user_id: USER.into(),
        status: TrialStatus::Error,
        error_message: Some(message.into()),
        cost: None,
        duration_ms: None,
        steps: None,
        total_tokens: None,
        transcript: None,
    }
}
