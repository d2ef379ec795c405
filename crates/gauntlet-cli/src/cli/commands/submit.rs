use super::{build_engine, EngineOptions};
use crate::cli::args::SubmitArgs;
use anyhow::Context;
use gauntlet_core::model::{RunConfig, TestCase};
use gauntlet_core::passk::PassKPolicy;
use serde::Deserialize;

/// YAML run submission: the dataset's cases plus the run configuration.
#[derive(Debug, Deserialize)]
struct RunSpec {
    dataset: String,
    #[serde(default)]
    k: Option<u32>,
    #[serde(default)]
    env_prompt: Option<String>,
    #[serde(default)]
    target_agent: Option<String>,
    #[serde(default)]
    aggregation: Option<PassKPolicy>,
    #[serde(default)]
    timeout_ms: Option<i64>,
    #[serde(default)]
    cases: Vec<CaseSpec>,
}

#[derive(Debug, Deserialize)]
struct CaseSpec {
    id: String,
    prompt: String,
    #[serde(default)]
    expected: Option<String>,
}

pub async fn run(args: SubmitArgs) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let spec: RunSpec = serde_yaml::from_str(&raw).context("failed to parse run spec yaml")?;

    let engine = build_engine(EngineOptions::local(args.db))?;

    for (idx, case) in spec.cases.iter().enumerate() {
        engine.store.insert_test_case(&TestCase {
            id: case.id.clone(),
            dataset_id: spec.dataset.clone(),
            prompt: case.prompt.clone(),
            expected: case.expected.clone(),
            sort_order: idx as i64,
        })?;
    }

    let config = RunConfig {
        k: spec.k.unwrap_or(1),
        env_prompt: spec.env_prompt,
        timeout_ms: spec.timeout_ms,
        aggregation: spec.aggregation.unwrap_or_default(),
    };
    let run_id = engine.store.create_run(
        &args.user,
        &spec.dataset,
        spec.target_agent.as_deref(),
        &config,
    )?;
    engine.start_run(&args.user, run_id)?;

    let total = engine.store.count_cases(&spec.dataset)?;
    println!(
        "run {run_id} started: dataset '{}' ({total} cases, k={})",
        spec.dataset, config.k
    );
    Ok(0)
}
