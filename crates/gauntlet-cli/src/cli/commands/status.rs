use super::open_store;
use crate::cli::args::StatusArgs;
use gauntlet_core::model::TopicStatus;
use serde_json::json;

pub fn run(args: StatusArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let run = store
        .find_run(&args.user, args.run)?
        .ok_or_else(|| anyhow::anyhow!("run {} not found", args.run))?;
    let topics = store.topics_for_run(run.id)?;
    let total_cases = store.count_cases(&run.dataset_id)?;

    let count = |s: TopicStatus| topics.iter().filter(|t| t.status == s).count();

    if args.format == "json" {
        let out = json!({
            "run_id": run.id,
            "dataset_id": run.dataset_id,
            "status": run.status,
            "k": run.config.k,
            "total_cases": total_cases,
            "dispatched": topics.len(),
            "running": count(TopicStatus::Running),
            "passed": count(TopicStatus::Passed),
            "failed": count(TopicStatus::Failed),
            "error": count(TopicStatus::Error),
            "timeout": count(TopicStatus::Timeout),
            "metrics": run.metrics,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    println!(
        "run {} [{}] dataset '{}' k={}",
        run.id,
        run.status.as_str(),
        run.dataset_id,
        run.config.k
    );
    println!(
        "  cases: {} total, {} dispatched, {} running",
        total_cases,
        topics.len(),
        count(TopicStatus::Running)
    );
    println!(
        "  outcomes: {} passed, {} failed, {} error, {} timeout",
        count(TopicStatus::Passed),
        count(TopicStatus::Failed),
        count(TopicStatus::Error),
        count(TopicStatus::Timeout)
    );
    if let Some(m) = &run.metrics {
        println!(
            "  metrics: pass_rate {:.2}%, average score {:.3}",
            m.pass_rate * 100.0,
            m.average_score
        );
    }
    for t in &topics {
        println!(
            "  - {} [{}] score={}",
            t.test_case_id,
            t.status.as_str(),
            t.score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "-".into())
        );
    }
    Ok(0)
}
