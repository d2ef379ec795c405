use crate::model::TestCase;
use async_trait::async_trait;
use serde_json::json;

/// Verdict for one transcript against one test case.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub passed: bool,
    pub score: f64,
    pub rubric: serde_json::Value,
}

/// Turns a trial transcript into pass/score. Consumed as a black box by the
/// completion recorder on successful trials.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn score(&self, transcript: &str, case: &TestCase) -> anyhow::Result<Verdict>;
}

/// Built-in default: passes when the case's expected text appears in the
/// transcript. A case without an expectation passes on any successful trial.
pub struct SubstringJudge;

#[async_trait]
impl Judge for SubstringJudge {
    async fn score(&self, transcript: &str, case: &TestCase) -> anyhow::Result<Verdict> {
        let passed = match case.expected.as_deref() {
            Some(expected) => transcript.contains(expected),
            None => true,
        };
        let score = if passed { 1.0 } else { 0.0 };
        Ok(Verdict {
            passed,
            score,
            rubric: json!({
                "judge": "substring",
                "expected_present": passed,
            }),
        })
    }
}
