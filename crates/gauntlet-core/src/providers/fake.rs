//! In-memory collaborators for tests and offline runs.

use crate::model::TestCase;
use crate::providers::agent::{AgentRuntime, TrialReceipt, TrialRequest};
use crate::providers::judge::{Judge, Verdict};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Records every invocation and hands out sequential operation ids.
/// Optionally fails synchronously for prompts containing a marker, to
/// exercise the dispatch-start error path.
#[derive(Default)]
pub struct RecordingRuntime {
    pub invocations: Mutex<Vec<TrialRequest>>,
    counter: AtomicU64,
    fail_marker: Option<String>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            invocations: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
            fail_marker: Some(marker.into()),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentRuntime for RecordingRuntime {
    async fn invoke(&self, trial: TrialRequest) -> anyhow::Result<TrialReceipt> {
        if let Some(marker) = &self.fail_marker {
            if trial.prompt.contains(marker.as_str()) {
                anyhow::bail!("runtime refused trial: {marker}");
            }
        }
        self.invocations.lock().unwrap().push(trial);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TrialReceipt {
            operation_id: format!("op-{n}"),
        })
    }

    fn provider_name(&self) -> &'static str {
        "recording"
    }
}

/// Returns a scripted verdict per test case id, or the default verdict.
pub struct ScriptedJudge {
    verdicts: Mutex<HashMap<String, Verdict>>,
    default_passed: bool,
}

impl ScriptedJudge {
    pub fn passing() -> Self {
        Self {
            verdicts: Mutex::new(HashMap::new()),
            default_passed: true,
        }
    }

    pub fn failing() -> Self {
        Self {
            verdicts: Mutex::new(HashMap::new()),
            default_passed: false,
        }
    }

    pub fn with_verdict(self, case_id: impl Into<String>, passed: bool, score: f64) -> Self {
        self.verdicts.lock().unwrap().insert(
            case_id.into(),
            Verdict {
                passed,
                score,
                rubric: json!({"judge": "scripted"}),
            },
        );
        self
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn score(&self, _transcript: &str, case: &TestCase) -> anyhow::Result<Verdict> {
        if let Some(v) = self.verdicts.lock().unwrap().get(&case.id) {
            return Ok(v.clone());
        }
        Ok(Verdict {
            passed: self.default_passed,
            score: if self.default_passed { 1.0 } else { 0.0 },
            rubric: json!({"judge": "scripted"}),
        })
    }
}
