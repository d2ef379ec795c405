use crate::passk::PassKPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a whole evaluation run.
///
/// `aborted` is the single cancellation flag: every orchestration step checks
/// it before mutating state and treats it as "stop, do not error".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> RunStatus {
        match s {
            "idle" => RunStatus::Idle,
            "pending" => RunStatus::Pending,
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            _ => RunStatus::Aborted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Aborted
        )
    }
}

/// Per-run configuration supplied at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of independent attempts per test case (pass@k). 1 = single trial.
    #[serde(default = "default_k")]
    pub k: u32,
    /// Environment prompt injected into every trial of this run.
    #[serde(default)]
    pub env_prompt: Option<String>,
    /// Stale-trial threshold override for the timeout sweep.
    #[serde(default)]
    pub timeout_ms: Option<i64>,
    /// How K thread outcomes collapse into one topic verdict.
    #[serde(default)]
    pub aggregation: PassKPolicy,
}

fn default_k() -> u32 {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            k: 1,
            env_prompt: None,
            timeout_ms: None,
            aggregation: PassKPolicy::default(),
        }
    }
}

/// One evaluation execution over one dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub user_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub target_agent_id: Option<String>,
    pub config: RunConfig,
    pub status: RunStatus,
    /// Aggregate metrics, written only by the finalizer.
    #[serde(default)]
    pub metrics: Option<RunMetrics>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable benchmark input. `sort_order` drives deterministic pagination
/// cursors and human-readable case numbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,
    pub dataset_id: String,
    pub prompt: String,
    #[serde(default)]
    pub expected: Option<String>,
    pub sort_order: i64,
}

/// Per-(run, test case) execution record: the central state-machine entity.
///
/// Created `running` at dispatch time, moved exactly once into a terminal
/// status by the completion recorder or the timeout reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Error,
    Timeout,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Pending => "pending",
            TopicStatus::Running => "running",
            TopicStatus::Passed => "passed",
            TopicStatus::Failed => "failed",
            TopicStatus::Error => "error",
            TopicStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> TopicStatus {
        match s {
            "pending" => TopicStatus::Pending,
            "running" => TopicStatus::Running,
            "passed" => TopicStatus::Passed,
            "failed" => TopicStatus::Failed,
            "timeout" => TopicStatus::Timeout,
            _ => TopicStatus::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TopicStatus::Passed | TopicStatus::Failed | TopicStatus::Error | TopicStatus::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTopic {
    /// Row id; doubles as the topic id carried in thread completion callbacks.
    pub id: i64,
    pub run_id: i64,
    pub test_case_id: String,
    pub status: TopicStatus,
    pub score: Option<f64>,
    pub passed: Option<bool>,
    pub eval_result: EvalResult,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Structured outcome attached to a topic. For k>1 the per-thread results
/// live in `threads`, one slot per thread id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalResult {
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub completion_reason: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub rubric: serde_json::Value,
    #[serde(default)]
    pub threads: Vec<ThreadResult>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub steps: Option<i64>,
    #[serde(default)]
    pub total_tokens: Option<i64>,
}

impl EvalResult {
    /// Upserts a thread outcome into its own slot, keyed by thread id.
    /// Redelivery of the same thread's completion overwrites only that slot.
    pub fn put_thread(&mut self, result: ThreadResult) {
        match self
            .threads
            .iter_mut()
            .find(|t| t.thread_id == result.thread_id)
        {
            Some(slot) => *slot = result,
            None => self.threads.push(result),
        }
    }
}

/// One of K independent attempts at the same test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadResult {
    pub thread_id: String,
    pub status: TopicStatus,
    #[serde(default)]
    pub operation_id: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub passed: Option<bool>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ThreadResult {
    pub fn placeholder(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            status: TopicStatus::Pending,
            operation_id: None,
            score: None,
            passed: None,
            cost: None,
            duration_ms: None,
            error_message: None,
        }
    }
}

/// Aggregate metrics for a resolved run. Written exactly once by the
/// finalizer, as a pure function of terminal topic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_cases: u64,
    pub passed_cases: u64,
    pub failed_cases: u64,
    pub error_cases: u64,
    pub timeout_cases: u64,
    pub pass_rate: f64,
    pub average_score: f64,
}

/// Outcome reported by the external agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Success,
    Error,
}

/// Completion callback for a single-trial (k=1) test case.
/// Delivered at least once; ingestion must be idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryCompletion {
    pub run_id: i64,
    pub test_case_id: String,
    pub user_id: String,
    pub status: TrialStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub steps: Option<i64>,
    #[serde(default)]
    pub total_tokens: Option<i64>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl TrajectoryCompletion {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.run_id <= 0 {
            anyhow::bail!("completion payload missing run_id");
        }
        if self.test_case_id.trim().is_empty() {
            anyhow::bail!("completion payload missing test_case_id");
        }
        if self.user_id.trim().is_empty() {
            anyhow::bail!("completion payload missing user_id");
        }
        Ok(())
    }
}

/// Completion callback for one thread of a k>1 topic: the trajectory shape
/// plus the thread/topic identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadCompletion {
    #[serde(flatten)]
    pub trajectory: TrajectoryCompletion,
    pub thread_id: String,
    pub topic_id: i64,
}

impl ThreadCompletion {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.trajectory.validate()?;
        if self.thread_id.trim().is_empty() {
            anyhow::bail!("completion payload missing thread_id");
        }
        if self.topic_id <= 0 {
            anyhow::bail!("completion payload missing topic_id");
        }
        Ok(())
    }
}

/// Acknowledgement returned to the webhook caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionAck {
    /// Whether this delivery changed any state (false for duplicates and
    /// deliveries against an aborted run).
    pub applied: bool,
    /// For thread completions: whether all K sibling threads are terminal.
    #[serde(default)]
    pub all_threads_done: bool,
    /// Whether every test case of the run is now resolved.
    pub all_done: bool,
}
