use crate::model::{ThreadResult, TopicStatus};
use serde::{Deserialize, Serialize};

/// How K thread outcomes collapse into one topic-level verdict.
///
/// The collapse rule is a product decision, so it is carried on the run
/// config rather than hardcoded in the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKPolicy {
    /// pass@k: the topic passes if at least one thread passed.
    /// Topic score is the best thread score.
    #[default]
    AnyPass,
    /// The topic passes only if a strict majority of threads passed.
    /// Topic score is the mean thread score.
    Majority,
    /// pass@k with the first passing thread (in thread order) supplying
    /// the topic score.
    FirstPass,
}

/// Collapsed topic-level outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicVerdict {
    pub status: TopicStatus,
    pub passed: bool,
    pub score: f64,
}

impl PassKPolicy {
    /// Collapses terminal thread outcomes into a topic verdict.
    ///
    /// Callers must only invoke this once every thread is terminal; a
    /// non-terminal slot counts as not-passed with score 0.
    pub fn collapse(&self, threads: &[ThreadResult]) -> TopicVerdict {
        let k = threads.len();
        let passed_count = threads.iter().filter(|t| t.passed == Some(true)).count();
        let any_passed = passed_count > 0;
        let all_errored = k > 0
            && threads
                .iter()
                .all(|t| matches!(t.status, TopicStatus::Error | TopicStatus::Timeout));

        let passed = match self {
            PassKPolicy::AnyPass | PassKPolicy::FirstPass => any_passed,
            PassKPolicy::Majority => passed_count * 2 > k,
        };

        let score = match self {
            PassKPolicy::AnyPass => threads
                .iter()
                .filter_map(|t| t.score)
                .fold(0.0, f64::max),
            PassKPolicy::Majority => {
                let sum: f64 = threads.iter().filter_map(|t| t.score).sum();
                if k == 0 {
                    0.0
                } else {
                    sum / k as f64
                }
            }
            PassKPolicy::FirstPass => threads
                .iter()
                .find(|t| t.passed == Some(true))
                .and_then(|t| t.score)
                .unwrap_or(0.0),
        };

        let status = if passed {
            TopicStatus::Passed
        } else if all_errored {
            TopicStatus::Error
        } else {
            TopicStatus::Failed
        };

        TopicVerdict {
            status,
            passed,
            score,
        }
    }
}
