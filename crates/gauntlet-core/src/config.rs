use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Orchestration knobs. Page size bounds one pagination step, chunk size
/// bounds fan-out width per recursion level; the worker pool caps global
/// parallelism on top of both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    /// Age after which a still-running trial is swept to `timeout`.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: i64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_job_attempts")]
    pub max_job_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: i64,
}

fn default_page_size() -> u32 {
    50
}

fn default_chunk_size() -> u32 {
    20
}

fn default_parallel() -> usize {
    4
}

fn default_timeout_ms() -> i64 {
    30 * 60 * 1000
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_max_job_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> i64 {
    1000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_size: default_chunk_size(),
            parallel: default_parallel(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_job_attempts: default_max_job_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EngineSettings {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: EngineSettings =
            serde_yaml::from_str(&raw).context("failed to parse engine settings yaml")?;
        Ok(settings)
    }
}
