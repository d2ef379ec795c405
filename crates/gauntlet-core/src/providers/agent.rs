use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where the runtime should report the trial outcome. The body carries the
/// identifiers the completion recorder needs to correlate the callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionWebhook {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub body: serde_json::Value,
}

/// One trial to start on the external agent runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialRequest {
    pub prompt: String,
    #[serde(default)]
    pub env_prompt: Option<String>,
    #[serde(default)]
    pub target_agent_id: Option<String>,
    pub webhook: CompletionWebhook,
    /// Trials run unattended; the runtime must not pause for approvals.
    pub headless: bool,
}

/// Receipt returned by a successfully started trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialReceipt {
    pub operation_id: String,
}

/// The external agent runtime. `invoke` only starts the trial; the outcome
/// arrives later through the completion webhook. May fail synchronously when
/// the trial cannot even start.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn invoke(&self, trial: TrialRequest) -> anyhow::Result<TrialReceipt>;
    fn provider_name(&self) -> &'static str;
}

/// HTTP-backed runtime client: posts the trial and expects an
/// `{"operation_id": ...}` receipt.
pub struct HttpAgentRuntime {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpAgentRuntime {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AgentRuntime for HttpAgentRuntime {
    async fn invoke(&self, trial: TrialRequest) -> anyhow::Result<TrialReceipt> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&trial)
            .send()
            .await?
            .error_for_status()?;
        let receipt: TrialReceipt = resp.json().await?;
        Ok(receipt)
    }

    fn provider_name(&self) -> &'static str {
        "http"
    }
}
