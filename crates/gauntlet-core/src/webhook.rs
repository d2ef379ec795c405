//! Completion-webhook plumbing: outbound hook descriptors handed to the
//! runtime at dispatch time, and inbound payload parsing/authorization.

use crate::model::{ThreadCompletion, TrajectoryCompletion};
use crate::providers::agent::CompletionWebhook;
use serde_json::json;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Base URL the runtime posts completions back to.
    pub base_url: String,
    /// Shared secret; callbacks must present its digest as their token.
    pub secret: Option<String>,
}

impl WebhookConfig {
    pub fn new(base_url: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret,
        }
    }

    /// Hook-independent auth token: hex digest of the shared secret.
    pub fn token(&self) -> Option<String> {
        self.secret.as_deref().map(digest)
    }

    /// Rejects callbacks that do not present the expected token. A config
    /// without a secret accepts everything (local/dev mode).
    pub fn authorize(&self, presented: Option<&str>) -> anyhow::Result<()> {
        let Some(expected) = self.token() else {
            return Ok(());
        };
        match presented {
            Some(t) if constant_time_eq(t.as_bytes(), expected.as_bytes()) => Ok(()),
            _ => anyhow::bail!("webhook token mismatch"),
        }
    }

    pub fn trajectory_hook(
        &self,
        run_id: i64,
        test_case_id: &str,
        user_id: &str,
    ) -> CompletionWebhook {
        CompletionWebhook {
            url: format!("{}/hooks/trajectory", self.base_url.trim_end_matches('/')),
            token: self.token(),
            body: json!({
                "run_id": run_id,
                "test_case_id": test_case_id,
                "user_id": user_id,
            }),
        }
    }

    pub fn thread_hook(
        &self,
        run_id: i64,
        test_case_id: &str,
        user_id: &str,
        thread_id: &str,
        topic_id: i64,
    ) -> CompletionWebhook {
        CompletionWebhook {
            url: format!("{}/hooks/thread", self.base_url.trim_end_matches('/')),
            token: self.token(),
            body: json!({
                "run_id": run_id,
                "test_case_id": test_case_id,
                "user_id": user_id,
                "thread_id": thread_id,
                "topic_id": topic_id,
            }),
        }
    }
}

/// Parses and validates an inbound trajectory completion. Malformed or
/// under-identified payloads are a client error; nothing is written.
pub fn parse_trajectory(body: &[u8]) -> anyhow::Result<TrajectoryCompletion> {
    let payload: TrajectoryCompletion =
        serde_json::from_slice(body).map_err(|e| anyhow::anyhow!("malformed payload: {e}"))?;
    payload.validate()?;
    Ok(payload)
}

pub fn parse_thread(body: &[u8]) -> anyhow::Result<ThreadCompletion> {
    let payload: ThreadCompletion =
        serde_json::from_slice(body).map_err(|e| anyhow::anyhow!("malformed payload: {e}"))?;
    payload.validate()?;
    Ok(payload)
}

fn digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_requires_matching_digest() {
        let cfg = WebhookConfig::new("http://localhost:8700", Some("s3cret".into()));
        let token = cfg.token().unwrap();
        assert!(cfg.authorize(Some(&token)).is_ok());
        assert!(cfg.authorize(Some("wrong")).is_err());
        assert!(cfg.authorize(None).is_err());
    }

    #[test]
    fn parse_rejects_missing_identifiers() {
        let body = br#"{"run_id": 0, "test_case_id": "c1", "user_id": "u1", "status": "success"}"#;
        assert!(parse_trajectory(body).is_err());

        let ok = br#"{"run_id": 3, "test_case_id": "c1", "user_id": "u1", "status": "error", "error_message": "crashed"}"#;
        let p = parse_trajectory(ok).unwrap();
        assert_eq!(p.run_id, 3);
    }

    #[test]
    fn thread_payload_flattens_trajectory_fields() {
        let body = br#"{"run_id": 3, "test_case_id": "c1", "user_id": "u1",
                        "status": "success", "thread_id": "t-2", "topic_id": 9}"#;
        let p = parse_thread(body).unwrap();
        assert_eq!(p.trajectory.run_id, 3);
        assert_eq!(p.thread_id, "t-2");
    }
}
