//! HTTP reasoning client.
//!
//! Speaks a messages-style completion API: one user message in, the first
//! content block's text out. The API key comes from the environment, never
//! from the config file.

use crate::config::ReasoningConfig;
use crate::reason::{ReasonError, Reasoner};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct HttpReasoner {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    timeout_secs: u64,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl HttpReasoner {
    pub fn from_config(config: &ReasoningConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).with_context(|| {
            format!(
                "Reasoning API key not set (expected env var {})",
                config.api_key_env
            )
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build reasoning HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }
}

/// Stand-in used when no backend is configured. Every call fails as
/// unreachable, so investigations are dismissed with the failure recorded
/// instead of the daemon refusing to start.
pub struct DisabledReasoner;

#[async_trait]
impl Reasoner for DisabledReasoner {
    async fn infer(&self, _stage: &str, _prompt: &str) -> Result<String, ReasonError> {
        Err(ReasonError::Unreachable(
            "reasoning backend not configured".to_string(),
        ))
    }
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn infer(&self, stage: &str, prompt: &str) -> Result<String, ReasonError> {
        debug!(stage, model = %self.model, "Reasoning call");

        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasonError::Timeout(self.timeout_secs)
                } else {
                    ReasonError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasonError::Api {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            ReasonError::Malformed {
                stage: stage.to_string(),
                detail: format!("invalid completion envelope: {e}"),
            }
        })?;

        completion
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| ReasonError::Malformed {
                stage: stage.to_string(),
                detail: "completion had no content blocks".to_string(),
            })
    }
}
