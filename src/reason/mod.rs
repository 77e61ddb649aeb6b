//! External reasoning capability.
//!
//! The investigation stages depend on a non-deterministic reasoning
//! backend. It is abstracted behind [`Reasoner`] with a strict timeout and
//! a single retry, so orchestrator correctness never depends on a specific
//! backend. Whatever comes back is untrusted text: it goes through
//! [`parser`] and schema validation before any stage uses it.

pub mod client;
pub mod parser;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ReasonError {
    #[error("reasoning call timed out after {0}s")]
    Timeout(u64),
    #[error("reasoning backend unreachable: {0}")]
    Unreachable(String),
    #[error("reasoning backend returned status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unparseable reasoning output for stage '{stage}': {detail}")]
    Malformed { stage: String, detail: String },
}

/// Black-box reasoning capability: a stage-specific prompt in, free text
/// out. Implementations must enforce their own call timeout.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn infer(&self, stage: &str, prompt: &str) -> Result<String, ReasonError>;
}

/// Call the reasoner and parse the response as JSON, retrying once with
/// backoff on any failure (timeout, transport, malformed output). A second
/// failure is final: the caller marks the stage failed.
pub async fn infer_json(
    reasoner: &dyn Reasoner,
    stage: &str,
    prompt: &str,
    retry_backoff_ms: u64,
) -> Result<Value, ReasonError> {
    match infer_json_once(reasoner, stage, prompt).await {
        Ok(value) => Ok(value),
        Err(first) => {
            let jitter = rand::thread_rng().gen_range(0..250);
            warn!(
                stage,
                backoff_ms = retry_backoff_ms + jitter,
                "Reasoning call failed, retrying once: {first}"
            );
            tokio::time::sleep(std::time::Duration::from_millis(retry_backoff_ms + jitter)).await;
            infer_json_once(reasoner, stage, prompt).await
        }
    }
}

async fn infer_json_once(
    reasoner: &dyn Reasoner,
    stage: &str,
    prompt: &str,
) -> Result<Value, ReasonError> {
    let raw = reasoner.infer(stage, prompt).await?;
    parser::parse_json_response(&raw, stage)
}
