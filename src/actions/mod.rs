//! Remediation boundary -- collaborator traits and the action router.
//!
//! The router decides WHAT to call and with what confidence gate; how the
//! calls are transported lives behind these traits. Everything here
//! degrades gracefully: a failed collaborator is notified and logged, the
//! investigation's recorded conclusion is never rolled back.

pub mod deploy;
pub mod github;
pub mod notify;
pub mod router;

use crate::detect::Incident;
use crate::investigate::FixProposal;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use router::{ActionOutcome, ActionRouter};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("collaborator unreachable: {0}")]
    Unreachable(String),
    #[error("collaborator returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("collaborator response missing field '{0}'")]
    BadResponse(&'static str),
}

/// Handle to a created pull request.
#[derive(Debug, Clone, Serialize)]
pub struct PrRef {
    pub number: u64,
    pub url: String,
}

/// Fire-and-forget human notification. Failure is logged, never blocks.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<(), ActionError>;
}

/// Code host collaborator: commit metadata in, pull requests out.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn commit_diff(&self, sha: &str) -> Result<String, ActionError>;
    async fn create_pr(
        &self,
        proposal: &FixProposal,
        incident: &Incident,
        auto_merge: bool,
    ) -> Result<PrRef, ActionError>;
}

/// Deploy trigger collaborator.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Returns the deployment id on acceptance.
    async fn deploy(&self, pr: &PrRef) -> Result<String, ActionError>;
}
