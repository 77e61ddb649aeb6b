//! Deploy trigger collaborator.
//!
//! Posts to a deploy hook and hands back the deployment id. The hook is
//! whatever CI/CD the operator wired up; argus only triggers and records.

use crate::actions::{ActionError, Deployer, PrRef};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::info;

pub struct HookDeployer {
    client: reqwest::Client,
    url: String,
}

impl HookDeployer {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Deployer for HookDeployer {
    async fn deploy(&self, pr: &PrRef) -> Result<String, ActionError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "pr_number": pr.number, "pr_url": pr.url }))
            .send()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ActionError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        // A hook that returns no body still deployed; synthesize an id
        let deployment_id = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("deployment_id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("deploy-pr-{}", pr.number));

        info!(%deployment_id, pr = pr.number, "Deploy triggered");
        Ok(deployment_id)
    }
}
