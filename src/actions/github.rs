//! Code host collaborator over the GitHub REST API.
//!
//! Thin by design: the router decides whether a PR is created at all and
//! whether it auto-merges; this module only carries the calls.

use crate::actions::{ActionError, CodeHost, PrRef};
use crate::detect::Incident;
use crate::investigate::FixProposal;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub struct GitHubCodeHost {
    client: reqwest::Client,
    api_base: String,
    repo: String,
    token: String,
}

impl GitHubCodeHost {
    pub fn new(api_base: String, repo: String, token: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("argus/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_base,
            repo,
            token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_base, self.repo, path)
    }
}

#[async_trait]
impl CodeHost for GitHubCodeHost {
    async fn commit_diff(&self, sha: &str) -> Result<String, ActionError> {
        let response = self
            .client
            .get(self.url(&format!("commits/{sha}")))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github.diff")
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
        response
            .text()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))
    }

    async fn create_pr(
        &self,
        proposal: &FixProposal,
        incident: &Incident,
        auto_merge: bool,
    ) -> Result<PrRef, ActionError> {
        let branch = format!(
            "argus/fix-{}-{}",
            incident.endpoint.trim_matches('/').replace('/', "-"),
            &incident.id.to_string()[..8]
        );

        let response = self
            .client
            .post(self.url("pulls"))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&json!({
                "title": proposal.pr_title,
                "body": build_pr_body(proposal, incident),
                "head": branch,
                "base": "main",
            }))
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

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ActionError::Unreachable(e.to_string()))?;
        let number = parsed
            .get("number")
            .and_then(serde_json::Value::as_u64)
            .ok_or(ActionError::BadResponse("number"))?;
        let url = parsed
            .get("html_url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        let pr = PrRef { number, url };
        info!(pr = pr.number, %branch, "Pull request created");

        if auto_merge {
            let merge = self
                .client
                .put(self.url(&format!("pulls/{}/merge", pr.number)))
                .header("Authorization", format!("Bearer {}", self.token))
                .json(&json!({ "merge_method": "squash" }))
                .send()
                .await;
            match merge {
                Ok(r) if r.status().is_success() => info!(pr = pr.number, "Auto-merged"),
                Ok(r) => warn!(pr = pr.number, status = %r.status(), "Auto-merge declined"),
                Err(e) => warn!(pr = pr.number, "Auto-merge request failed: {e}"),
            }
        }

        Ok(pr)
    }
}

fn build_pr_body(proposal: &FixProposal, incident: &Incident) -> String {
    let checklist = proposal
        .verification_checklist
        .iter()
        .map(|item| format!("- [ ] {item}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "## Automated fix for incident {id}\n\n\
         | Field | Value |\n|-------|-------|\n\
         | Endpoint | `{endpoint}` |\n\
         | Detected | {opened_at} |\n\
         | Suspect commit | `{commit}` |\n\
         | Customers affected | {users} |\n\
         | Latency | {lat_before:.0}ms to {lat_after:.0}ms |\n\n\
         {body}\n\n\
         **Risk: {risk:?}** -- {risk_reasoning}\n\n\
         **Rollback:** {rollback}\n\n\
         ## Verification checklist\n{checklist}\n",
        id = incident.id,
        endpoint = incident.endpoint,
        opened_at = incident.opened_at.to_rfc3339(),
        commit = incident.commit_sha.as_deref().unwrap_or("unknown"),
        users = incident.affected_user_ids.len(),
        lat_before = incident.latency_before_ms,
        lat_after = incident.latency_after_ms,
        body = proposal.pr_body,
        risk = proposal.risk_level,
        risk_reasoning = proposal.risk_reasoning,
        rollback = proposal.rollback_instructions,
        checklist = checklist,
    )
}
