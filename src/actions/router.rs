//! The action router: maps a finished investigation to gated actions.
//!
//! Confidence gates, from the top:
//!   >= auto_merge_confidence  PR with auto-merge, deploy, verify recovery
//!   >= propose_floor          PR without auto-merge, ask a human
//!   below the floor           notify only (the incident was dismissed)
//!
//! Notification always happens and never blocks. Collaborator failures are
//! reported and recorded; they never roll back the investigation's
//! conclusion.

use crate::actions::{CodeHost, Deployer, Notifier, PrRef};
use crate::config::ActionConfig;
use crate::detect::Incident;
use crate::investigate::InvestigationRecord;
use crate::storage::window::RecentWindowStore;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What the router actually did, written into the knowledge entry so the
/// next similar incident knows how this one ended.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub action_taken: String,
    pub pr: Option<PrRef>,
    pub deployment_id: Option<String>,
    /// Post-deploy verification verdict; `None` when no deploy happened.
    pub verified_recovered: Option<bool>,
}

impl ActionOutcome {
    fn new(action_taken: &str) -> Self {
        Self {
            action_taken: action_taken.to_string(),
            pr: None,
            deployment_id: None,
            verified_recovered: None,
        }
    }

    /// Whether the chosen action completed as intended.
    pub fn succeeded(&self) -> Option<bool> {
        match self.action_taken.as_str() {
            "auto_merged" => self.verified_recovered,
            "proposed" => Some(true),
            "notify_only" => Some(true),
            _ => Some(false),
        }
    }
}

pub struct ActionRouter {
    notifier: Arc<dyn Notifier>,
    code_host: Option<Arc<dyn CodeHost>>,
    deployer: Option<Arc<dyn Deployer>>,
    window: Arc<RecentWindowStore>,
    config: ActionConfig,
}

impl ActionRouter {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        code_host: Option<Arc<dyn CodeHost>>,
        deployer: Option<Arc<dyn Deployer>>,
        window: Arc<RecentWindowStore>,
        config: ActionConfig,
    ) -> Self {
        Self {
            notifier,
            code_host,
            deployer,
            window,
            config,
        }
    }

    /// The suspect commit's diff, for evidence gathering. Best effort.
    pub async fn fetch_commit_diff(&self, sha: &str) -> Option<String> {
        let code_host = self.code_host.as_ref()?;
        match code_host.commit_diff(sha).await {
            Ok(diff) => Some(diff),
            Err(e) => {
                warn!(%sha, "Could not fetch commit diff: {e}");
                None
            }
        }
    }

    /// Decide and dispatch. Infallible by design: every failure path
    /// degrades into a recorded outcome plus a notification.
    pub async fn dispatch(&self, record: &InvestigationRecord, incident: &Incident) -> ActionOutcome {
        let confidence = record.confidence().unwrap_or(0.0);

        // Always notify, fire-and-forget
        self.notify_async(summary_message(record, incident, confidence));

        let Some(proposal) = record.proposed_fix.clone() else {
            return ActionOutcome::new("notify_only");
        };
        if confidence < self.config.propose_floor {
            // The orchestrator dismisses below the floor; this is the
            // defensive rendition of the same gate.
            return ActionOutcome::new("notify_only");
        }

        let Some(code_host) = self.code_host.clone() else {
            warn!("No code host configured, fix proposal goes out as notification only");
            self.notify_async(format!(
                "Fix proposed for {} but no code host is configured:\n{}",
                incident.endpoint, proposal.summary
            ));
            return ActionOutcome::new("notify_only");
        };

        let auto = confidence >= self.config.auto_merge_confidence && self.deployer.is_some();

        let pr = match code_host.create_pr(&proposal, incident, auto).await {
            Ok(pr) => pr,
            Err(e) => {
                warn!(endpoint = %incident.endpoint, "PR creation failed: {e}");
                self.notify_async(format!(
                    "PR creation failed for incident {} on {}: {e}",
                    incident.id, incident.endpoint
                ));
                return ActionOutcome::new("pr_failed");
            }
        };

        if !auto {
            info!(
                pr = pr.number,
                confidence = format_args!("{confidence:.2}"),
                "Fix proposed, waiting for human review"
            );
            self.notify_async(format!(
                "Fix for {} awaits review ({:.0}% confidence): {}",
                incident.endpoint,
                confidence * 100.0,
                pr.url
            ));
            let mut outcome = ActionOutcome::new("proposed");
            outcome.pr = Some(pr);
            return outcome;
        }

        // deployer presence was part of the auto gate above
        let deployer = self.deployer.clone().expect("deployer checked");
        let deployment_id = match deployer.deploy(&pr).await {
            Ok(id) => id,
            Err(e) => {
                warn!(pr = pr.number, "Deploy failed: {e}");
                self.notify_async(format!(
                    "Auto-merge PR {} created but deploy failed: {e}. Manual deploy needed.",
                    pr.url
                ));
                let mut outcome = ActionOutcome::new("deploy_failed");
                outcome.pr = Some(pr);
                return outcome;
            }
        };

        let recovered = self
            .verify_recovery(&incident.endpoint, incident.latency_before_ms)
            .await;
        self.notify_async(if recovered {
            format!(
                "Fix deployed and verified: {} back at baseline ({})",
                incident.endpoint, pr.url
            )
        } else {
            format!(
                "Fix deployed but {} did NOT recover within {}s -- escalate ({})",
                incident.endpoint, self.config.verify_timeout_secs, pr.url
            )
        });

        let mut outcome = ActionOutcome::new("auto_merged");
        outcome.pr = Some(pr);
        outcome.deployment_id = Some(deployment_id);
        outcome.verified_recovered = Some(recovered);
        outcome
    }

    /// Watch the endpoint after a deploy: recovered when the trailing mean
    /// is back within `recovery_threshold` of the pre-incident baseline
    /// before the verification timeout runs out.
    async fn verify_recovery(&self, endpoint: &str, baseline_latency_ms: f64) -> bool {
        let threshold = baseline_latency_ms * self.config.recovery_threshold;
        info!(
            endpoint,
            threshold = format_args!("{threshold:.1}ms"),
            "Verifying recovery"
        );

        tokio::time::sleep(std::time::Duration::from_secs(self.config.verify_settle_secs)).await;
        let deadline = tokio::time::Instant::now()
            + std::time::Duration::from_secs(self.config.verify_timeout_secs);

        loop {
            if let Some(agg) = self.window.aggregate(endpoint, 120, Utc::now()) {
                if agg.mean_latency <= threshold {
                    info!(
                        endpoint,
                        latency = format_args!("{:.1}ms", agg.mean_latency),
                        "Recovery verified"
                    );
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(endpoint, "Verification timed out, endpoint still degraded");
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_secs(
                self.config.verify_poll_secs.max(1),
            ))
            .await;
        }
    }

    fn notify_async(&self, message: String) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&message).await {
                warn!("Notification failed: {e}");
            }
        });
    }
}

fn summary_message(record: &InvestigationRecord, incident: &Incident, confidence: f64) -> String {
    let cause = record
        .confirmed_cause
        .as_ref()
        .map(|c| c.title.clone())
        .or_else(|| record.failure_reason.clone())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "Incident {} on {} ({} trigger, score {:.1}): {} ({:.0}% confidence)",
        incident.id,
        incident.endpoint,
        incident.trigger_metric,
        incident.anomaly_score,
        cause,
        confidence * 100.0
    )
}
