//! Incident investigation -- the record types and the 5-stage pipeline.
//!
//! An investigation is an append-only accumulation of stage outputs:
//! earlier artifacts are immutable inputs to later stages. The record
//! outlives the incident as a knowledge base entry.

pub mod orchestrator;
pub mod steps;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages, in the only order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Characterize,
    Hypothesize,
    GatherEvidence,
    Confirm,
    Fix,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Characterize => "characterize",
            Stage::Hypothesize => "hypothesize",
            Stage::GatherEvidence => "gather_evidence",
            Stage::Confirm => "confirm",
            Stage::Fix => "fix",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is happening, in plain numbers. Built from store queries only --
/// facts before explanations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Characterization {
    pub endpoint: String,
    /// True when other endpoints degraded too: points at infrastructure
    /// rather than a code change in this endpoint.
    pub all_endpoints_affected: bool,
    pub affected_user_ids: Vec<String>,
    pub regression_start: DateTime<Utc>,
    pub commit_sha: Option<String>,
    pub latency_before_ms: f64,
    pub latency_after_ms: f64,
    pub latency_multiplier: f64,
    pub query_count_before: f64,
    pub query_count_after: f64,
    pub query_multiplier: f64,
}

impl Characterization {
    /// One-line summary used for similarity lookup and notifications.
    pub fn summary(&self) -> String {
        format!(
            "{} latency {:.0}ms to {:.0}ms ({:.1}x), queries {:.0} to {:.0} ({:.1}x), {}",
            self.endpoint,
            self.latency_before_ms,
            self.latency_after_ms,
            self.latency_multiplier,
            self.query_count_before,
            self.query_count_after,
            self.query_multiplier,
            if self.all_endpoints_affected {
                "multiple endpoints affected"
            } else {
                "single endpoint affected"
            }
        )
    }
}

/// One candidate explanation, ranked 1 (most likely) to 3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hypothesis {
    pub rank: u32,
    pub title: String,
    pub description: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub supporting_signals: Vec<String>,
    #[serde(default)]
    pub evidence_needed: Vec<String>,
}

/// Evidence gathered for one hypothesis. Pure data retrieval, no reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub hypothesis_rank: u32,
    pub commit_diff: String,
    pub query_trend: String,
    #[serde(default)]
    pub extra: Vec<ExtraEvidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraEvidence {
    pub kind: String,
    pub detail: String,
}

/// The confirmed root cause. Sole producer of the confidence score that
/// gates every downstream action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmedCause {
    pub title: String,
    /// Always clamped to [0, 1] at parse time.
    pub confidence: f64,
    pub evidence_chain: Vec<String>,
    pub code_location: String,
    pub code_snippet: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Everything needed to open a fix PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixProposal {
    pub summary: String,
    pub original_code: String,
    pub fixed_code: String,
    pub explanation: String,
    pub risk_level: RiskLevel,
    pub risk_reasoning: String,
    #[serde(default)]
    pub side_effects: Vec<String>,
    pub rollback_instructions: String,
    #[serde(default)]
    pub verification_checklist: Vec<String>,
    pub pr_title: String,
    pub pr_body: String,
}

/// Append-only log of one incident's investigation. Each stage writes its
/// own field exactly once; nothing is ever rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationRecord {
    pub incident_id: Uuid,
    pub endpoint: String,
    pub started_at: DateTime<Utc>,
    pub characterization: Option<Characterization>,
    #[serde(default)]
    pub hypotheses: Vec<Hypothesis>,
    #[serde(default)]
    pub evidence: Vec<EvidenceBundle>,
    pub confirmed_cause: Option<ConfirmedCause>,
    pub proposed_fix: Option<FixProposal>,
    /// Set when a stage failed; terminal for the incident.
    pub failed_stage: Option<String>,
    pub failure_reason: Option<String>,
}

impl InvestigationRecord {
    pub fn new(incident_id: Uuid, endpoint: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            incident_id,
            endpoint: endpoint.to_string(),
            started_at,
            characterization: None,
            hypotheses: Vec::new(),
            evidence: Vec::new(),
            confirmed_cause: None,
            proposed_fix: None,
            failed_stage: None,
            failure_reason: None,
        }
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confirmed_cause.as_ref().map(|c| c.confidence)
    }
}
