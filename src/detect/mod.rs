//! Regression detection -- strike state machine and incident records.

pub mod detector;
pub mod incident;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which signal tripped the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMetric {
    Latency,
    QueryCount,
}

impl TriggerMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMetric::Latency => "latency",
            TriggerMetric::QueryCount => "query_count",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "query_count" => TriggerMetric::QueryCount,
            _ => TriggerMetric::Latency,
        }
    }
}

impl std::fmt::Display for TriggerMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
    Dismissed,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "investigating" => IncidentStatus::Investigating,
            "resolved" => IncidentStatus::Resolved,
            "dismissed" => IncidentStatus::Dismissed,
            _ => IncidentStatus::Open,
        }
    }

    /// Open and investigating incidents block new ones on the same endpoint.
    pub fn is_active(&self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Investigating)
    }
}

/// A confirmed regression awaiting or undergoing investigation.
///
/// Emitted exactly once by the detector when an endpoint reaches the strike
/// threshold; owned by the orchestrator from then on. Carries everything
/// the investigation needs to start without re-querying the stores.
#[derive(Debug, Clone, Serialize)]
pub struct Incident {
    pub id: Uuid,
    pub endpoint: String,
    pub opened_at: DateTime<Utc>,
    pub trigger_metric: TriggerMetric,
    pub anomaly_score: f64,
    pub status: IncidentStatus,
    pub latency_before_ms: f64,
    pub latency_after_ms: f64,
    pub query_count_before: f64,
    pub query_count_after: f64,
    pub commit_sha: Option<String>,
    pub affected_user_ids: Vec<String>,
}
