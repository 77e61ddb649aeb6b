//! Ingestion boundary -- sample schema and validation.
//!
//! One [`Sample`] is produced for every request the monitored application
//! serves. The collector endpoint validates it here and fans it out to the
//! recent window store and the archive. Validation failures are rejected
//! back to the producer and dropped; they never crash the pipeline.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing endpoint")]
    MissingEndpoint,
    #[error("timestamp {ts} is older than the retention window ({retention_secs}s)")]
    StaleTimestamp { ts: DateTime<Utc>, retention_secs: i64 },
    #[error("timestamp {ts} is too far in the future")]
    FutureTimestamp { ts: DateTime<Utc> },
    #[error("negative metric: {field}")]
    NegativeMetric { field: &'static str },
}

/// One observed request. Immutable once recorded: written exactly once by
/// ingestion, read many times by the detector and the investigation stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_method")]
    pub method: String,
    pub status: u16,
    pub latency_ms: f64,
    pub query_count: u32,
    #[serde(default)]
    pub db_time_ms: f64,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub commit_sha: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Sample {
    /// Validate a sample at the ingestion boundary.
    ///
    /// Rejects empty endpoints, timestamps already older than the retention
    /// window (they would be invisible to detection and immediately evicted),
    /// timestamps from the future, and negative metrics.
    pub fn validate(&self, now: DateTime<Utc>, retention_secs: i64) -> Result<(), IngestError> {
        if self.endpoint.trim().is_empty() {
            return Err(IngestError::MissingEndpoint);
        }
        if self.timestamp < now - Duration::seconds(retention_secs) {
            return Err(IngestError::StaleTimestamp {
                ts: self.timestamp,
                retention_secs,
            });
        }
        // Allow modest clock skew between producer and collector
        if self.timestamp > now + Duration::seconds(60) {
            return Err(IngestError::FutureTimestamp { ts: self.timestamp });
        }
        if self.latency_ms < 0.0 {
            return Err(IngestError::NegativeMetric { field: "latency_ms" });
        }
        if self.db_time_ms < 0.0 {
            return Err(IngestError::NegativeMetric { field: "db_time_ms" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(endpoint: &str, ts: DateTime<Utc>) -> Sample {
        Sample {
            endpoint: endpoint.to_string(),
            timestamp: ts,
            method: "GET".to_string(),
            status: 200,
            latency_ms: 12.5,
            query_count: 3,
            db_time_ms: 4.0,
            user_id: Some("user-1".to_string()),
            commit_sha: Some("abc1234".to_string()),
        }
    }

    #[test]
    fn test_valid_sample_passes() {
        let now = Utc::now();
        assert!(sample("/checkout", now).validate(now, 1800).is_ok());
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let now = Utc::now();
        let s = sample("  ", now);
        assert!(matches!(
            s.validate(now, 1800),
            Err(IngestError::MissingEndpoint)
        ));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let now = Utc::now();
        let s = sample("/checkout", now - Duration::seconds(3600));
        assert!(matches!(
            s.validate(now, 1800),
            Err(IngestError::StaleTimestamp { .. })
        ));
    }

    #[test]
    fn test_boundary_timestamp_accepted() {
        let now = Utc::now();
        // Exactly at the retention horizon is still inside the window
        let s = sample("/checkout", now - Duration::seconds(1800));
        assert!(s.validate(now, 1800).is_ok());
    }

    #[test]
    fn test_negative_latency_rejected() {
        let now = Utc::now();
        let mut s = sample("/checkout", now);
        s.latency_ms = -1.0;
        assert!(matches!(
            s.validate(now, 1800),
            Err(IngestError::NegativeMetric { field: "latency_ms" })
        ));
    }
}
