//! Incident persistence.
//!
//! The detector writes each incident once at open; after that only the
//! orchestrator moves it through its lifecycle. The active-incident check
//! here also covers incidents left open by a previous process, so a
//! restart cannot open a duplicate for an endpoint mid-investigation.

use crate::detect::{Incident, IncidentStatus, TriggerMetric};
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

#[derive(Clone)]
pub struct IncidentManager {
    pool: Pool,
}

impl IncidentManager {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn open(&self, incident: &Incident) -> Result<()> {
        let conn = self.pool.get()?;
        let users_json = serde_json::to_string(&incident.affected_user_ids)?;
        conn.execute(
            "INSERT INTO incidents
                (id, endpoint, opened_at, trigger_metric, anomaly_score, status,
                 latency_before_ms, latency_after_ms, query_count_before, query_count_after,
                 commit_sha, affected_users_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                incident.id.to_string(),
                incident.endpoint,
                incident.opened_at.to_rfc3339(),
                incident.trigger_metric.as_str(),
                incident.anomaly_score,
                incident.status.as_str(),
                incident.latency_before_ms,
                incident.latency_after_ms,
                incident.query_count_before,
                incident.query_count_after,
                incident.commit_sha,
                users_json,
            ],
        )
        .context("Failed to persist incident")?;
        Ok(())
    }

    /// Whether an active (open or investigating) incident exists for the
    /// endpoint. Enforces at-most-one-active across process restarts.
    pub fn has_active(&self, endpoint: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM incidents
             WHERE endpoint = ?1 AND status IN ('open', 'investigating')",
            params![endpoint],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn set_status(
        &self,
        id: Uuid,
        status: IncidentStatus,
        close_reason: Option<&str>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE incidents
             SET status = ?2, close_reason = COALESCE(?3, close_reason), updated_at = ?4
             WHERE id = ?1",
            params![
                id.to_string(),
                status.as_str(),
                close_reason,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Incident {id} not found");
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{SELECT_INCIDENT} WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id.to_string()], row_to_incident)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<Incident>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{SELECT_INCIDENT} ORDER BY opened_at DESC LIMIT ?1"))?;
        let rows = stmt.query_map(params![limit], row_to_incident)?;

        let mut incidents = Vec::new();
        for r in rows {
            incidents.push(r?);
        }
        Ok(incidents)
    }
}

const SELECT_INCIDENT: &str = "SELECT id, endpoint, opened_at, trigger_metric, anomaly_score, status,
        latency_before_ms, latency_after_ms, query_count_before, query_count_after,
        commit_sha, affected_users_json
 FROM incidents";

fn row_to_incident(row: &rusqlite::Row<'_>) -> std::result::Result<Incident, rusqlite::Error> {
    let id_str: String = row.get(0)?;
    let opened_str: String = row.get(2)?;
    let trigger_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    let users_json: String = row.get(11)?;

    Ok(Incident {
        id: Uuid::parse_str(&id_str).unwrap_or_default(),
        endpoint: row.get(1)?,
        opened_at: DateTime::parse_from_rfc3339(&opened_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
        trigger_metric: TriggerMetric::parse(&trigger_str),
        anomaly_score: row.get(4)?,
        status: IncidentStatus::parse(&status_str),
        latency_before_ms: row.get(6)?,
        latency_after_ms: row.get(7)?,
        query_count_before: row.get(8)?,
        query_count_after: row.get(9)?,
        commit_sha: row.get(10)?,
        affected_user_ids: serde_json::from_str(&users_json).unwrap_or_default(),
    })
}
