//! Archive store -- durable, append-only history of every sample.
//!
//! The source of truth for baseline training. Write-once: there are no
//! update or delete paths. The baseline table is a derived cache of this
//! data and can always be rebuilt from here after a restart.

use crate::ingest::Sample;
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;

#[derive(Clone)]
pub struct ArchiveStore {
    pool: Pool,
}

impl ArchiveStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Durable append. Survives process restart; never lost once acked.
    pub fn append(&self, sample: &Sample) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO samples
                (endpoint, ts, method, status, latency_ms, query_count, db_time_ms, user_id, commit_sha)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                sample.endpoint,
                sample.timestamp.to_rfc3339(),
                sample.method,
                sample.status,
                sample.latency_ms,
                sample.query_count,
                sample.db_time_ms,
                sample.user_id,
                sample.commit_sha,
            ],
        )
        .context("Failed to append sample to archive")?;
        Ok(())
    }

    /// Samples for an endpoint in `[since, until)`, ordered by timestamp
    /// ascending. Range scans ride the `(endpoint, ts)` index.
    pub fn scan(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Sample>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT endpoint, ts, method, status, latency_ms, query_count, db_time_ms, user_id, commit_sha
             FROM samples
             WHERE endpoint = ?1 AND ts >= ?2 AND ts < ?3
             ORDER BY ts ASC",
        )?;

        let rows = stmt.query_map(
            params![endpoint, since.to_rfc3339(), until.to_rfc3339()],
            |row| {
                let ts_str: String = row.get(1)?;
                Ok((
                    row.get::<_, String>(0)?,
                    ts_str,
                    row.get::<_, String>(2)?,
                    row.get::<_, u16>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, u32>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            },
        )?;

        let mut samples = Vec::new();
        for r in rows {
            let (endpoint, ts_str, method, status, latency_ms, query_count, db_time_ms, user_id, commit_sha) = r?;
            let timestamp = DateTime::parse_from_rfc3339(&ts_str)
                .with_context(|| format!("Corrupt timestamp in archive: {ts_str}"))?
                .with_timezone(&Utc);
            samples.push(Sample {
                endpoint,
                timestamp,
                method,
                status,
                latency_ms,
                query_count,
                db_time_ms,
                user_id,
                commit_sha,
            });
        }
        Ok(samples)
    }

    /// Distinct endpoints with any archived sample since the given instant.
    /// Drives the per-endpoint baseline recompute.
    pub fn endpoints_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT endpoint FROM samples WHERE ts >= ?1 ORDER BY endpoint",
        )?;
        let rows = stmt.query_map(params![since.to_rfc3339()], |row| row.get::<_, String>(0))?;

        let mut endpoints = Vec::new();
        for r in rows {
            endpoints.push(r?);
        }
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_test_pool;
    use chrono::Duration;

    fn sample(endpoint: &str, ts: DateTime<Utc>, latency: f64) -> Sample {
        Sample {
            endpoint: endpoint.to_string(),
            timestamp: ts,
            method: "GET".to_string(),
            status: 200,
            latency_ms: latency,
            query_count: 2,
            db_time_ms: 1.0,
            user_id: None,
            commit_sha: Some("abc1234".to_string()),
        }
    }

    #[test]
    fn test_append_then_scan_ordered_ascending() {
        let archive = ArchiveStore::new(open_test_pool());
        let now = Utc::now();

        // Insert out of order; scan must come back ascending
        archive.append(&sample("/checkout", now - Duration::minutes(1), 20.0)).unwrap();
        archive.append(&sample("/checkout", now - Duration::minutes(5), 10.0)).unwrap();
        archive.append(&sample("/products", now - Duration::minutes(2), 99.0)).unwrap();

        let scanned = archive
            .scan("/checkout", now - Duration::hours(1), now)
            .unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(scanned[0].timestamp < scanned[1].timestamp);
        assert_eq!(scanned[0].latency_ms, 10.0);
    }

    #[test]
    fn test_scan_range_is_half_open() {
        let archive = ArchiveStore::new(open_test_pool());
        let now = Utc::now();
        archive.append(&sample("/checkout", now, 10.0)).unwrap();

        let hit = archive.scan("/checkout", now, now + Duration::seconds(1)).unwrap();
        assert_eq!(hit.len(), 1);
        let miss = archive.scan("/checkout", now - Duration::hours(1), now).unwrap();
        assert!(miss.is_empty());
    }

    #[test]
    fn test_endpoints_since() {
        let archive = ArchiveStore::new(open_test_pool());
        let now = Utc::now();
        archive.append(&sample("/checkout", now, 10.0)).unwrap();
        archive.append(&sample("/products", now - Duration::days(10), 10.0)).unwrap();

        let recent = archive.endpoints_since(now - Duration::days(7)).unwrap();
        assert_eq!(recent, vec!["/checkout"]);
    }
}
