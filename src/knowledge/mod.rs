//! Incident knowledge base -- what the system has learned so far.
//!
//! Every finished investigation is archived here together with its
//! real-world outcome. Future investigations retrieve similar past
//! incidents to reason from: the first incident of a kind starts from
//! scratch, the second one starts from a match.

use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;
use std::collections::HashSet;

/// A past investigation record plus its outcome. Read-only after creation.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeEntry {
    pub incident_id: String,
    pub endpoint: String,
    pub root_cause: Option<String>,
    /// Free-text characterization used for similarity lookup.
    pub characterization: String,
    pub confidence: Option<f64>,
    pub record_json: serde_json::Value,
    pub action_taken: String,
    pub action_succeeded: Option<bool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct KnowledgeBase {
    pool: Pool,
}

impl KnowledgeBase {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn store(&self, entry: &KnowledgeEntry) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO knowledge_entries
                (incident_id, endpoint, root_cause, characterization, confidence,
                 record_json, action_taken, action_succeeded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.incident_id,
                entry.endpoint,
                entry.root_cause,
                entry.characterization,
                entry.confidence,
                serde_json::to_string(&entry.record_json)?,
                entry.action_taken,
                entry.action_succeeded,
                entry.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to archive knowledge entry")?;
        Ok(())
    }

    /// The most similar past entries for a characterization, descending by
    /// similarity with ties broken by recency (newest first).
    ///
    /// Scoring is cosine similarity over unique lowercase token sets --
    /// deterministic for identical inputs, no model involved. Entries with
    /// zero overlap are omitted.
    pub fn similar(&self, characterization: &str, top_k: usize) -> Result<Vec<KnowledgeEntry>> {
        let query_tokens = tokenize(characterization);
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f64, KnowledgeEntry)> = self
            .load_all()?
            .into_iter()
            .filter_map(|entry| {
                let mut text = entry.characterization.clone();
                if let Some(cause) = entry.root_cause.as_deref() {
                    text.push(' ');
                    text.push_str(cause);
                }
                let score = cosine(&query_tokens, &tokenize(&text));
                (score > 0.0).then_some((score, entry))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .expect("similarity is never NaN")
                .then_with(|| b.1.created_at.cmp(&a.1.created_at))
                .then_with(|| b.1.incident_id.cmp(&a.1.incident_id))
        });
        scored.truncate(top_k);
        Ok(scored.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Past entries for one endpoint, newest first. Investigation context:
    /// "last time this endpoint regressed, it was X".
    pub fn for_endpoint(&self, endpoint: &str, limit: usize) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "{SELECT_ENTRY} WHERE endpoint = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![endpoint, limit], row_to_entry)?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }

    fn load_all(&self) -> Result<Vec<KnowledgeEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{SELECT_ENTRY} ORDER BY created_at DESC, id DESC"))?;
        let rows = stmt.query_map([], row_to_entry)?;

        let mut entries = Vec::new();
        for r in rows {
            entries.push(r?);
        }
        Ok(entries)
    }
}

const SELECT_ENTRY: &str = "SELECT incident_id, endpoint, root_cause, characterization, confidence,
        record_json, action_taken, action_succeeded, created_at
 FROM knowledge_entries";

fn row_to_entry(row: &rusqlite::Row<'_>) -> std::result::Result<KnowledgeEntry, rusqlite::Error> {
    let record_str: String = row.get(5)?;
    let created_str: String = row.get(8)?;
    Ok(KnowledgeEntry {
        incident_id: row.get(0)?,
        endpoint: row.get(1)?,
        root_cause: row.get(2)?,
        characterization: row.get(3)?,
        confidence: row.get(4)?,
        record_json: serde_json::from_str(&record_str).unwrap_or(serde_json::Value::Null),
        action_taken: row.get(6)?,
        action_succeeded: row.get(7)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default(),
    })
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

fn cosine(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let overlap = a.intersection(b).count() as f64;
    overlap / ((a.len() as f64).sqrt() * (b.len() as f64).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_test_pool;
    use chrono::Duration;

    fn entry(incident_id: &str, characterization: &str, age_hours: i64) -> KnowledgeEntry {
        KnowledgeEntry {
            incident_id: incident_id.to_string(),
            endpoint: "/checkout".to_string(),
            root_cause: Some("N+1 query pattern".to_string()),
            characterization: characterization.to_string(),
            confidence: Some(0.95),
            record_json: serde_json::json!({"incident_id": incident_id}),
            action_taken: "auto_merged".to_string(),
            action_succeeded: Some(true),
            created_at: Utc::now() - Duration::hours(age_hours),
        }
    }

    #[test]
    fn test_store_and_retrieve_by_endpoint() {
        let kb = KnowledgeBase::new(open_test_pool());
        kb.store(&entry("inc-1", "latency spike on checkout", 2)).unwrap();
        kb.store(&entry("inc-2", "query explosion on checkout", 1)).unwrap();

        let entries = kb.for_endpoint("/checkout", 5).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].incident_id, "inc-2"); // newest first
        assert!(kb.for_endpoint("/products", 5).unwrap().is_empty());
    }

    #[test]
    fn test_similar_orders_by_overlap() {
        let kb = KnowledgeBase::new(open_test_pool());
        kb.store(&entry(
            "inc-1",
            "checkout latency multiplied after deploy, query count exploded",
            5,
        ))
        .unwrap();
        kb.store(&entry("inc-2", "memory usage climbing on products page", 3))
            .unwrap();

        let hits = kb
            .similar("checkout latency regression with query count explosion", 5)
            .unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].incident_id, "inc-1");
    }

    #[test]
    fn test_similar_is_deterministic_with_recency_tiebreak() {
        let kb = KnowledgeBase::new(open_test_pool());
        // Identical characterizations, different ages
        kb.store(&entry("inc-old", "slow endpoint latency spike", 10)).unwrap();
        kb.store(&entry("inc-new", "slow endpoint latency spike", 1)).unwrap();

        let first = kb.similar("endpoint latency spike", 2).unwrap();
        let second = kb.similar("endpoint latency spike", 2).unwrap();
        assert_eq!(first[0].incident_id, "inc-new");
        assert_eq!(
            first.iter().map(|e| e.incident_id.clone()).collect::<Vec<_>>(),
            second.iter().map(|e| e.incident_id.clone()).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn test_similar_omits_zero_overlap() {
        let kb = KnowledgeBase::new(open_test_pool());
        kb.store(&entry("inc-1", "memory leak in background worker", 1)).unwrap();

        let hits = kb.similar("checkout query explosion", 5).unwrap();
        assert!(hits.is_empty());
    }
}
