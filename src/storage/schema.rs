//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only archive of every ingested sample. Write-once: no
        -- UPDATE or DELETE paths exist anywhere in the codebase.
        CREATE TABLE IF NOT EXISTS samples (
            id INTEGER PRIMARY KEY,
            endpoint TEXT NOT NULL,
            ts TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'GET',
            status INTEGER NOT NULL,
            latency_ms REAL NOT NULL,
            query_count INTEGER NOT NULL,
            db_time_ms REAL NOT NULL DEFAULT 0,
            user_id TEXT,
            commit_sha TEXT
        );

        CREATE TABLE IF NOT EXISTS incidents (
            id TEXT PRIMARY KEY,
            endpoint TEXT NOT NULL,
            opened_at TEXT NOT NULL,
            trigger_metric TEXT NOT NULL,
            anomaly_score REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'open',
            latency_before_ms REAL NOT NULL,
            latency_after_ms REAL NOT NULL,
            query_count_before REAL NOT NULL,
            query_count_after REAL NOT NULL,
            commit_sha TEXT,
            affected_users_json TEXT NOT NULL DEFAULT '[]',
            close_reason TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Archived investigation records plus their real-world outcome.
        -- Read-only after creation; queried for similarity lookups.
        CREATE TABLE IF NOT EXISTS knowledge_entries (
            id INTEGER PRIMARY KEY,
            incident_id TEXT NOT NULL UNIQUE,
            endpoint TEXT NOT NULL,
            root_cause TEXT,
            characterization TEXT NOT NULL,
            confidence REAL,
            record_json TEXT NOT NULL,
            action_taken TEXT NOT NULL,
            action_succeeded INTEGER,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_samples_endpoint_ts ON samples(endpoint, ts);
        CREATE INDEX IF NOT EXISTS idx_incidents_endpoint ON incidents(endpoint);
        CREATE INDEX IF NOT EXISTS idx_incidents_opened ON incidents(opened_at);
        CREATE INDEX IF NOT EXISTS idx_knowledge_endpoint ON knowledge_entries(endpoint);",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM knowledge_entries", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }
}
