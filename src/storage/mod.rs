//! Storage layer -- SQLite pool, migrations, and the two sample tiers.
//!
//! Two tiers hold the same samples for different consumers:
//! the in-memory [`window::RecentWindowStore`] serves the detector's
//! trailing-window aggregates, and the durable [`archive::ArchiveStore`]
//! is the source of truth for baseline training. Incidents and the
//! knowledge base share the same SQLite database.

pub mod archive;
pub mod schema;
pub mod window;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
///
/// A migration failure here is fatal: running detection against a corrupt
/// archive would silently invalidate every baseline.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn).context("Schema migration failed -- refusing to start")?;

    Ok(pool)
}

/// Open a pooled in-memory database for tests. Capped at one connection so
/// every `pool.get()` sees the same in-memory database.
pub fn open_test_pool() -> Pool {
    let manager = SqliteConnectionManager::memory();
    let pool = R2D2Pool::builder().max_size(1).build(manager).unwrap();
    let conn = pool.get().unwrap();
    schema::migrate(&conn).unwrap();
    pool
}
