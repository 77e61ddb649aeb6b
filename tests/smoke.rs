//! Smoke tests: storage opens on disk, migrations hold up across reopen,
//! and archived samples survive a process restart.

use argus::ingest::Sample;
use argus::storage::{self, archive::ArchiveStore};
use chrono::{Duration, Utc};

fn sample(endpoint: &str, latency: f64) -> Sample {
    Sample {
        endpoint: endpoint.to_string(),
        timestamp: Utc::now(),
        method: "GET".to_string(),
        status: 200,
        latency_ms: latency,
        query_count: 3,
        db_time_ms: 1.0,
        user_id: Some("user-1".to_string()),
        commit_sha: Some("abc1234".to_string()),
    }
}

#[test]
fn archive_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("argus.db");
    let db_path = db_path.to_str().unwrap();

    {
        let pool = storage::open_pool(db_path).unwrap();
        let archive = ArchiveStore::new(pool);
        archive.append(&sample("/checkout", 120.0)).unwrap();
    }

    // Reopen: migrations are idempotent and the sample is still there
    let pool = storage::open_pool(db_path).unwrap();
    let archive = ArchiveStore::new(pool);
    let scanned = archive
        .scan(
            "/checkout",
            Utc::now() - Duration::hours(1),
            Utc::now() + Duration::seconds(1),
        )
        .unwrap();
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0].latency_ms, 120.0);
    assert_eq!(scanned[0].commit_sha.as_deref(), Some("abc1234"));
}

#[test]
fn config_defaults_match_documented_thresholds() {
    let config = argus::config::Config::load(None).unwrap();
    assert_eq!(config.detection.anomaly_threshold, 3.0);
    assert_eq!(config.detection.strike_threshold, 3);
    assert_eq!(config.detection.interval_secs, 10);
    assert_eq!(config.actions.auto_merge_confidence, 0.92);
    assert!(config.actions.propose_floor < config.actions.auto_merge_confidence);
}

#[test]
fn missing_config_file_falls_back_to_defaults() {
    let config =
        argus::config::Config::load(Some(std::path::Path::new("/nonexistent/argus.toml"))).unwrap();
    assert_eq!(config.detection.strike_threshold, 3);
}
