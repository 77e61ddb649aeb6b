//! Time-aware baselines -- what "normal" looks like per endpoint.
//!
//! 2pm Tuesday has a different normal than 2am Sunday, so slots are keyed
//! by (endpoint, hour-of-day, day-of-week), derived in UTC. The whole slot
//! table is recomputed wholesale from the archive on a schedule and swapped
//! atomically; it is never mutated incrementally, so a partial recompute
//! can never drift from a full one. Readers hold an `Arc` to a consistent
//! snapshot for as long as they need it.

use crate::storage::archive::ArchiveStore;
use crate::storage::window::p95_nearest_rank;
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Expected performance for one (endpoint, hour, weekday) slot.
///
/// A slot is only ever stored with `sample_count > 0`; "cold" slots simply
/// do not exist in the table, and lookups miss instead of returning zeros.
#[derive(Debug, Clone, Serialize)]
pub struct BaselineSlot {
    pub mean_latency: f64,
    pub p95_latency: f64,
    pub stddev_latency: f64,
    pub mean_query_count: f64,
    pub sample_count: usize,
}

/// Immutable snapshot of every slot, replaced wholesale on recompute.
pub struct BaselineTable {
    /// Keyed by (endpoint, hour_of_day 0-23, weekday 0=Monday..6=Sunday).
    slots: HashMap<(String, u8, u8), BaselineSlot>,
    pub computed_at: DateTime<Utc>,
}

impl BaselineTable {
    pub fn lookup(&self, endpoint: &str, at: DateTime<Utc>) -> Option<&BaselineSlot> {
        let key = (
            endpoint.to_string(),
            at.hour() as u8,
            at.weekday().num_days_from_monday() as u8,
        );
        self.slots.get(&key)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

pub struct BaselineEngine {
    archive: ArchiveStore,
    history_days: i64,
    min_slot_samples: usize,
    current: RwLock<Option<Arc<BaselineTable>>>,
}

impl BaselineEngine {
    pub fn new(archive: ArchiveStore, history_days: i64, min_slot_samples: usize) -> Self {
        Self {
            archive,
            history_days,
            min_slot_samples,
            current: RwLock::new(None),
        }
    }

    /// Recompute every endpoint's slot table from the trailing archive
    /// history and swap it in atomically.
    ///
    /// Idempotent: the same archive state always yields the same slots.
    /// Readers see either the previous snapshot or the new one, never a
    /// half-updated mix.
    pub fn recompute(&self, now: DateTime<Utc>) -> Result<usize> {
        let since = now - Duration::days(self.history_days);
        let endpoints = self.archive.endpoints_since(since)?;

        let mut slots = HashMap::new();
        for endpoint in &endpoints {
            let samples = self.archive.scan(endpoint, since, now)?;

            // Group by (hour, weekday) in UTC
            let mut groups: HashMap<(u8, u8), (Vec<f64>, u64)> = HashMap::new();
            for s in &samples {
                if s.status >= 500 {
                    continue;
                }
                let key = (
                    s.timestamp.hour() as u8,
                    s.timestamp.weekday().num_days_from_monday() as u8,
                );
                let entry = groups.entry(key).or_default();
                entry.0.push(s.latency_ms);
                entry.1 += s.query_count as u64;
            }

            for ((hour, weekday), (mut latencies, query_sum)) in groups {
                if latencies.len() < self.min_slot_samples {
                    continue;
                }
                let count = latencies.len();
                let mean = latencies.iter().sum::<f64>() / count as f64;
                let variance = latencies
                    .iter()
                    .map(|v| (v - mean) * (v - mean))
                    .sum::<f64>()
                    / (count - 1) as f64;
                latencies.sort_by(|a, b| a.partial_cmp(b).expect("NaN latency"));

                slots.insert(
                    (endpoint.clone(), hour, weekday),
                    BaselineSlot {
                        mean_latency: mean,
                        p95_latency: p95_nearest_rank(&latencies),
                        stddev_latency: variance.sqrt(),
                        mean_query_count: query_sum as f64 / count as f64,
                        sample_count: count,
                    },
                );
            }
        }

        let slot_count = slots.len();
        if slot_count == 0 {
            warn!("Baseline recompute produced no slots -- not enough archive history yet");
        }
        let table = Arc::new(BaselineTable {
            slots,
            computed_at: now,
        });
        *self.current.write().expect("baseline lock poisoned") = Some(table);

        info!(
            endpoints = endpoints.len(),
            slots = slot_count,
            "Baseline table recomputed"
        );
        Ok(slot_count)
    }

    /// The current snapshot, if a recompute has ever completed.
    pub fn snapshot(&self) -> Option<Arc<BaselineTable>> {
        self.current.read().expect("baseline lock poisoned").clone()
    }

    /// Expected performance for an endpoint at a given instant.
    /// `None` means insufficient data -- the caller must skip scoring, not
    /// assume a zero baseline.
    pub fn lookup(&self, endpoint: &str, at: DateTime<Utc>) -> Option<BaselineSlot> {
        self.snapshot()?.lookup(endpoint, at).cloned()
    }

    /// Age of the current snapshot, for the health surface. `None` when no
    /// recompute has completed yet.
    pub fn staleness(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.snapshot().map(|t| now - t.computed_at)
    }
}
