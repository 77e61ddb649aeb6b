//! Recent window store -- the live view of what is happening right now.
//!
//! Bounded-retention, append-only, in-memory. One deque per endpoint,
//! evicted from the front on every write, so memory stays bounded by
//! retention x peak ingest rate. The detector polls this constantly;
//! nothing here ever touches disk.

use crate::ingest::Sample;
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Live statistics over a trailing window. Only produced when at least one
/// sample is in the window -- callers must never mistake silence for zeros.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregate {
    pub mean_latency: f64,
    pub p95_latency: f64,
    pub mean_query_count: f64,
    pub count: usize,
}

/// One minute of query-count activity, for trend rendering in evidence.
#[derive(Debug, Clone, Serialize)]
pub struct MinutePoint {
    pub minute: DateTime<Utc>,
    pub mean_queries: f64,
    pub max_queries: u32,
    pub request_count: usize,
}

pub struct RecentWindowStore {
    retention: Duration,
    inner: RwLock<HashMap<String, VecDeque<Sample>>>,
}

impl RecentWindowStore {
    pub fn new(retention_secs: i64) -> Self {
        Self {
            retention: Duration::seconds(retention_secs),
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Append a sample. Eviction runs on every write, trimming anything
    /// older than the retention horizon from this endpoint's deque.
    pub fn record(&self, sample: Sample) {
        let horizon = sample.timestamp - self.retention;
        let mut inner = self.inner.write().expect("window store lock poisoned");
        let deque = inner.entry(sample.endpoint.clone()).or_default();
        deque.push_back(sample);
        while deque.front().is_some_and(|s| s.timestamp < horizon) {
            deque.pop_front();
        }
    }

    /// Drop everything older than the retention horizon, across all
    /// endpoints. Called on a fixed tick to bound endpoints that stopped
    /// receiving traffic.
    pub fn evict_older_than(&self, now: DateTime<Utc>) {
        let horizon = now - self.retention;
        let mut inner = self.inner.write().expect("window store lock poisoned");
        for deque in inner.values_mut() {
            while deque.front().is_some_and(|s| s.timestamp < horizon) {
                deque.pop_front();
            }
        }
        inner.retain(|_, deque| !deque.is_empty());
    }

    /// Statistics over the trailing window ending at `now`.
    ///
    /// Server errors (status >= 500) are excluded -- their latencies say
    /// more about error handling than endpoint performance. Returns `None`
    /// when no qualifying sample falls inside the window.
    pub fn aggregate(&self, endpoint: &str, window_secs: i64, now: DateTime<Utc>) -> Option<Aggregate> {
        let cutoff = now - Duration::seconds(window_secs);
        let inner = self.inner.read().expect("window store lock poisoned");
        let deque = inner.get(endpoint)?;

        // No order assumption: ingestion accepts anything inside retention,
        // so slightly out-of-order arrivals are possible
        let mut latencies = Vec::new();
        let mut query_sum = 0u64;
        for s in deque.iter() {
            if s.timestamp <= cutoff || s.timestamp > now || s.status >= 500 {
                continue;
            }
            latencies.push(s.latency_ms);
            query_sum += s.query_count as u64;
        }

        if latencies.is_empty() {
            return None;
        }

        let count = latencies.len();
        let mean_latency = latencies.iter().sum::<f64>() / count as f64;
        latencies.sort_by(|a, b| a.partial_cmp(b).expect("NaN latency"));
        Some(Aggregate {
            mean_latency,
            p95_latency: p95_nearest_rank(&latencies),
            mean_query_count: query_sum as f64 / count as f64,
            count,
        })
    }

    /// All endpoints with at least one sample still inside retention.
    pub fn endpoints(&self, now: DateTime<Utc>) -> Vec<String> {
        let horizon = now - self.retention;
        let inner = self.inner.read().expect("window store lock poisoned");
        let mut endpoints: Vec<String> = inner
            .iter()
            .filter(|(_, deque)| deque.back().is_some_and(|s| s.timestamp >= horizon))
            .map(|(endpoint, _)| endpoint.clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Distinct commit SHAs seen on an endpoint, newest first by first
    /// appearance. A new SHA appearing means a deploy happened -- the
    /// head of this list is the suspect commit for a fresh regression.
    pub fn recent_commit_shas(&self, endpoint: &str) -> Vec<String> {
        let inner = self.inner.read().expect("window store lock poisoned");
        let Some(deque) = inner.get(endpoint) else {
            return Vec::new();
        };

        let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
        for s in deque.iter() {
            if let Some(sha) = s.commit_sha.as_deref() {
                first_seen.entry(sha).or_insert(s.timestamp);
            }
        }
        let mut shas: Vec<(&str, DateTime<Utc>)> = first_seen.into_iter().collect();
        shas.sort_by(|a, b| b.1.cmp(&a.1));
        shas.into_iter().map(|(sha, _)| sha.to_string()).collect()
    }

    /// Distinct user IDs that saw latency above the threshold since the
    /// given instant. Customer-level blast radius for the incident.
    pub fn affected_users(
        &self,
        endpoint: &str,
        since: DateTime<Utc>,
        latency_threshold_ms: f64,
    ) -> Vec<String> {
        let inner = self.inner.read().expect("window store lock poisoned");
        let Some(deque) = inner.get(endpoint) else {
            return Vec::new();
        };

        let mut seen = std::collections::HashSet::new();
        let mut users = Vec::new();
        for s in deque.iter() {
            if s.timestamp <= since || s.latency_ms <= latency_threshold_ms {
                continue;
            }
            if let Some(user) = s.user_id.as_deref() {
                if seen.insert(user.to_string()) {
                    users.push(user.to_string());
                }
            }
        }
        users
    }

    /// Query-count activity per minute over the whole retention window,
    /// oldest first. A sudden jump is the N+1 signature the investigation
    /// stages look for.
    pub fn minute_trend(&self, endpoint: &str) -> Vec<MinutePoint> {
        let inner = self.inner.read().expect("window store lock poisoned");
        let Some(deque) = inner.get(endpoint) else {
            return Vec::new();
        };

        let mut buckets: HashMap<DateTime<Utc>, (u64, u32, usize)> = HashMap::new();
        for s in deque.iter() {
            let minute = s
                .timestamp
                .duration_trunc(Duration::minutes(1))
                .unwrap_or(s.timestamp);
            let entry = buckets.entry(minute).or_insert((0, 0, 0));
            entry.0 += s.query_count as u64;
            entry.1 = entry.1.max(s.query_count);
            entry.2 += 1;
        }

        let mut points: Vec<MinutePoint> = buckets
            .into_iter()
            .map(|(minute, (sum, max, count))| MinutePoint {
                minute,
                mean_queries: sum as f64 / count as f64,
                max_queries: max,
                request_count: count,
            })
            .collect();
        points.sort_by_key(|p| p.minute);
        points
    }
}

/// P95 by the nearest-rank rule: `sorted[ceil(0.95 * n) - 1]`.
///
/// Nearest-rank (no interpolation) keeps the result reproducible across
/// recomputes and implementations. Input must be sorted ascending and
/// non-empty.
pub(crate) fn p95_nearest_rank(sorted: &[f64]) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = ((0.95 * sorted.len() as f64).ceil() as usize).max(1);
    sorted[rank - 1]
}
