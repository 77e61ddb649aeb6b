//! The watchdog. Polls every few seconds, scores current behavior against
//! the time-aware baseline, and applies the strikes rule per endpoint:
//! one slow reading could be a fluke, three consecutive slow readings is a
//! regression. A single clean reading clears the slate -- false negatives
//! are preferred over alert noise.

use crate::baseline::BaselineEngine;
use crate::config::DetectionConfig;
use crate::detect::incident::IncidentManager;
use crate::detect::{Incident, IncidentStatus, TriggerMetric};
use crate::storage::window::RecentWindowStore;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Per-endpoint strike state. Volatile: lives only for this process's
/// lifetime and resets to zero on restart.
#[derive(Debug, Default)]
struct EndpointState {
    strikes: u32,
    last_checked_at: Option<DateTime<Utc>>,
    /// Set while an incident for this endpoint is open or investigating.
    /// Further anomalous readings are coalesced until it clears.
    active_incident: Option<Uuid>,
}

/// Health of the poll loop, exposed on the operational surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollHealth {
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_poll_ok: bool,
}

pub struct RegressionDetector {
    window: Arc<RecentWindowStore>,
    baseline: Arc<BaselineEngine>,
    incidents: IncidentManager,
    config: DetectionConfig,
    /// One mutex per endpoint so unrelated endpoints never serialize on
    /// each other; the outer lock only guards map membership.
    states: RwLock<HashMap<String, Arc<Mutex<EndpointState>>>>,
    tx: mpsc::Sender<Incident>,
    health: Mutex<PollHealth>,
}

impl RegressionDetector {
    pub fn new(
        window: Arc<RecentWindowStore>,
        baseline: Arc<BaselineEngine>,
        incidents: IncidentManager,
        config: DetectionConfig,
        tx: mpsc::Sender<Incident>,
    ) -> Self {
        Self {
            window,
            baseline,
            incidents,
            config,
            states: RwLock::new(HashMap::new()),
            tx,
            health: Mutex::new(PollHealth::default()),
        }
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.config.interval_secs
    }

    pub fn health(&self) -> PollHealth {
        self.health.lock().expect("health lock poisoned").clone()
    }

    /// Called after verification confirms recovery (or an incident closes).
    /// Re-enables detection for the endpoint.
    pub fn mark_resolved(&self, endpoint: &str) {
        let state = self.state_for(endpoint);
        let mut state = state.lock().expect("endpoint state lock poisoned");
        state.active_incident = None;
        state.strikes = 0;
        info!(%endpoint, "Detection re-enabled");
    }

    /// One detection pass over every endpoint with recent traffic.
    pub fn poll_once(&self, now: DateTime<Utc>) -> Result<()> {
        let result = self.poll_inner(now);
        let mut health = self.health.lock().expect("health lock poisoned");
        health.last_poll_at = Some(now);
        health.last_poll_ok = result.is_ok();
        result
    }

    fn poll_inner(&self, now: DateTime<Utc>) -> Result<()> {
        for endpoint in self.window.endpoints(now) {
            let state = self.state_for(&endpoint);
            let mut state = state.lock().expect("endpoint state lock poisoned");

            // Coalesce while an investigation is running for this endpoint
            if state.active_incident.is_some() {
                continue;
            }
            // Ticks are strictly in wall-clock order per endpoint; drop
            // anything that would arrive out of order
            if state.last_checked_at.is_some_and(|prev| now < prev) {
                continue;
            }
            self.check_endpoint(&endpoint, &mut state, now)?;
            state.last_checked_at = Some(now);
        }
        Ok(())
    }

    fn state_for(&self, endpoint: &str) -> Arc<Mutex<EndpointState>> {
        if let Some(state) = self
            .states
            .read()
            .expect("states lock poisoned")
            .get(endpoint)
        {
            return state.clone();
        }
        let mut states = self.states.write().expect("states lock poisoned");
        states.entry(endpoint.to_string()).or_default().clone()
    }

    /// Score one endpoint and advance its strike machine.
    fn check_endpoint(
        &self,
        endpoint: &str,
        state: &mut EndpointState,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // No data in the short window: leave the strike count untouched.
        // Silence is not evidence, in either direction.
        let Some(current) = self
            .window
            .aggregate(endpoint, self.config.short_window_secs, now)
        else {
            return Ok(());
        };

        // Cold baseline slot: skip scoring this tick entirely
        let Some(slot) = self.baseline.lookup(endpoint, now) else {
            return Ok(());
        };
        if slot.mean_latency <= 0.0 {
            return Ok(());
        }

        let latency_score = current.mean_latency / slot.mean_latency;
        let query_score = if slot.mean_query_count > 0.0 {
            current.mean_query_count / slot.mean_query_count
        } else {
            0.0
        };

        let anomalous = latency_score >= self.config.anomaly_threshold
            || query_score >= self.config.anomaly_threshold;

        if !anomalous {
            // One clean reading clears the slate, regardless of prior count
            if state.strikes > 0 {
                info!(%endpoint, "Back to normal, strikes reset");
            }
            state.strikes = 0;
            return Ok(());
        }

        state.strikes += 1;
        warn!(
            %endpoint,
            latency_score = format_args!("{latency_score:.2}"),
            query_score = format_args!("{query_score:.2}"),
            strike = state.strikes,
            threshold = self.config.strike_threshold,
            "Anomalous reading"
        );

        if state.strikes < self.config.strike_threshold {
            return Ok(());
        }
        state.strikes = 0;

        // Belt and braces: an incident left active by a previous process
        // also blocks a new one for this endpoint.
        if self.incidents.has_active(endpoint)? {
            warn!(%endpoint, "Incident already active, coalescing");
            state.active_incident = Some(Uuid::nil());
            return Ok(());
        }

        // Both signals tripped: record whichever is worse
        let (trigger_metric, anomaly_score) = if query_score > latency_score {
            (TriggerMetric::QueryCount, query_score)
        } else {
            (TriggerMetric::Latency, latency_score)
        };

        let mut affected_users = self.window.affected_users(
            endpoint,
            now - Duration::minutes(5),
            slot.mean_latency * 2.0,
        );
        affected_users.truncate(50); // cap for prompt size downstream

        let incident = Incident {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            opened_at: now,
            trigger_metric,
            anomaly_score,
            status: IncidentStatus::Open,
            latency_before_ms: slot.mean_latency,
            latency_after_ms: current.mean_latency,
            query_count_before: slot.mean_query_count,
            query_count_after: current.mean_query_count,
            commit_sha: self.window.recent_commit_shas(endpoint).into_iter().next(),
            affected_user_ids: affected_users,
        };

        error!(
            %endpoint,
            incident_id = %incident.id,
            trigger = %trigger_metric,
            score = format_args!("{anomaly_score:.2}"),
            latency_before = format_args!("{:.1}ms", incident.latency_before_ms),
            latency_after = format_args!("{:.1}ms", incident.latency_after_ms),
            "REGRESSION CONFIRMED"
        );

        self.incidents.open(&incident)?;
        state.active_incident = Some(incident.id);

        // Hand off to the investigation workers. A full queue means
        // investigations are badly backed up; drop and log rather than
        // block the poll loop.
        if let Err(e) = self.tx.try_send(incident) {
            error!(%endpoint, "Failed to hand off incident: {e}");
        }
        Ok(())
    }
}

/// Main detection loop. Polls on a fixed interval until shutdown; an
/// in-flight pass always finishes before the loop exits.
pub async fn run_detector_loop(
    detector: Arc<RegressionDetector>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval_secs = detector.poll_interval_secs();
    info!(interval_secs, "Regression detector started");

    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();
                if let Err(e) = detector.poll_once(now) {
                    // Recovered locally: skip this tick, retry next tick
                    error!("Detection poll failed: {e:#}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Regression detector stopping");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Sample;
    use crate::storage::archive::ArchiveStore;
    use crate::storage::open_test_pool;
    use chrono::TimeZone;

    fn sample(endpoint: &str, ts: DateTime<Utc>, latency: f64, queries: u32) -> Sample {
        Sample {
            endpoint: endpoint.to_string(),
            timestamp: ts,
            method: "GET".to_string(),
            status: 200,
            latency_ms: latency,
            query_count: queries,
            db_time_ms: 0.0,
            user_id: Some("u1".to_string()),
            commit_sha: Some("abc1234".to_string()),
        }
    }

    /// Detector wired against a baseline of 120ms / 3 queries for the
    /// (Tue, 14:00) slot of "/checkout".
    struct Fixture {
        detector: RegressionDetector,
        window: Arc<RecentWindowStore>,
        incidents: IncidentManager,
        rx: mpsc::Receiver<Incident>,
        now: DateTime<Utc>,
    }

    fn fixture() -> Fixture {
        let pool = open_test_pool();
        let window = Arc::new(RecentWindowStore::new(1800));
        let archive = ArchiveStore::new(pool.clone());
        let baseline = Arc::new(BaselineEngine::new(archive.clone(), 7, 5));

        // Tuesday 14:05 UTC. Seed the 14:00 and 15:00 Tuesday slots so
        // ticks that drift into the next hour still find a baseline.
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 14, 5, 0).unwrap();
        for hour in [14, 15] {
            let slot_time = Utc.with_ymd_and_hms(2025, 6, 10, hour, 3, 0).unwrap();
            for i in 0..10 {
                archive
                    .append(&sample("/checkout", slot_time + Duration::seconds(i), 120.0, 3))
                    .unwrap();
            }
        }
        baseline.recompute(now + Duration::hours(2)).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let incidents = IncidentManager::new(pool);
        let detector = RegressionDetector::new(
            window.clone(),
            baseline,
            incidents.clone(),
            DetectionConfig::default(),
            tx,
        );
        Fixture {
            detector,
            window,
            incidents,
            rx,
            now,
        }
    }

    fn feed(window: &RecentWindowStore, now: DateTime<Utc>, latency: f64) {
        window.record(sample("/checkout", now, latency, 3));
    }

    #[test]
    fn test_three_strikes_opens_exactly_one_incident() {
        let mut f = fixture();

        // Three consecutive anomalous polls at 450ms (score 3.75 >= 3.0)
        for tick in 0..3 {
            let at = f.now + Duration::seconds(10 * tick);
            feed(&f.window, at, 450.0);
            f.detector.poll_once(at).unwrap();
        }

        let incident = f.rx.try_recv().expect("incident after third strike");
        assert_eq!(incident.endpoint, "/checkout");
        assert_eq!(incident.trigger_metric, TriggerMetric::Latency);
        assert!((incident.anomaly_score - 3.75).abs() < 0.01);
        assert!((incident.latency_before_ms - 120.0).abs() < 1e-9);
        assert_eq!(incident.commit_sha.as_deref(), Some("abc1234"));

        // And exactly one
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_incident_waits_for_third_strike() {
        let mut f = fixture();
        for tick in 0..2 {
            let at = f.now + Duration::seconds(10 * tick);
            feed(&f.window, at, 450.0);
            f.detector.poll_once(at).unwrap();
        }
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_clean_reading_resets_strikes() {
        let mut f = fixture();

        // Two anomalous, one normal, two anomalous: never confirms
        let readings = [450.0, 450.0, 120.0, 450.0, 450.0];
        for (tick, latency) in readings.iter().enumerate() {
            let at = f.now + Duration::seconds(10 * tick as i64);
            // Make the short window contain only this reading
            f.window.evict_older_than(at + Duration::seconds(3600));
            feed(&f.window, at, *latency);
            f.detector.poll_once(at).unwrap();
        }
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_no_data_is_not_a_strike_or_reset() {
        let mut f = fixture();

        feed(&f.window, f.now, 450.0);
        f.detector.poll_once(f.now).unwrap();
        feed(&f.window, f.now + Duration::seconds(10), 450.0);
        f.detector.poll_once(f.now + Duration::seconds(10)).unwrap();

        // A tick with no data in the window: strikes survive
        let gap = f.now + Duration::hours(1);
        f.detector.poll_once(gap).unwrap();

        // Third anomalous reading confirms (strike count was preserved).
        // The old readings are stale by now; feed a fresh one.
        let at = gap + Duration::seconds(10);
        feed(&f.window, at, 450.0);
        f.detector.poll_once(at).unwrap();

        assert!(f.rx.try_recv().is_ok());
    }

    #[test]
    fn test_active_incident_coalesces_further_firing() {
        let mut f = fixture();

        for tick in 0..6 {
            let at = f.now + Duration::seconds(10 * tick);
            feed(&f.window, at, 450.0);
            f.detector.poll_once(at).unwrap();
        }

        // Six anomalous ticks produced exactly one incident
        let first = f.rx.try_recv().unwrap();
        assert!(f.rx.try_recv().is_err());

        // Close the incident the way the orchestrator does, then re-enable
        f.incidents
            .set_status(first.id, IncidentStatus::Resolved, None)
            .unwrap();
        f.detector.mark_resolved("/checkout");
        for tick in 6..9 {
            let at = f.now + Duration::seconds(10 * tick);
            feed(&f.window, at, 450.0);
            f.detector.poll_once(at).unwrap();
        }
        assert!(f.rx.try_recv().is_ok());
    }

    #[test]
    fn test_cold_baseline_skips_scoring() {
        let mut f = fixture();

        // "/products" has traffic but no baseline slot
        for tick in 0..5 {
            let at = f.now + Duration::seconds(10 * tick);
            f.window.record(sample("/products", at, 9999.0, 50));
            f.detector.poll_once(at).unwrap();
        }
        assert!(f.rx.try_recv().is_err());
    }

    #[test]
    fn test_query_count_trigger_wins_when_worse() {
        let mut f = fixture();

        // Latency 3.75x, queries 10x: query_count should be recorded
        for tick in 0..3 {
            let at = f.now + Duration::seconds(10 * tick);
            f.window.record(sample("/checkout", at, 450.0, 30));
            f.detector.poll_once(at).unwrap();
        }

        let incident = f.rx.try_recv().unwrap();
        assert_eq!(incident.trigger_metric, TriggerMetric::QueryCount);
        assert!((incident.anomaly_score - 10.0).abs() < 0.01);
    }

    #[test]
    fn test_poll_health_updated() {
        let f = fixture();
        assert!(f.detector.health().last_poll_at.is_none());
        f.detector.poll_once(f.now).unwrap();
        let health = f.detector.health();
        assert_eq!(health.last_poll_at, Some(f.now));
        assert!(health.last_poll_ok);
    }
}
