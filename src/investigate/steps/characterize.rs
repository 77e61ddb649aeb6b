//! Stage 1 of 5: characterize the regression.
//!
//! Pure data collection, no reasoning call. We want to know WHAT is
//! happening before asking why. The key question: is it just this endpoint
//! (likely a code change) or everything at once (likely infrastructure)?

use crate::detect::Incident;
use crate::investigate::Characterization;
use crate::storage::window::RecentWindowStore;
use chrono::{DateTime, Utc};
use tracing::info;

/// Readings this much above the endpoint's own recent norm count as
/// degraded when sizing the blast radius.
const BLAST_RADIUS_RATIO: f64 = 2.0;

pub fn characterize(
    incident: &Incident,
    window: &RecentWindowStore,
    now: DateTime<Utc>,
) -> Characterization {
    // Compare every other endpoint's short-window latency against its own
    // longer trailing norm. Other endpoints also degraded = the problem is
    // probably below this endpoint, not in it.
    let mut others_degraded = false;
    for other in window.endpoints(now) {
        if other == incident.endpoint {
            continue;
        }
        let Some(short) = window.aggregate(&other, 180, now) else {
            continue;
        };
        let Some(long) = window.aggregate(&other, 1200, now) else {
            continue;
        };
        if long.mean_latency > 0.0 && short.mean_latency / long.mean_latency > BLAST_RADIUS_RATIO {
            others_degraded = true;
            break;
        }
    }

    let latency_multiplier = if incident.latency_before_ms > 0.0 {
        incident.latency_after_ms / incident.latency_before_ms
    } else {
        1.0
    };
    let query_multiplier = if incident.query_count_before > 0.0 {
        incident.query_count_after / incident.query_count_before
    } else {
        1.0
    };

    let characterization = Characterization {
        endpoint: incident.endpoint.clone(),
        all_endpoints_affected: others_degraded,
        affected_user_ids: incident.affected_user_ids.clone(),
        regression_start: incident.opened_at,
        commit_sha: incident.commit_sha.clone(),
        latency_before_ms: incident.latency_before_ms,
        latency_after_ms: incident.latency_after_ms,
        latency_multiplier: round1(latency_multiplier),
        query_count_before: incident.query_count_before,
        query_count_after: incident.query_count_after,
        query_multiplier: round1(query_multiplier),
    };

    info!(
        endpoint = %characterization.endpoint,
        latency = format_args!(
            "{:.1}ms -> {:.1}ms ({}x)",
            characterization.latency_before_ms,
            characterization.latency_after_ms,
            characterization.latency_multiplier
        ),
        queries = format_args!(
            "{:.0} -> {:.0} ({}x)",
            characterization.query_count_before,
            characterization.query_count_after,
            characterization.query_multiplier
        ),
        all_endpoints_affected = characterization.all_endpoints_affected,
        "Characterization complete"
    );

    characterization
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
