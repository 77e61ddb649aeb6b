//! Stage 3 of 5: gather concrete evidence for each hypothesis.
//!
//! Pure data retrieval, no reasoning call. Every hypothesis named what
//! would confirm it in `evidence_needed`; this stage goes and gets what it
//! can: the suspect commit's diff, the query-count trend, and extras keyed
//! on what each hypothesis asked for.

use crate::investigate::{EvidenceBundle, ExtraEvidence, Hypothesis};
use crate::storage::window::RecentWindowStore;
use tracing::info;

/// Cap the diff we carry into prompts.
const MAX_DIFF_CHARS: usize = 3000;

pub fn gather_evidence(
    hypotheses: &[Hypothesis],
    endpoint: &str,
    commit_diff: Option<String>,
    window: &RecentWindowStore,
) -> Vec<EvidenceBundle> {
    let diff = match commit_diff {
        Some(diff) => truncate(&diff, MAX_DIFF_CHARS),
        None => "Commit diff not available".to_string(),
    };
    let trend_text = render_query_trend(window, endpoint);

    let bundles: Vec<EvidenceBundle> = hypotheses
        .iter()
        .map(|h| {
            let needed = h.evidence_needed.join(" ").to_lowercase();
            let mut extra = Vec::new();

            if needed.contains("query") || needed.contains("n+1") || needed.contains("loop") {
                extra.push(ExtraEvidence {
                    kind: "query_count_analysis".to_string(),
                    detail: analyze_query_jump(window, endpoint),
                });
            }
            if needed.contains("index") {
                extra.push(ExtraEvidence {
                    kind: "query_execution".to_string(),
                    detail: "No execution plans captured; compare db time per request \
                             against query count instead"
                        .to_string(),
                });
            }

            EvidenceBundle {
                hypothesis_rank: h.rank,
                commit_diff: diff.clone(),
                query_trend: trend_text.clone(),
                extra,
            }
        })
        .collect();

    info!(
        endpoint,
        hypotheses = bundles.len(),
        "Evidence gathered"
    );
    bundles
}

/// Render query counts per minute as a small text chart for the prompt.
fn render_query_trend(window: &RecentWindowStore, endpoint: &str) -> String {
    let trend = window.minute_trend(endpoint);
    if trend.is_empty() {
        return "No query data available".to_string();
    }

    let mut lines = vec!["DB query count per minute (most recent last):".to_string()];
    for point in trend.iter().rev().take(10).rev() {
        let bar_len = ((point.mean_queries / 5.0) as usize).min(40);
        lines.push(format!(
            "  {} | {} {:.0} queries/req",
            point.minute.format("%H:%M"),
            "#".repeat(bar_len.max(1)),
            point.mean_queries
        ));
    }
    lines.join("\n")
}

/// Compare recent minutes against older ones. A large jump proportional to
/// data size is the N+1 signature.
fn analyze_query_jump(window: &RecentWindowStore, endpoint: &str) -> String {
    let trend = window.minute_trend(endpoint);
    if trend.len() < 2 {
        return "Insufficient data for query trend analysis".to_string();
    }

    let split = trend.len().saturating_sub(3);
    let (older, recent) = trend.split_at(split.max(1));
    let recent_avg =
        recent.iter().map(|p| p.mean_queries).sum::<f64>() / recent.len() as f64;
    let older_avg = older.iter().map(|p| p.mean_queries).sum::<f64>() / older.len() as f64;

    if older_avg <= 0.0 {
        return format!("Query count currently {recent_avg:.0}/req, no earlier traffic to compare");
    }

    let jump = recent_avg / older_avg;
    format!(
        "Query count jumped {:.1}x | before: {:.0}/req, after: {:.0}/req | pattern: {}",
        jump,
        older_avg,
        recent_avg,
        if jump > 10.0 {
            "consistent with N+1 (proportional to data size)"
        } else {
            "moderate increase"
        }
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
