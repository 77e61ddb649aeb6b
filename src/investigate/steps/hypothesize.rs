//! Stage 2 of 5: generate ranked hypotheses. First reasoning call.
//!
//! Context: the characterization (what changed) plus similar past
//! incidents from the knowledge base (has this happened before?).
//! Output contract: exactly 3 hypotheses, ranked 1..3.

use crate::investigate::{Characterization, Hypothesis};
use crate::knowledge::KnowledgeEntry;
use crate::reason::{infer_json, ReasonError, Reasoner};
use serde_json::Value;
use tracing::info;

pub async fn hypothesize(
    characterization: &Characterization,
    past: &[KnowledgeEntry],
    reasoner: &dyn Reasoner,
    retry_backoff_ms: u64,
) -> Result<Vec<Hypothesis>, ReasonError> {
    let prompt = build_prompt(characterization, past);
    let parsed = infer_json(reasoner, "hypothesize", &prompt, retry_backoff_ms).await?;
    let hypotheses = parse_hypotheses(&parsed)?;

    info!(
        top = %hypotheses[0].title,
        confidence = format_args!("{:.0}%", hypotheses[0].confidence_score * 100.0),
        "Hypotheses generated"
    );
    Ok(hypotheses)
}

fn build_prompt(c: &Characterization, past: &[KnowledgeEntry]) -> String {
    let past_text = if past.is_empty() {
        "None on record.".to_string()
    } else {
        past.iter()
            .map(|e| {
                format!(
                    "- Incident {}: {} | outcome: {} ({})",
                    e.incident_id,
                    e.root_cause.as_deref().unwrap_or("cause unknown"),
                    e.action_taken,
                    match e.action_succeeded {
                        Some(true) => "succeeded",
                        Some(false) => "failed",
                        None => "outcome unknown",
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are a senior backend engineer investigating a production performance regression.

ANOMALY SUMMARY
Endpoint:          {endpoint}
Detected at:       {detected_at}
Suspect commit:    {commit}

Performance change:
  Latency:         {lat_before:.1}ms -> {lat_after:.1}ms ({lat_mult}x slower)
  DB queries/req:  {q_before:.0} -> {q_after:.0} ({q_mult}x more queries)

Affected customers: {users} users
Other endpoints affected: {blast}

PAST INCIDENTS ON THIS ENDPOINT
{past_text}

YOUR TASK
Generate exactly 3 hypotheses for the root cause, ranked by probability.

Respond in this exact JSON format only, no text outside the JSON:

{{
  "hypotheses": [
    {{
      "rank": 1,
      "title": "short name for this hypothesis",
      "description": "what is causing this and why it produces these exact symptoms",
      "confidence_score": 0.0,
      "supporting_signals": ["signal from the data above"],
      "evidence_needed": ["specific queryable data that would confirm this"]
    }}
  ]
}}

Rules:
- exactly 3 entries, ranks 1, 2, 3
- confidence_scores across all 3 must sum to 1.0
- evidence_needed must be specific (e.g. "commit diff showing loop added", not "check the code")"#,
        endpoint = c.endpoint,
        detected_at = c.regression_start.to_rfc3339(),
        commit = c.commit_sha.as_deref().unwrap_or("unknown"),
        lat_before = c.latency_before_ms,
        lat_after = c.latency_after_ms,
        lat_mult = c.latency_multiplier,
        q_before = c.query_count_before,
        q_after = c.query_count_after,
        q_mult = c.query_multiplier,
        users = c.affected_user_ids.len(),
        blast = if c.all_endpoints_affected {
            "YES - possible infrastructure issue"
        } else {
            "NO - likely a code issue in this endpoint"
        },
    )
}

/// Validate the reasoning output into exactly 3 ranked hypotheses.
fn parse_hypotheses(value: &Value) -> Result<Vec<Hypothesis>, ReasonError> {
    let malformed = |detail: String| ReasonError::Malformed {
        stage: "hypothesize".to_string(),
        detail,
    };

    let list = value
        .get("hypotheses")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing 'hypotheses' array".to_string()))?;

    let mut hypotheses: Vec<Hypothesis> = list
        .iter()
        .map(|h| serde_json::from_value(h.clone()))
        .collect::<Result<_, _>>()
        .map_err(|e| malformed(format!("bad hypothesis object: {e}")))?;

    if hypotheses.len() != 3 {
        return Err(malformed(format!(
            "expected exactly 3 hypotheses, got {}",
            hypotheses.len()
        )));
    }

    hypotheses.sort_by_key(|h| h.rank);
    let ranks: Vec<u32> = hypotheses.iter().map(|h| h.rank).collect();
    if ranks != [1, 2, 3] {
        return Err(malformed(format!("ranks must be 1..3, got {ranks:?}")));
    }

    for h in &mut hypotheses {
        h.confidence_score = h.confidence_score.clamp(0.0, 1.0);
        if h.title.trim().is_empty() {
            return Err(malformed("hypothesis with empty title".to_string()));
        }
    }
    Ok(hypotheses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "hypotheses": [
                {"rank": 2, "title": "Missing index", "description": "d", "confidence_score": 0.2},
                {"rank": 1, "title": "N+1 query", "description": "d", "confidence_score": 0.7,
                 "supporting_signals": ["query explosion"], "evidence_needed": ["commit diff"]},
                {"rank": 3, "title": "Lock contention", "description": "d", "confidence_score": 0.1}
            ]
        })
    }

    #[test]
    fn test_parse_sorts_by_rank() {
        let hypotheses = parse_hypotheses(&valid()).unwrap();
        assert_eq!(hypotheses[0].title, "N+1 query");
        assert_eq!(hypotheses[2].rank, 3);
    }

    #[test]
    fn test_wrong_count_rejected() {
        let v = json!({"hypotheses": [
            {"rank": 1, "title": "only one", "description": "d", "confidence_score": 1.0}
        ]});
        assert!(matches!(
            parse_hypotheses(&v),
            Err(ReasonError::Malformed { .. })
        ));
    }

    #[test]
    fn test_duplicate_ranks_rejected() {
        let v = json!({"hypotheses": [
            {"rank": 1, "title": "a", "description": "d", "confidence_score": 0.5},
            {"rank": 1, "title": "b", "description": "d", "confidence_score": 0.3},
            {"rank": 3, "title": "c", "description": "d", "confidence_score": 0.2}
        ]});
        assert!(parse_hypotheses(&v).is_err());
    }

    #[test]
    fn test_confidence_clamped() {
        let v = json!({"hypotheses": [
            {"rank": 1, "title": "a", "description": "d", "confidence_score": 1.7},
            {"rank": 2, "title": "b", "description": "d", "confidence_score": -0.2},
            {"rank": 3, "title": "c", "description": "d", "confidence_score": 0.2}
        ]});
        let hypotheses = parse_hypotheses(&v).unwrap();
        assert_eq!(hypotheses[0].confidence_score, 1.0);
        assert_eq!(hypotheses[1].confidence_score, 0.0);
    }

    #[test]
    fn test_prompt_mentions_past_incidents() {
        let c = Characterization {
            endpoint: "/checkout".to_string(),
            all_endpoints_affected: false,
            affected_user_ids: vec![],
            regression_start: chrono::Utc::now(),
            commit_sha: Some("abc1234".to_string()),
            latency_before_ms: 120.0,
            latency_after_ms: 450.0,
            latency_multiplier: 3.8,
            query_count_before: 3.0,
            query_count_after: 45.0,
            query_multiplier: 15.0,
        };
        let past = vec![KnowledgeEntry {
            incident_id: "inc-7".to_string(),
            endpoint: "/checkout".to_string(),
            root_cause: Some("N+1 query pattern".to_string()),
            characterization: "query explosion".to_string(),
            confidence: Some(0.95),
            record_json: serde_json::Value::Null,
            action_taken: "auto_merged".to_string(),
            action_succeeded: Some(true),
            created_at: chrono::Utc::now(),
        }];

        let prompt = build_prompt(&c, &past);
        assert!(prompt.contains("N+1 query pattern"));
        assert!(prompt.contains("abc1234"));
        assert!(prompt.contains("450.0ms"));
    }
}
