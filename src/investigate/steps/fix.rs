//! Stage 5 of 5: generate the fix package. Third reasoning call.
//!
//! Only reached when the confirmed confidence clears the propose floor.
//! Produces everything a PR needs: the code change, the explanation, the
//! risk call, and rollback/verification steps.

use crate::investigate::{Characterization, ConfirmedCause, FixProposal, RiskLevel};
use crate::reason::{infer_json, ReasonError, Reasoner};
use serde_json::Value;
use tracing::info;

pub async fn generate_fix(
    cause: &ConfirmedCause,
    characterization: &Characterization,
    reasoner: &dyn Reasoner,
    retry_backoff_ms: u64,
) -> Result<FixProposal, ReasonError> {
    let prompt = build_prompt(cause, characterization);
    let parsed = infer_json(reasoner, "fix", &prompt, retry_backoff_ms).await?;
    let proposal = parse_fix(&parsed)?;

    info!(
        summary = %proposal.summary,
        risk = ?proposal.risk_level,
        "Fix generated"
    );
    Ok(proposal)
}

fn build_prompt(cause: &ConfirmedCause, c: &Characterization) -> String {
    format!(
        r#"You are a senior backend engineer writing a production fix.

ROOT CAUSE
{title}
Confidence: {confidence:.0}%
Location: {location}

Problem code:
{snippet}

EVIDENCE
{evidence}

PERFORMANCE IMPACT
Latency:  {lat_before:.0}ms -> {lat_after:.0}ms
Queries:  {q_before:.0} -> {q_after:.0} per request
Endpoint: {endpoint}

YOUR TASK
Write a minimal fix for this specific code. Generate a clear PR title and
description explaining what happened and what you fixed.

Respond with ONLY raw JSON, no markdown fences, no extra text:

{{
  "summary": "one-line summary of the fix",
  "original_code": "exact code to replace",
  "fixed_code": "the replacement",
  "explanation": "detailed technical explanation",
  "risk_level": "low",
  "risk_reasoning": "why this risk level",
  "side_effects": ["possible side effect"],
  "rollback_instructions": "how to roll back",
  "verification_checklist": ["verification step"],
  "pr_title": "PR title",
  "pr_body": "detailed PR description covering incident, root cause, and fix"
}}"#,
        title = cause.title,
        confidence = cause.confidence * 100.0,
        location = cause.code_location,
        snippet = cause.code_snippet,
        evidence = cause.evidence_chain.join("\n"),
        lat_before = c.latency_before_ms,
        lat_after = c.latency_after_ms,
        q_before = c.query_count_before,
        q_after = c.query_count_after,
        endpoint = c.endpoint,
    )
}

fn parse_fix(value: &Value) -> Result<FixProposal, ReasonError> {
    let malformed = |detail: String| ReasonError::Malformed {
        stage: "fix".to_string(),
        detail,
    };

    let required = |key: &str| -> Result<String, ReasonError> {
        value
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| malformed(format!("missing required field '{key}'")))
    };
    let optional = |key: &str| -> String {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };

    // An unrecognized risk level degrades to High, never to permissive
    let risk_level = match optional("risk_level").to_lowercase().as_str() {
        "low" => RiskLevel::Low,
        "medium" => RiskLevel::Medium,
        _ => RiskLevel::High,
    };

    Ok(FixProposal {
        summary: required("summary")?,
        original_code: required("original_code")?,
        fixed_code: required("fixed_code")?,
        explanation: optional("explanation"),
        risk_level,
        risk_reasoning: optional("risk_reasoning"),
        side_effects: string_list("side_effects"),
        rollback_instructions: optional("rollback_instructions"),
        verification_checklist: string_list("verification_checklist"),
        pr_title: required("pr_title")?,
        pr_body: optional("pr_body"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Value {
        json!({
            "summary": "Replace per-row queries with a single JOIN",
            "original_code": "for item in items { query(item) }",
            "fixed_code": "query_all_joined(items)",
            "explanation": "The loop fired one query per row.",
            "risk_level": "low",
            "risk_reasoning": "Single call site, covered by tests",
            "side_effects": [],
            "rollback_instructions": "revert the commit",
            "verification_checklist": ["latency back under 150ms"],
            "pr_title": "fix: eliminate N+1 in checkout total",
            "pr_body": "Full description"
        })
    }

    #[test]
    fn test_parse_valid_fix() {
        let fix = parse_fix(&valid()).unwrap();
        assert_eq!(fix.risk_level, RiskLevel::Low);
        assert!(fix.pr_title.starts_with("fix:"));
        assert_eq!(fix.verification_checklist.len(), 1);
    }

    #[test]
    fn test_missing_code_fields_malformed() {
        let mut v = valid();
        v.as_object_mut().unwrap().remove("fixed_code");
        assert!(matches!(parse_fix(&v), Err(ReasonError::Malformed { .. })));
    }

    #[test]
    fn test_unknown_risk_level_degrades_to_high() {
        let mut v = valid();
        v["risk_level"] = json!("probably fine");
        assert_eq!(parse_fix(&v).unwrap().risk_level, RiskLevel::High);
    }
}
