//! Stage 4 of 5: confirm the root cause. Second reasoning call.
//!
//! All hypotheses and their evidence go in; a definitive call comes out.
//! This stage is the only producer of the confidence score that gates
//! every downstream action.

use crate::investigate::{ConfirmedCause, EvidenceBundle, Hypothesis};
use crate::reason::{infer_json, ReasonError, Reasoner};
use serde_json::Value;
use tracing::info;

pub async fn confirm_root_cause(
    hypotheses: &[Hypothesis],
    evidence: &[EvidenceBundle],
    reasoner: &dyn Reasoner,
    retry_backoff_ms: u64,
) -> Result<ConfirmedCause, ReasonError> {
    let prompt = build_prompt(hypotheses, evidence);
    let parsed = infer_json(reasoner, "confirm", &prompt, retry_backoff_ms).await?;
    let cause = parse_cause(&parsed)?;

    info!(
        cause = %cause.title,
        confidence = format_args!("{:.0}%", cause.confidence * 100.0),
        "Root cause confirmed"
    );
    Ok(cause)
}

fn build_prompt(hypotheses: &[Hypothesis], evidence: &[EvidenceBundle]) -> String {
    let mut hypotheses_text = String::new();
    for h in hypotheses {
        hypotheses_text.push_str(&format!(
            "\nHYPOTHESIS {} (confidence: {:.0}%)\nTitle: {}\nDescription: {}\nSupporting signals: {}\n",
            h.rank,
            h.confidence_score * 100.0,
            h.title,
            h.description,
            h.supporting_signals.join(", "),
        ));
    }

    let mut evidence_text = String::new();
    for bundle in evidence {
        evidence_text.push_str(&format!(
            "\nEVIDENCE FOR HYPOTHESIS {}\nQuery trend:\n{}\n",
            bundle.hypothesis_rank, bundle.query_trend
        ));
        for extra in &bundle.extra {
            evidence_text.push_str(&format!("{}: {}\n", extra.kind, extra.detail));
        }
    }

    let diff = evidence
        .first()
        .map(|b| b.commit_diff.as_str())
        .unwrap_or("Not available");

    format!(
        r#"You are a senior backend engineer making a final root cause determination for a production incident. You have hypotheses and concrete evidence. Make a definitive call.

THE HYPOTHESES
{hypotheses_text}

EVIDENCE GATHERED
{evidence_text}

COMMIT DIFF (the suspect commit)
{diff}

YOUR TASK
Analyze all evidence and confirm the root cause.

Respond in this exact JSON format only:

{{
  "confirmed_hypothesis_title": "exact title from above",
  "confidence_score": 0.0,
  "evidence_chain": [
    "Observation: what you see in the evidence",
    "Connection: how that proves the hypothesis",
    "Conclusion: why alternatives are less likely"
  ],
  "affected_code_location": "file and function from the diff",
  "affected_code_snippet": "the specific lines causing the problem, verbatim from the diff"
}}

Rules:
- confidence_score above 0.90 only if the diff clearly shows the problem
- evidence_chain must be step-by-step reasoning, 3-6 steps
- if the diff is unclear, lower the confidence accordingly"#,
    )
}

fn parse_cause(value: &Value) -> Result<ConfirmedCause, ReasonError> {
    let malformed = |detail: String| ReasonError::Malformed {
        stage: "confirm".to_string(),
        detail,
    };

    let title = value
        .get("confirmed_hypothesis_title")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| malformed("missing confirmed_hypothesis_title".to_string()))?;
    let confidence = value
        .get("confidence_score")
        .and_then(Value::as_f64)
        .ok_or_else(|| malformed("missing confidence_score".to_string()))?;

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

    Ok(ConfirmedCause {
        title: title.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
        evidence_chain: string_list("evidence_chain"),
        code_location: value
            .get("affected_code_location")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        code_snippet: value
            .get("affected_code_snippet")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string(),
    })
}
