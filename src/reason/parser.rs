//! Recovery parser for reasoning output.
//!
//! Backends sometimes wrap JSON in markdown fences or pad it with prose
//! despite instructions. Three attempts, strictest first: direct parse,
//! fenced block, outermost brace pair. Anything past that is malformed.

use crate::reason::ReasonError;
use serde_json::Value;
use tracing::debug;

pub fn parse_json_response(raw: &str, stage: &str) -> Result<Value, ReasonError> {
    debug!(stage, len = raw.len(), "Parsing reasoning response");

    // Try 1: the response is exactly JSON
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Ok(value);
    }

    // Try 2: JSON wrapped in ``` or ```json fences
    if let Some(inner) = extract_fenced_block(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Ok(value);
        }
    }

    // Try 3: outermost { ... } block buried in prose
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&raw[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ReasonError::Malformed {
        stage: stage.to_string(),
        detail: format!("no parseable JSON in response ({} chars)", raw.len()),
    })
}

fn extract_fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    // Skip a language tag on the fence line
    let body_start = after_open.find('\n')? + 1;
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}
