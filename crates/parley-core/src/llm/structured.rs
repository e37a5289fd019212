//! Structured model output parsing.
//!
//! Generative actions ask the model for a JSON object. Models wrap it in
//! code fences, prepend chatter, or return plain prose, so parsing tries a
//! fixed list of strategies and finally degrades to a synthetic object
//! that keeps the conversation going.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use parley_types::action::{ActionMetrics, ProgressSuggestion};

/// All strategies failed to produce a JSON object.
#[derive(Debug, Clone, Error)]
#[error("structured output parse failed after {attempts} strategies: {final_error}")]
pub struct StructuredOutputError {
    pub attempts: u32,
    pub final_error: String,
}

/// Record of a degraded parse, kept in action metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseFailure {
    pub retry_count: u32,
    pub strategies: Vec<String>,
    pub final_error: String,
}

/// Result of [`parse_structured_output`]: always an object.
#[derive(Debug, Clone)]
pub struct ParsedOutput {
    pub value: Map<String, Value>,
    /// Number of strategies tried, including the successful one.
    pub retry_count: u32,
    /// Name of the strategy that succeeded.
    pub strategy: Option<&'static str>,
    pub failure: Option<ParseFailure>,
}

impl ParsedOutput {
    pub fn is_degraded(&self) -> bool {
        self.failure.is_some()
    }
}

type Strategy = fn(&str) -> Result<Map<String, Value>, String>;

const STRATEGIES: [(&str, Strategy); 3] = [
    ("direct_parse", direct_parse),
    ("trim_and_parse", trim_and_parse),
    ("extract_json_block", extract_json_block),
];

/// Strip a leading ```json / ``` fence and a trailing ``` fence.
pub fn clean_json_output(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn parse_object(candidate: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", type_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn direct_parse(raw: &str) -> Result<Map<String, Value>, String> {
    parse_object(clean_json_output(raw))
}

/// Drop any prose before the first `{` and after the last `}`.
fn trim_and_parse(raw: &str) -> Result<Map<String, Value>, String> {
    let start = raw.find('{').ok_or("no opening brace")?;
    let end = raw.rfind('}').ok_or("no closing brace")?;
    if end < start {
        return Err("closing brace precedes opening brace".to_string());
    }
    parse_object(&raw[start..=end])
}

/// Parse the first fenced ```json block found anywhere in the text.
fn extract_json_block(raw: &str) -> Result<Map<String, Value>, String> {
    let open = raw.find("```json").ok_or("no ```json block")?;
    let body = &raw[open + "```json".len()..];
    let close = body.find("```").ok_or("unterminated ```json block")?;
    parse_object(body[..close].trim())
}

/// Try each strategy in order, returning the first object or an error.
pub fn try_parse_structured(raw: &str) -> Result<(Map<String, Value>, u32, &'static str), StructuredOutputError> {
    let mut last_error = String::new();
    for (attempt, (name, strategy)) in STRATEGIES.iter().enumerate() {
        match strategy(raw) {
            Ok(map) => return Ok((map, attempt as u32 + 1, name)),
            Err(e) => {
                tracing::debug!(strategy = name, error = %e, "structured parse strategy failed");
                last_error = e;
            }
        }
    }
    Err(StructuredOutputError {
        attempts: STRATEGIES.len() as u32,
        final_error: last_error,
    })
}

/// Parse model output, degrading to a continue-needed object on failure.
pub fn parse_structured_output(raw: &str) -> ParsedOutput {
    match try_parse_structured(raw) {
        Ok((value, retry_count, strategy)) => ParsedOutput {
            value,
            retry_count,
            strategy: Some(strategy),
            failure: None,
        },
        Err(err) => {
            tracing::warn!(error = %err, "model output is not JSON, using degraded output");
            ParsedOutput {
                value: degraded_output(raw),
                retry_count: err.attempts,
                strategy: None,
                failure: Some(ParseFailure {
                    retry_count: err.attempts,
                    strategies: STRATEGIES.iter().map(|(n, _)| n.to_string()).collect(),
                    final_error: err.final_error,
                }),
            }
        }
    }
}

fn degraded_output(raw: &str) -> Map<String, Value> {
    let value = json!({
        "content": raw.trim(),
        "EXIT": "NO",
        "BRIEF": "LLM output JSON parse failed",
        "metrics": {
            "information_completeness": "unknown",
            "user_engagement": "unknown",
            "emotional_intensity": "unknown",
            "reply_relevance": "unknown",
            "understanding_level": "unknown"
        },
        "progress_suggestion": "continue_needed"
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// First non-empty string among `keys`.
pub fn first_string(output: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| output.get(*k))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
}

fn metric(metrics: &Map<String, Value>, key: &str) -> Option<String> {
    match metrics.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Read the `metrics` block, if present.
pub fn extract_metrics(output: &Map<String, Value>) -> Option<ActionMetrics> {
    let metrics = output.get("metrics")?.as_object()?;
    Some(ActionMetrics {
        information_completeness: metric(metrics, "information_completeness"),
        user_engagement: metric(metrics, "user_engagement"),
        emotional_intensity: metric(metrics, "emotional_intensity"),
        reply_relevance: metric(metrics, "reply_relevance"),
        understanding_level: metric(metrics, "understanding_level"),
    })
}

/// Read `progress_suggestion`, defaulting to continue-needed.
pub fn extract_progress(output: &Map<String, Value>) -> ProgressSuggestion {
    output
        .get("progress_suggestion")
        .and_then(Value::as_str)
        .map(ProgressSuggestion::parse_lenient)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_parse_handles_fenced_json() {
        let parsed = parse_structured_output("```json\n{\"content\": \"hi\"}\n```");
        assert_eq!(parsed.value["content"], "hi");
        assert_eq!(parsed.strategy, Some("direct_parse"));
        assert_eq!(parsed.retry_count, 1);
        assert!(!parsed.is_degraded());
    }

    #[test]
    fn test_trim_strategy_drops_surrounding_prose() {
        let parsed = parse_structured_output("Sure! {\"content\": \"ok\", \"EXIT\": true} Hope it helps");
        assert_eq!(parsed.strategy, Some("trim_and_parse"));
        assert_eq!(parsed.retry_count, 2);
        assert_eq!(parsed.value["EXIT"], true);
    }

    #[test]
    fn test_json_block_strategy_finds_inner_fence() {
        let raw = "Notes {draft}\n```json\n{\"content\": \"final\"}\n```\nmore {text}";
        let parsed = parse_structured_output(raw);
        assert_eq!(parsed.strategy, Some("extract_json_block"));
        assert_eq!(parsed.retry_count, 3);
        assert_eq!(parsed.value["content"], "final");
    }

    #[test]
    fn test_prose_degrades_to_continue() {
        let parsed = parse_structured_output("  Just a friendly sentence.  ");
        assert!(parsed.is_degraded());
        assert_eq!(parsed.value["content"], "Just a friendly sentence.");
        assert_eq!(parsed.value["EXIT"], "NO");
        assert_eq!(extract_progress(&parsed.value), ProgressSuggestion::ContinueNeeded);

        let failure = parsed.failure.unwrap();
        assert_eq!(failure.retry_count, 3);
        assert_eq!(failure.strategies.len(), 3);
    }

    #[test]
    fn test_non_object_json_is_rejected() {
        assert!(try_parse_structured("[1, 2, 3]").is_err());
        assert!(try_parse_structured("\"text\"").is_err());
    }

    #[test]
    fn test_metrics_accept_numbers() {
        let parsed = parse_structured_output(
            r#"{"metrics": {"understanding_level": 85, "user_engagement": "high"}, "progress_suggestion": "blocked"}"#,
        );
        let metrics = extract_metrics(&parsed.value).unwrap();
        assert_eq!(metrics.understanding_level.as_deref(), Some("85"));
        assert_eq!(metrics.user_engagement.as_deref(), Some("high"));
        assert!(metrics.reply_relevance.is_none());
        assert_eq!(extract_progress(&parsed.value), ProgressSuggestion::Blocked);
    }

    #[test]
    fn test_first_string_skips_blank_values() {
        let parsed = parse_structured_output(r#"{"content": "  ", "response": "fallback"}"#);
        assert_eq!(
            first_string(&parsed.value, &["content", "response"]).as_deref(),
            Some("fallback")
        );
    }
}
