//! Action result, metrics, and snapshot types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::exit::ExitDecision;
use crate::llm::GenerationDebugInfo;

// ---------------------------------------------------------------------------
// Model-reported signals
// ---------------------------------------------------------------------------

/// The model's own view of where the conversation is heading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSuggestion {
    #[default]
    ContinueNeeded,
    Completed,
    Blocked,
    OffTopic,
}

impl ProgressSuggestion {
    /// Parse a model-supplied value, treating anything unknown as `ContinueNeeded`.
    pub fn parse_lenient(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl fmt::Display for ProgressSuggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressSuggestion::ContinueNeeded => write!(f, "continue_needed"),
            ProgressSuggestion::Completed => write!(f, "completed"),
            ProgressSuggestion::Blocked => write!(f, "blocked"),
            ProgressSuggestion::OffTopic => write!(f, "off_topic"),
        }
    }
}

impl FromStr for ProgressSuggestion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "continue_needed" => Ok(ProgressSuggestion::ContinueNeeded),
            "completed" => Ok(ProgressSuggestion::Completed),
            "blocked" => Ok(ProgressSuggestion::Blocked),
            "off_topic" => Ok(ProgressSuggestion::OffTopic),
            other => Err(format!("invalid progress suggestion: '{other}'")),
        }
    }
}

/// Free-text engagement metrics reported by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub information_completeness: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_engagement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_intensity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_relevance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub understanding_level: Option<String>,
}

/// Why a multi-round action stopped (or is about to).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MaxRoundsReached,
    ExitCriteriaMet,
    UserBlocked,
    OffTopic,
    UserAcknowledged,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::MaxRoundsReached => "max_rounds_reached",
            ExitReason::ExitCriteriaMet => "exit_criteria_met",
            ExitReason::UserBlocked => "user_blocked",
            ExitReason::OffTopic => "off_topic",
            ExitReason::UserAcknowledged => "user_acknowledged",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Action result
// ---------------------------------------------------------------------------

/// Round, exit, template, and parse details attached to an action result.
///
/// Written into the assistant history entry and used by the executor to
/// maintain round bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_decision: Option<ExitDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<ExitReason>,
    /// Raw assessment block from the model output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Value>,
    /// Parsed model output, kept so later rounds can recover variables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_raw_output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_retry_count: Option<u32>,
    /// What input the action is blocked on (`acknowledgment`, `answer`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub validation_failed: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionMetadata {
    /// True when the metadata carries round bookkeeping.
    pub fn has_round_info(&self) -> bool {
        self.current_round.is_some() && self.max_rounds.is_some()
    }
}

/// What one `execute` call of an action produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    /// `false` means the action wants another round of user input.
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extracted_variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ActionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_suggestion: Option<ProgressSuggestion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: ActionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<GenerationDebugInfo>,
}

impl ActionResult {
    /// A successful round that finishes the action.
    pub fn completed(ai_message: Option<String>) -> Self {
        Self {
            success: true,
            completed: true,
            ai_message,
            ..Default::default()
        }
    }

    /// A successful round that needs more user input.
    pub fn waiting(ai_message: Option<String>) -> Self {
        Self {
            success: true,
            completed: false,
            ai_message,
            ..Default::default()
        }
    }

    /// An action-level failure. Halts traversal.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            completed: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Freeze/thaw
// ---------------------------------------------------------------------------

/// Serialized form of an in-flight action, stored between user turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionStateSnapshot {
    pub action_id: String,
    pub action_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    pub current_round: u32,
    pub max_rounds: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_progress_suggestion_lenient_parse() {
        assert_eq!(
            ProgressSuggestion::parse_lenient("blocked"),
            ProgressSuggestion::Blocked
        );
        assert_eq!(
            ProgressSuggestion::parse_lenient(" OFF_TOPIC "),
            ProgressSuggestion::OffTopic
        );
        assert_eq!(
            ProgressSuggestion::parse_lenient("finished?"),
            ProgressSuggestion::ContinueNeeded
        );
    }

    #[test]
    fn test_metadata_skips_empty_fields() {
        let meta = ActionMetadata {
            current_round: Some(1),
            max_rounds: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json, json!({ "current_round": 1, "max_rounds": 3 }));
        assert!(meta.has_round_info());
    }

    #[test]
    fn test_metadata_keeps_unknown_fields() {
        let meta: ActionMetadata = serde_json::from_value(json!({
            "current_round": 2,
            "rewritten": true
        }))
        .unwrap();
        assert_eq!(meta.current_round, Some(2));
        assert_eq!(meta.extra["rewritten"], true);
    }

    #[test]
    fn test_failed_result_is_completed() {
        let result = ActionResult::failed("boom");
        assert!(!result.success);
        assert!(result.completed);
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
