//! Execution state: the serializable snapshot that carries a session from
//! one user turn to the next.
//!
//! Nothing here is process-resident. A caller loads the previous state,
//! hands it to the executor together with the new user input, and persists
//! whatever comes back.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::{ActionMetadata, ActionMetrics, ActionStateSnapshot, ProgressSuggestion};
use crate::exit::ExitDecision;
use crate::llm::{GenerationDebugInfo, MessageRole};
use crate::variable::{ScopePosition, VariableDefinition, VariableOperation, VariableStore};

// ---------------------------------------------------------------------------
// Status and position
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Running,
    WaitingInput,
    Completed,
    Error,
}

impl ExecutionStatus {
    /// True for `completed` and `error`: further input is ignored.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Error)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::WaitingInput => write!(f, "waiting_input"),
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(ExecutionStatus::Running),
            "waiting_input" => Ok(ExecutionStatus::WaitingInput),
            "completed" => Ok(ExecutionStatus::Completed),
            "error" => Ok(ExecutionStatus::Error),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// Cursor into the script tree.
///
/// Indices are always valid or one past the end; only the executor moves
/// them. The ids mirror the slot the indices point at and are cleared once
/// the script is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPosition {
    pub phase_index: usize,
    pub topic_index: usize,
    pub action_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
}

impl ExecutionPosition {
    /// The id triple used for scope reads and writes.
    pub fn scope_position(&self) -> ScopePosition {
        ScopePosition {
            phase_id: self.phase_id.clone(),
            topic_id: self.topic_id.clone(),
            action_id: self.action_id.clone(),
        }
    }

    pub fn clear_ids(&mut self) {
        self.phase_id = None;
        self.topic_id = None;
        self.action_id = None;
        self.action_type = None;
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ActionMetadata>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            action_id: None,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        action_id: impl Into<String>,
        metadata: ActionMetadata,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            action_id: Some(action_id.into()),
            timestamp: Utc::now(),
            metadata: Some(metadata),
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Session-wide settings copied from the script on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_scheme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub current_round: u32,
    pub max_rounds: u32,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitDecisionRecord {
    pub action_id: String,
    pub round: u32,
    pub decision: ExitDecision,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub action_id: String,
    pub round: u32,
    pub metrics: ActionMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_suggestion: Option<ProgressSuggestion>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    /// The frozen in-flight action, if one is waiting for input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_state: Option<ActionStateSnapshot>,
    #[serde(default)]
    pub session_config: SessionConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action_round_info: Option<RoundInfo>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub action_round_info: BTreeMap<String, RoundInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_decisions: Vec<ExitDecisionRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action_metrics_history: Vec<MetricsRecord>,
    /// Variable writes made during the most recent call, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_operations: Vec<VariableOperation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub position: ExecutionPosition,
    #[serde(default)]
    pub variable_store: VariableStore,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variable_definitions: BTreeMap<String, VariableDefinition>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default)]
    pub metadata: ExecutionMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_ai_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_debug_info: Option<GenerationDebugInfo>,
    /// Legacy flat variable map. Migrated into the store on the next call.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
}

impl ExecutionState {
    /// A fresh state positioned at the first slot of the script.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// True when an action is frozen mid-conversation.
    pub fn has_action_in_flight(&self) -> bool {
        self.metadata.action_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::WaitingInput,
            ExecutionStatus::Completed,
            ExecutionStatus::Error,
        ] {
            let parsed: ExecutionStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!(ExecutionStatus::Error.is_terminal());
        assert!(!ExecutionStatus::WaitingInput.is_terminal());
    }

    #[test]
    fn test_legacy_state_deserializes() {
        let state = ExecutionState::from_json(
            r#"{ "status": "waiting_input", "variables": { "name": "Ada" } }"#,
        )
        .unwrap();
        assert_eq!(state.status, ExecutionStatus::WaitingInput);
        assert_eq!(state.variables["name"], json!("Ada"));
        assert!(state.variable_store.is_empty());
        assert!(state.conversation_history.is_empty());
    }

    #[test]
    fn test_state_json_roundtrip_keeps_snapshot() {
        let mut state = ExecutionState::new();
        state.metadata.action_state = Some(ActionStateSnapshot {
            action_id: "ask_1".into(),
            action_type: "ai_ask".into(),
            config: Map::new(),
            current_round: 2,
            max_rounds: 3,
        });
        state.position.phase_id = Some("p1".into());

        let json = state.to_json().unwrap();
        let back = ExecutionState::from_json(&json).unwrap();
        assert!(back.has_action_in_flight());
        assert_eq!(back.metadata.action_state.unwrap().current_round, 2);
        assert_eq!(back.position.phase_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_position_clear_ids_keeps_indices() {
        let mut pos = ExecutionPosition {
            phase_index: 1,
            topic_index: 0,
            action_index: 2,
            phase_id: Some("p".into()),
            topic_id: Some("t".into()),
            action_id: Some("a".into()),
            action_type: Some("ai_say".into()),
        };
        pos.clear_ids();
        assert_eq!(pos.phase_index, 1);
        assert_eq!(pos.action_index, 2);
        assert!(pos.scope_position().phase_id.is_none());
    }
}
