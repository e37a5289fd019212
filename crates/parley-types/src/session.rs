//! Caller-facing request and response shapes for the session service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::{ExecutionPosition, ExecutionState, ExecutionStatus, HistoryEntry};
use crate::llm::GenerationDebugInfo;
use crate::variable::VariableStore;

/// Error code reported for every failed call.
pub const EXECUTION_ERROR: &str = "EXECUTION_ERROR";

/// Start a new session and run it up to its first wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeSessionRequest {
    pub session_id: String,
    /// Script text, YAML or JSON.
    pub script_content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub global_variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub session_variables: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<HistoryEntry>,
}

/// Feed one user turn into a persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInputRequest {
    pub session_id: String,
    pub script_content: String,
    pub user_input: String,
    pub state: ExecutionState,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub global_variables: Map<String, Value>,
}

/// Position plus the round counters of the current (or last finished) action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPosition {
    #[serde(flatten)]
    pub position: ExecutionPosition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionErrorBody {
    pub code: String,
    pub message: String,
}

impl SessionErrorBody {
    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            code: EXECUTION_ERROR.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: ExecutionStatus,
    pub position: SessionPosition,
    /// The store flattened by scope priority at the current position.
    pub variables: Map<String, Value>,
    pub variable_store: VariableStore,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<GenerationDebugInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<SessionErrorBody>,
}
