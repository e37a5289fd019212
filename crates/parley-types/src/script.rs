//! Conversation script types.
//!
//! A script is a strict tree: one session containing ordered phases, each
//! containing ordered topics, each containing ordered actions. Traversal
//! order is the declared array order; there are no jumps or branches.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::variable::VariableScope;

// ---------------------------------------------------------------------------
// Script tree
// ---------------------------------------------------------------------------

/// Top-level wrapper: every script document has a single `session` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptDocument {
    pub session: SessionDefinition,
}

/// The root of the script tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefinition {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    /// Template scheme used to pick custom prompt templates over the defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declare: Vec<VariableDeclaration>,
    #[serde(default)]
    pub phases: Vec<PhaseDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseDefinition {
    pub phase_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declare: Vec<VariableDeclaration>,
    #[serde(default)]
    pub topics: Vec<TopicDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicDefinition {
    pub topic_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declare: Vec<VariableDeclaration>,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

/// A single action slot in a topic.
///
/// Action parameters may appear either at the top level of the action or
/// inside its `config` map. [`ActionDefinition::merged_config`] folds the
/// two together, with `config` taking precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub action_id: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    /// Any other top-level fields (e.g. `content`, `max_rounds`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ActionDefinition {
    /// Merge top-level fields with the `config` map. Keys in `config` win.
    pub fn merged_config(&self) -> Map<String, Value> {
        let mut merged = self.extra.clone();
        if let Some(config) = &self.config {
            for (key, value) in config {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// A declared variable at session, phase, or topic level.
///
/// The declaring level is the default scope. Session-level declarations may
/// opt into `global` scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub var: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<VariableScope>,
    /// Natural-language definition, used when asking the model to extract it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub define: Option<String>,
    /// Initial value seeded when the variable is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl SessionDefinition {
    /// Total number of actions across all phases and topics.
    pub fn action_count(&self) -> usize {
        self.phases
            .iter()
            .flat_map(|p| p.topics.iter())
            .map(|t| t.actions.len())
            .sum()
    }
}
