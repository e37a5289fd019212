//! Variable store types.
//!
//! Variables live in exactly one of four buckets: global, session, phase
//! (keyed by phase id) or topic (keyed by topic id). The same name may
//! exist in several buckets; lookups resolve the shadowing by priority.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Source tag for variables migrated from a legacy flat map.
pub const SOURCE_MIGRATED: &str = "migrated";
/// Source tag for globals copied in from the caller on resume.
pub const SOURCE_GLOBAL_SYNC: &str = "global_sync";
/// Source tag for variables supplied at session initialization.
pub const SOURCE_INITIALIZATION: &str = "initialization";
/// Source tag for values seeded from a `declare` block.
pub const SOURCE_DECLARATION: &str = "declaration";

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// The four variable visibility tiers, from widest to narrowest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    Global,
    Session,
    Phase,
    Topic,
}

impl fmt::Display for VariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableScope::Global => write!(f, "global"),
            VariableScope::Session => write!(f, "session"),
            VariableScope::Phase => write!(f, "phase"),
            VariableScope::Topic => write!(f, "topic"),
        }
    }
}

impl FromStr for VariableScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "global" => Ok(VariableScope::Global),
            "session" => Ok(VariableScope::Session),
            "phase" => Ok(VariableScope::Phase),
            "topic" => Ok(VariableScope::Topic),
            other => Err(format!("invalid variable scope: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// JSON type tag recorded alongside each stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl VariableType {
    /// Infer the type tag of a JSON value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => VariableType::Null,
            Value::Bool(_) => VariableType::Boolean,
            Value::Number(_) => VariableType::Number,
            Value::String(_) => VariableType::String,
            Value::Array(_) => VariableType::Array,
            Value::Object(_) => VariableType::Object,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VariableType::Null => "null",
            VariableType::Boolean => "boolean",
            VariableType::Number => "number",
            VariableType::String => "string",
            VariableType::Array => "array",
            VariableType::Object => "object",
        };
        write!(f, "{s}")
    }
}

/// A stored variable with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableValue {
    pub value: Value,
    #[serde(rename = "type")]
    pub value_type: VariableType,
    /// Action id that wrote it, or one of the `SOURCE_*` tags.
    pub source: String,
    pub last_updated: DateTime<Utc>,
    pub scope: VariableScope,
}

impl VariableValue {
    /// Wrap a raw value, stamping the type and the current time.
    pub fn new(value: Value, scope: VariableScope, source: impl Into<String>) -> Self {
        Self {
            value_type: VariableType::of(&value),
            value,
            source: source.into(),
            last_updated: Utc::now(),
            scope,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Map of variable name to stored value.
pub type VariableBucket = BTreeMap<String, VariableValue>;

/// The four-bucket variable store persisted in every execution state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableStore {
    #[serde(default)]
    pub global: VariableBucket,
    #[serde(default)]
    pub session: VariableBucket,
    /// Phase buckets keyed by phase id.
    #[serde(default)]
    pub phase: BTreeMap<String, VariableBucket>,
    /// Topic buckets keyed by topic id.
    #[serde(default)]
    pub topic: BTreeMap<String, VariableBucket>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no bucket holds any variable.
    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
            && self.session.is_empty()
            && self.phase.values().all(BTreeMap::is_empty)
            && self.topic.values().all(BTreeMap::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Definitions and positions
// ---------------------------------------------------------------------------

/// Declared metadata for a variable: where it lives and what it means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDefinition {
    pub name: String,
    pub scope: VariableScope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub define: Option<String>,
}

/// The phase/topic/action ids a read or write is performed relative to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopePosition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
}

impl ScopePosition {
    pub fn new(
        phase_id: impl Into<String>,
        topic_id: impl Into<String>,
        action_id: impl Into<String>,
    ) -> Self {
        Self {
            phase_id: Some(phase_id.into()),
            topic_id: Some(topic_id.into()),
            action_id: Some(action_id.into()),
        }
    }
}

/// One entry in the resolver's write log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableOperation {
    pub operation: String,
    pub variable_name: String,
    pub scope: VariableScope,
    pub value: Value,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}
