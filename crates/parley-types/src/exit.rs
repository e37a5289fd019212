//! Exit-decision types shared by every interactive action.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which signal produced an exit decision.
///
/// The declaration order is also the evaluation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    MaxRounds,
    ExitFlag,
    ExitCriteria,
    LlmSuggestion,
}

impl DecisionSource {
    /// All sources in priority order.
    pub const ALL: [DecisionSource; 4] = [
        DecisionSource::MaxRounds,
        DecisionSource::ExitFlag,
        DecisionSource::ExitCriteria,
        DecisionSource::LlmSuggestion,
    ];
}

impl fmt::Display for DecisionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionSource::MaxRounds => write!(f, "max_rounds"),
            DecisionSource::ExitFlag => write!(f, "exit_flag"),
            DecisionSource::ExitCriteria => write!(f, "exit_criteria"),
            DecisionSource::LlmSuggestion => write!(f, "llm_suggestion"),
        }
    }
}

impl FromStr for DecisionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max_rounds" => Ok(DecisionSource::MaxRounds),
            "exit_flag" => Ok(DecisionSource::ExitFlag),
            "exit_criteria" => Ok(DecisionSource::ExitCriteria),
            "llm_suggestion" => Ok(DecisionSource::LlmSuggestion),
            other => Err(format!("invalid decision source: '{other}'")),
        }
    }
}

/// Outcome of one exit evaluation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub reason: String,
    pub decision_source: DecisionSource,
}

impl ExitDecision {
    pub fn exit(reason: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            should_exit: true,
            reason: reason.into(),
            decision_source: source,
        }
    }

    pub fn stay(reason: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            should_exit: false,
            reason: reason.into(),
            decision_source: source,
        }
    }
}

/// Which exit sources an action honours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPolicy {
    pub supports_exit: bool,
    /// `None` enables all four sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_sources: Option<Vec<DecisionSource>>,
}

impl ExitPolicy {
    pub fn new(supports_exit: bool, enabled_sources: Option<Vec<DecisionSource>>) -> Self {
        Self {
            supports_exit,
            enabled_sources,
        }
    }

    /// Policy for actions that never exit on their own signals.
    pub fn unsupported() -> Self {
        Self::new(false, None)
    }

    pub fn is_enabled(&self, source: DecisionSource) -> bool {
        match &self.enabled_sources {
            Some(sources) => sources.contains(&source),
            None => true,
        }
    }
}

impl Default for ExitPolicy {
    fn default() -> Self {
        Self::new(true, None)
    }
}

// ---------------------------------------------------------------------------
// Declarative criteria
// ---------------------------------------------------------------------------

/// Declarative exit criteria configured on an action (`exit_criteria`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitCriteria {
    #[serde(
        default,
        deserialize_with = "lenient::u32_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_rounds: Option<u32>,
    /// Minimum `understanding_level` (0-100) the model must report.
    #[serde(
        default,
        deserialize_with = "lenient::f64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub understanding_threshold: Option<f64>,
    /// When set, exit is blocked while the model reports open questions.
    #[serde(
        default,
        deserialize_with = "lenient::bool_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub has_questions: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_conditions: Vec<CustomCondition>,
}

/// Scalar readers that accept numeric and boolean strings, so hand-written
/// YAML like `understanding_threshold: "80"` is not rejected.
mod lenient {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    fn number<E: Error>(value: Value) -> Result<Option<f64>, E> {
        match value {
            Value::Null => Ok(None),
            Value::Number(n) => Ok(n.as_f64()),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| E::custom(format!("expected a number, got '{s}'"))),
            other => Err(E::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn f64_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        number(Value::deserialize(d)?)
    }

    pub fn u32_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        number::<D::Error>(Value::deserialize(d)?)?
            .map(|n| {
                if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) {
                    Ok(n as u32)
                } else {
                    Err(D::Error::custom(format!("expected a non-negative integer, got {n}")))
                }
            })
            .transpose()
    }

    pub fn bool_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(b)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "" => Ok(None),
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(D::Error::custom(format!("expected a boolean, got '{s}'"))),
            },
            other => Err(D::Error::custom(format!("expected a boolean, got {other}"))),
        }
    }
}

/// `{variable} {operator} {value}` evaluated against the scope resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomCondition {
    pub variable: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "contains")]
    Contains,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConditionOperator::Eq => "==",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Lt => "<",
            ConditionOperator::Ge => ">=",
            ConditionOperator::Le => "<=",
            ConditionOperator::Contains => "contains",
        };
        write!(f, "{s}")
    }
}
