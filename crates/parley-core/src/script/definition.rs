//! Script parsing, validation, and loading.
//!
//! Scripts are authored as YAML (or JSON) documents with a single `session`
//! key. Parsing always validates, so a returned `SessionDefinition` is
//! structurally sound: ids are present and unique per level, and every
//! action type is one the factory can build.

use std::collections::HashSet;
use std::path::Path;

use parley_types::script::{ScriptDocument, SessionDefinition, VariableDeclaration};
use parley_types::variable::VariableScope;
use thiserror::Error;

use crate::action::ActionKind;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    /// YAML/JSON parse failure.
    #[error("script parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("script validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse script text into a validated session.
///
/// Text starting with `{` is read as JSON, anything else as YAML.
pub fn parse_script(text: &str) -> Result<SessionDefinition, ScriptError> {
    let doc: ScriptDocument = if text.trim_start().starts_with('{') {
        serde_json::from_str(text).map_err(|e| ScriptError::Parse(e.to_string()))?
    } else {
        serde_yaml_ng::from_str(text).map_err(|e| ScriptError::Parse(e.to_string()))?
    };
    validate_script(&doc.session)?;
    Ok(doc.session)
}

/// Read and parse a script file.
pub fn load_script_file(path: &Path) -> Result<SessionDefinition, ScriptError> {
    let content = std::fs::read_to_string(path)?;
    parse_script(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_id(kind: &str, id: &str) -> Result<(), ScriptError> {
    if id.trim().is_empty() {
        return Err(ScriptError::Validation(format!("{kind} id must not be empty")));
    }
    Ok(())
}

fn check_declarations(
    level: &str,
    owner: &str,
    declarations: &[VariableDeclaration],
    allowed: &[VariableScope],
) -> Result<(), ScriptError> {
    for decl in declarations {
        if decl.var.trim().is_empty() {
            return Err(ScriptError::Validation(format!(
                "{level} '{owner}' declares a variable with an empty name"
            )));
        }
        if let Some(scope) = decl.scope {
            if !allowed.contains(&scope) {
                return Err(ScriptError::Validation(format!(
                    "{level} '{owner}' cannot declare '{}' in {scope} scope",
                    decl.var
                )));
            }
        }
    }
    Ok(())
}

/// Validate structural constraints on a session.
///
/// Checks:
/// - Session, phase, topic and action ids are non-empty
/// - Phase ids are unique, topic ids are unique, action ids are unique
/// - Every action type is known
/// - Declarations name a variable and use a scope valid at their level
pub fn validate_script(session: &SessionDefinition) -> Result<(), ScriptError> {
    check_id("session", &session.session_id)?;
    check_declarations(
        "session",
        &session.session_id,
        &session.declare,
        &[VariableScope::Global, VariableScope::Session],
    )?;

    let mut phase_ids = HashSet::new();
    let mut topic_ids = HashSet::new();
    let mut action_ids = HashSet::new();

    for phase in &session.phases {
        check_id("phase", &phase.phase_id)?;
        if !phase_ids.insert(phase.phase_id.as_str()) {
            return Err(ScriptError::Validation(format!(
                "duplicate phase id: '{}'",
                phase.phase_id
            )));
        }
        check_declarations(
            "phase",
            &phase.phase_id,
            &phase.declare,
            &[VariableScope::Phase],
        )?;

        for topic in &phase.topics {
            check_id("topic", &topic.topic_id)?;
            if !topic_ids.insert(topic.topic_id.as_str()) {
                return Err(ScriptError::Validation(format!(
                    "duplicate topic id: '{}'",
                    topic.topic_id
                )));
            }
            check_declarations(
                "topic",
                &topic.topic_id,
                &topic.declare,
                &[VariableScope::Topic],
            )?;

            for action in &topic.actions {
                check_id("action", &action.action_id)?;
                if !action_ids.insert(action.action_id.as_str()) {
                    return Err(ScriptError::Validation(format!(
                        "duplicate action id: '{}'",
                        action.action_id
                    )));
                }
                if action.action_type.parse::<ActionKind>().is_err() {
                    return Err(ScriptError::Validation(format!(
                        "action '{}' has unknown type '{}'",
                        action.action_id, action.action_type
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
session:
  session_id: intake
  template_scheme: cbt
  declare:
    - var: user_name
      scope: global
    - var: goal
  phases:
    - phase_id: p1
      declare:
        - var: mood
      topics:
        - topic_id: t1
          actions:
            - action_id: greet
              action_type: ai_say
              content: "Hello {user_name}"
              config:
                require_acknowledgment: false
            - action_id: ask_goal
              action_type: ai_ask
              config:
                question_template: "What brings you here?"
                target_variable: goal
"#;

    #[test]
    fn test_parse_yaml_script() {
        let session = parse_script(SCRIPT).unwrap();
        assert_eq!(session.session_id, "intake");
        assert_eq!(session.template_scheme.as_deref(), Some("cbt"));
        assert_eq!(session.declare.len(), 2);
        assert_eq!(session.declare[0].scope, Some(VariableScope::Global));
        assert_eq!(session.action_count(), 2);

        let greet = &session.phases[0].topics[0].actions[0];
        let merged = greet.merged_config();
        assert_eq!(merged["content"], "Hello {user_name}");
        assert_eq!(merged["require_acknowledgment"], false);
    }

    #[test]
    fn test_parse_json_script() {
        let json = r#"{"session": {"session_id": "s", "phases": [{"phase_id": "p", "topics": []}]}}"#;
        let session = parse_script(json).unwrap();
        assert_eq!(session.phases.len(), 1);
        assert_eq!(session.action_count(), 0);
    }

    #[test]
    fn test_parse_rejects_malformed_text() {
        let err = parse_script("session: [unclosed").unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)), "got: {err}");
    }

    #[test]
    fn test_validation_rejects_unknown_action_type() {
        let text = SCRIPT.replace("action_type: ai_say", "action_type: ai_sing");
        let err = parse_script(&text).unwrap_err();
        assert!(err.to_string().contains("unknown type 'ai_sing'"), "got: {err}");
    }

    #[test]
    fn test_validation_rejects_duplicate_action_ids() {
        let text = SCRIPT.replace("action_id: ask_goal", "action_id: greet");
        let err = parse_script(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate action id"), "got: {err}");
    }

    #[test]
    fn test_validation_rejects_misplaced_scope() {
        let text = SCRIPT.replace("        - var: mood", "        - var: mood\n          scope: global");
        let err = parse_script(&text).unwrap_err();
        assert!(err.to_string().contains("cannot declare 'mood'"), "got: {err}");
    }

    #[test]
    fn test_load_script_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intake.yaml");
        std::fs::write(&path, SCRIPT).unwrap();
        let session = load_script_file(&path).unwrap();
        assert_eq!(session.session_id, "intake");

        let missing = load_script_file(&dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(missing, ScriptError::Io(_)));
    }
}
