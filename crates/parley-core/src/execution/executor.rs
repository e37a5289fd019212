//! The script executor: walks the phase/topic/action tree one call at a time.
//!
//! A call resumes the in-flight action (if any) with the user's input, then
//! keeps executing actions in declared order until one asks for more input,
//! one fails, or the tree is exhausted. Everything needed to continue is
//! left in the [`ExecutionState`].

use chrono::Utc;
use serde_json::{Map, Value};
use thiserror::Error;

use parley_types::action::ActionResult;
use parley_types::execution::{
    ExecutionPosition, ExecutionState, ExecutionStatus, ExitDecisionRecord, HistoryEntry,
    MetricsRecord, RoundInfo,
};
use parley_types::script::{ActionDefinition, SessionDefinition, VariableDeclaration};
use parley_types::variable::{
    SOURCE_DECLARATION, ScopePosition, VariableDefinition, VariableScope,
};

use crate::action::{Action, ActionContext, ActionError, ActionFactory, ActionServices};
use crate::script::ScriptError;
use crate::variable::ScopeResolver;

/// Failures that stop a call outright.
///
/// Action-level failures are not errors here: they put the state into
/// `error` status and the call returns normally.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

/// Stateless traversal engine. Safe to share across sessions.
#[derive(Clone)]
pub struct ScriptExecutor {
    factory: ActionFactory,
}

/// Where the tree walk landed after normalizing the position.
enum Slot<'s> {
    Action {
        phase_id: &'s str,
        topic_id: &'s str,
        phase_declare: &'s [VariableDeclaration],
        topic_declare: &'s [VariableDeclaration],
        action: &'s ActionDefinition,
    },
    Exhausted,
}

impl ScriptExecutor {
    pub fn new(factory: ActionFactory) -> Self {
        Self { factory }
    }

    pub fn from_services(services: ActionServices) -> Self {
        Self::new(ActionFactory::new(services))
    }

    pub fn factory(&self) -> &ActionFactory {
        &self.factory
    }

    /// Run one call against `state`.
    ///
    /// On a fatal error the state is put into `error` status with
    /// `metadata.error` set before the error is returned.
    pub async fn execute(
        &self,
        session: &SessionDefinition,
        session_id: &str,
        state: &mut ExecutionState,
        user_input: Option<&str>,
    ) -> Result<(), ExecutorError> {
        let outcome = self.run(session, session_id, state, user_input).await;
        if let Err(e) = &outcome {
            tracing::error!(session_id, error = %e, "script execution failed");
            state.status = ExecutionStatus::Error;
            state.metadata.error = Some(e.to_string());
        }
        outcome
    }

    async fn run(
        &self,
        session: &SessionDefinition,
        session_id: &str,
        state: &mut ExecutionState,
        user_input: Option<&str>,
    ) -> Result<(), ExecutorError> {
        self.prepare(session, state);

        let mut input = user_input.map(str::trim).filter(|s| !s.is_empty());

        let mut in_flight = match &state.metadata.action_state {
            Some(snapshot) => Some(self.factory.thaw(snapshot)?),
            None => None,
        };

        loop {
            let (phase_id, topic_id, phase_declare, topic_declare, definition) =
                match locate(session, &mut state.position) {
                    Slot::Action {
                        phase_id,
                        topic_id,
                        phase_declare,
                        topic_declare,
                        action,
                    } => (phase_id, topic_id, phase_declare, topic_declare, action),
                    Slot::Exhausted => {
                        state.status = ExecutionStatus::Completed;
                        state.position.clear_ids();
                        state.metadata.action_state = None;
                        tracing::info!(session_id, "script completed");
                        return Ok(());
                    }
                };

            state.position.phase_id = Some(phase_id.to_string());
            state.position.topic_id = Some(topic_id.to_string());
            state.position.action_id = Some(definition.action_id.clone());
            state.position.action_type = Some(definition.action_type.clone());
            let position = state.position.scope_position();

            {
                let mut resolver =
                    ScopeResolver::new(&mut state.variable_store, &mut state.variable_definitions);
                apply_declarations(&mut resolver, phase_declare, VariableScope::Phase, &position);
                apply_declarations(&mut resolver, topic_declare, VariableScope::Topic, &position);
                let operations = resolver.take_variable_operations();
                state.metadata.variable_operations.extend(operations);
            }

            let mut action = match in_flight.take() {
                Some(action) if action.action_id() == definition.action_id => action,
                Some(stale) => {
                    tracing::warn!(
                        frozen = %stale.action_id(),
                        current = %definition.action_id,
                        "frozen action does not match position, starting fresh"
                    );
                    self.factory.create(definition)?
                }
                None => self.factory.create(definition)?,
            };

            tracing::debug!(
                session_id,
                phase = phase_id,
                topic = topic_id,
                action = %definition.action_id,
                round = action.current_round(),
                "executing action"
            );

            // Input counts as history only once an action will consume it.
            if let Some(text) = input {
                state.conversation_history.push(HistoryEntry::user(text));
            }

            let result = {
                let mut resolver =
                    ScopeResolver::new(&mut state.variable_store, &mut state.variable_definitions);
                let result = {
                    let mut ctx = ActionContext {
                        session_id,
                        position: position.clone(),
                        resolver: &mut resolver,
                        history: &state.conversation_history,
                        session_config: &state.metadata.session_config,
                    };
                    action.execute(&mut ctx, input.take()).await
                };
                let operations = resolver.take_variable_operations();
                state.metadata.variable_operations.extend(operations);
                result
            };

            if !result.success {
                let message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("action '{}' failed", definition.action_id));
                tracing::warn!(session_id, action = %definition.action_id, error = %message, "action failed");
                state.status = ExecutionStatus::Error;
                state.metadata.error = Some(message);
                return Ok(());
            }

            write_variables(state, &position, &definition.action_id, &result.extracted_variables);
            record_round(state, &action, &result);

            if !result.completed {
                state.status = ExecutionStatus::WaitingInput;
                state.metadata.action_state = Some(action.freeze());
                tracing::debug!(
                    session_id,
                    action = %definition.action_id,
                    round = action.current_round(),
                    "waiting for input"
                );
                return Ok(());
            }

            if result.metadata.has_round_info() {
                state.metadata.last_action_round_info = Some(round_info(&action, &result));
            }
            state.metadata.action_state = None;
            state.position.action_index += 1;
        }
    }

    /// Per-call setup: legacy migration, session config, session-level
    /// declarations.
    fn prepare(&self, session: &SessionDefinition, state: &mut ExecutionState) {
        state.status = ExecutionStatus::Running;
        state.metadata.error = None;
        state.metadata.variable_operations.clear();
        state.last_ai_message = None;
        state.metadata.session_config.template_scheme = session.template_scheme.clone();

        let legacy = std::mem::take(&mut state.variables);
        let mut resolver =
            ScopeResolver::new(&mut state.variable_store, &mut state.variable_definitions);
        if !legacy.is_empty() {
            resolver.migrate_to_variable_store(legacy);
        }
        apply_declarations(
            &mut resolver,
            &session.declare,
            VariableScope::Session,
            &ScopePosition::default(),
        );

        let report = resolver.validate_store_structure();
        for error in &report.errors {
            tracing::warn!(%error, "inconsistent variable store");
        }
        let operations = resolver.take_variable_operations();
        state.metadata.variable_operations.extend(operations);
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Move `position` forward past empty topics and phases until it points at
/// an action or falls off the end of the tree.
fn locate<'s>(session: &'s SessionDefinition, position: &mut ExecutionPosition) -> Slot<'s> {
    loop {
        let Some(phase) = session.phases.get(position.phase_index) else {
            return Slot::Exhausted;
        };
        let Some(topic) = phase.topics.get(position.topic_index) else {
            position.phase_index += 1;
            position.topic_index = 0;
            position.action_index = 0;
            continue;
        };
        let Some(action) = topic.actions.get(position.action_index) else {
            position.topic_index += 1;
            position.action_index = 0;
            continue;
        };
        return Slot::Action {
            phase_id: &phase.phase_id,
            topic_id: &topic.topic_id,
            phase_declare: &phase.declare,
            topic_declare: &topic.declare,
            action,
        };
    }
}

// ---------------------------------------------------------------------------
// Bookkeeping
// ---------------------------------------------------------------------------

/// Register declarations as definitions and seed declared values.
fn apply_declarations(
    resolver: &mut ScopeResolver<'_>,
    declarations: &[VariableDeclaration],
    default_scope: VariableScope,
    position: &ScopePosition,
) {
    resolver.set_variable_definitions(declarations.iter().map(|decl| VariableDefinition {
        name: decl.var.clone(),
        scope: decl.scope.unwrap_or(default_scope),
        define: decl.define.clone(),
    }));
    for decl in declarations {
        let scope = decl.scope.unwrap_or(default_scope);
        let Some(value) = &decl.value else { continue };
        match resolver.seed_if_absent(&decl.var, value.clone(), scope, position, SOURCE_DECLARATION) {
            Ok(true) => tracing::debug!(variable = %decl.var, %scope, "seeded declared value"),
            Ok(false) => {}
            Err(e) => tracing::warn!(variable = %decl.var, error = %e, "declared value skipped"),
        }
    }
}

fn write_variables(
    state: &mut ExecutionState,
    position: &ScopePosition,
    action_id: &str,
    variables: &Map<String, Value>,
) {
    if variables.is_empty() {
        return;
    }
    let mut resolver =
        ScopeResolver::new(&mut state.variable_store, &mut state.variable_definitions);
    for (name, value) in variables {
        if let Err(e) = resolver.set_in_determined_scope(name, value.clone(), position, Some(action_id)) {
            tracing::warn!(variable = %name, action = action_id, error = %e, "variable write skipped");
        }
    }
    let operations = resolver.take_variable_operations();
    state.metadata.variable_operations.extend(operations);
}

fn round_info(action: &Action, result: &ActionResult) -> RoundInfo {
    RoundInfo {
        action_id: Some(action.action_id().to_string()),
        current_round: result.metadata.current_round.unwrap_or(action.current_round()),
        max_rounds: result.metadata.max_rounds.unwrap_or(action.max_rounds()),
        last_updated: Utc::now(),
    }
}

/// History, last message, round info, exit decision and metrics for one round.
fn record_round(state: &mut ExecutionState, action: &Action, result: &ActionResult) {
    let action_id = action.action_id().to_string();
    let round = result.metadata.current_round.unwrap_or(action.current_round());

    if let Some(message) = result.ai_message.as_deref().filter(|m| !m.is_empty()) {
        state.conversation_history.push(HistoryEntry::assistant(
            message,
            action_id.clone(),
            result.metadata.clone(),
        ));
        state.last_ai_message = Some(message.to_string());
    }
    if let Some(debug_info) = &result.debug_info {
        state.last_debug_info = Some(debug_info.clone());
    }

    if result.metadata.has_round_info() {
        state
            .metadata
            .action_round_info
            .insert(action_id.clone(), round_info(action, result));
    }
    if let Some(decision) = &result.metadata.exit_decision {
        state.metadata.exit_decisions.push(ExitDecisionRecord {
            action_id: action_id.clone(),
            round,
            decision: decision.clone(),
            timestamp: Utc::now(),
        });
    }
    if let Some(metrics) = &result.metrics {
        state.metadata.action_metrics_history.push(MetricsRecord {
            action_id,
            round,
            metrics: metrics.clone(),
            progress_suggestion: result.progress_suggestion,
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::services;
    use crate::llm::mock::ScriptedProvider;
    use crate::script::parse_script;
    use parley_types::exit::DecisionSource;
    use parley_types::llm::MessageRole;
    use serde_json::json;

    fn executor(provider: &ScriptedProvider) -> ScriptExecutor {
        ScriptExecutor::from_services(services(provider))
    }

    /// P phases x T topics x A non-waiting say actions.
    fn grid_script(phases: usize, topics: usize, actions: usize) -> SessionDefinition {
        let mut yaml = String::from("session:\n  session_id: grid\n  phases:\n");
        for p in 0..phases {
            yaml.push_str(&format!("    - phase_id: p{p}\n      topics:\n"));
            for t in 0..topics {
                yaml.push_str(&format!("        - topic_id: p{p}t{t}\n          actions:\n"));
                for a in 0..actions {
                    yaml.push_str(&format!(
                        "            - action_id: p{p}t{t}a{a}\n              action_type: ai_say\n              content: \"step {a}\"\n              rewrite: false\n              require_acknowledgment: false\n"
                    ));
                }
            }
        }
        parse_script(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_traversal_visits_every_action_in_one_call() {
        let provider = ScriptedProvider::named("scripted");
        let session = grid_script(2, 2, 3);
        let mut state = ExecutionState::new();

        executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.conversation_history.len(), 12);
        assert!(state.position.action_id.is_none());
        assert!(state.metadata.action_state.is_none());
        assert_eq!(state.last_ai_message.as_deref(), Some("step 2"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_topics_and_phases_are_skipped() {
        let session = parse_script(
            r#"
session:
  session_id: sparse
  phases:
    - phase_id: empty
      topics: []
    - phase_id: p2
      topics:
        - topic_id: blank
          actions: []
        - topic_id: t2
          actions:
            - action_id: only
              action_type: ai_say
              content: "hello"
              rewrite: false
              require_acknowledgment: false
"#,
        )
        .unwrap();
        let provider = ScriptedProvider::named("scripted");
        let mut state = ExecutionState::new();
        executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.conversation_history.len(), 1);
        assert_eq!(state.conversation_history[0].action_id.as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn test_single_round_say_completes_in_first_call() {
        let session = parse_script(
            r#"
session:
  session_id: one
  phases:
    - phase_id: p
      topics:
        - topic_id: t
          actions:
            - action_id: intro
              action_type: ai_say
              content: "Welcome"
              max_rounds: 1
              require_acknowledgment: false
"#,
        )
        .unwrap();
        let provider = ScriptedProvider::with_replies([r#"{"content": "Welcome in!"}"#]);
        let mut state = ExecutionState::new();
        executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.conversation_history.len(), 1);
        let info = state.metadata.last_action_round_info.as_ref().unwrap();
        assert_eq!((info.current_round, info.max_rounds), (1, 1));
        assert_eq!(
            state.metadata.exit_decisions[0].decision.decision_source,
            DecisionSource::MaxRounds
        );
    }

    const ASK_SCRIPT: &str = r#"
session:
  session_id: intake
  declare:
    - var: user_name
      scope: global
      value: "friend"
  phases:
    - phase_id: p1
      topics:
        - topic_id: t1
          actions:
            - action_id: ask_sleep
              action_type: ai_ask
              config:
                question_template: "Ask {user_name} about sleep"
                output:
                  - get: sleep_hours
                max_rounds: 3
            - action_id: wrap
              action_type: ai_say
              content: "Thanks, {user_name}. You sleep {sleep_hours} hours."
              rewrite: false
              require_acknowledgment: false
"#;

    #[tokio::test]
    async fn test_resume_across_calls_through_snapshot() {
        let session = parse_script(ASK_SCRIPT).unwrap();
        let provider = ScriptedProvider::with_replies([
            r#"{"content": "How long do you sleep?", "EXIT": "false"}"#,
            r#"{"content": "Noted.", "EXIT": "true", "sleep_hours": 7}"#,
        ]);
        let exec = executor(&provider);

        let mut state = ExecutionState::new();
        exec.execute(&session, "s1", &mut state, None).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::WaitingInput);
        assert_eq!(state.last_ai_message.as_deref(), Some("How long do you sleep?"));
        let snapshot = state.metadata.action_state.clone().unwrap();
        assert_eq!(snapshot.action_id, "ask_sleep");
        assert_eq!(snapshot.current_round, 1);
        assert!(provider.requests()[0].messages[0].content.contains("Ask friend about sleep"));

        // Persist and reload between calls.
        let mut state = ExecutionState::from_json(&state.to_json().unwrap()).unwrap();
        exec.execute(&session, "s1", &mut state, Some("seven hours"))
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        let topic = &state.variable_store.topic["t1"];
        assert_eq!(topic["sleep_hours"].value, json!(7));
        assert_eq!(topic["sleep_hours"].source, "ask_sleep");
        assert_eq!(
            state.last_ai_message.as_deref(),
            Some("Thanks, friend. You sleep 7 hours.")
        );
        let roles: Vec<MessageRole> = state.conversation_history.iter().map(|e| e.role.clone()).collect();
        assert_eq!(
            roles,
            vec![MessageRole::Assistant, MessageRole::User, MessageRole::Assistant]
        );
        assert_eq!(state.variable_definitions["sleep_hours"].scope, VariableScope::Topic);
    }

    #[tokio::test]
    async fn test_unknown_action_type_sets_error_status() {
        let mut session = parse_script(ASK_SCRIPT).unwrap();
        session.phases[0].topics[0].actions[0].action_type = "ai_unknown".into();
        let provider = ScriptedProvider::named("scripted");
        let mut state = ExecutionState::new();

        let err = executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Action(ActionError::UnknownActionType(_))));
        assert_eq!(state.status, ExecutionStatus::Error);
        assert!(state.metadata.error.unwrap().contains("ai_unknown"));
    }

    #[tokio::test]
    async fn test_action_failure_halts_traversal() {
        let session = parse_script(ASK_SCRIPT).unwrap();
        let provider = ScriptedProvider::named("scripted");
        provider.push_error("provider down");
        let mut state = ExecutionState::new();

        executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap();
        assert_eq!(state.status, ExecutionStatus::Error);
        assert!(state.metadata.error.unwrap().starts_with("ai_ask execution error"));
        assert_eq!(state.position.action_id.as_deref(), Some("ask_sleep"));
    }

    #[tokio::test]
    async fn test_legacy_variables_are_migrated() {
        let session = grid_script(1, 1, 1);
        let provider = ScriptedProvider::named("scripted");
        let mut state = ExecutionState::new();
        state.variables.insert("legacy".into(), json!("value"));

        executor(&provider)
            .execute(&session, "s1", &mut state, None)
            .await
            .unwrap();
        assert!(state.variables.is_empty());
        assert_eq!(state.variable_store.session["legacy"].source, "migrated");
    }

    #[tokio::test]
    async fn test_user_input_is_recorded_once() {
        let session = parse_script(ASK_SCRIPT).unwrap();
        let provider = ScriptedProvider::with_replies([
            r#"{"content": "Q1"}"#,
            r#"{"content": "Q2", "EXIT": "false"}"#,
        ]);
        let exec = executor(&provider);
        let mut state = ExecutionState::new();
        exec.execute(&session, "s1", &mut state, None).await.unwrap();
        exec.execute(&session, "s1", &mut state, Some("  answer  "))
            .await
            .unwrap();

        let users: Vec<&str> = state
            .conversation_history
            .iter()
            .filter(|e| e.role == MessageRole::User)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(users, vec!["answer"]);
        assert_eq!(state.status, ExecutionStatus::WaitingInput);
        assert_eq!(state.metadata.action_round_info["ask_sleep"].current_round, 2);
    }

    #[tokio::test]
    async fn test_input_after_completion_leaves_history_alone() {
        let session = grid_script(1, 1, 1);
        let provider = ScriptedProvider::named("scripted");
        let exec = executor(&provider);
        let mut state = ExecutionState::new();
        exec.execute(&session, "s1", &mut state, None).await.unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
        let before = state.conversation_history.len();

        exec.execute(&session, "s1", &mut state, Some("still there?"))
            .await
            .unwrap();
        exec.execute(&session, "s1", &mut state, Some("hello?"))
            .await
            .unwrap();

        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.conversation_history.len(), before);
        assert!(state
            .conversation_history
            .iter()
            .all(|e| e.role != MessageRole::User));
    }

    #[tokio::test]
    async fn test_variable_writes_are_kept_per_call() {
        let session = parse_script(ASK_SCRIPT).unwrap();
        let provider = ScriptedProvider::with_replies([
            r#"{"content": "How long do you sleep?", "EXIT": "false"}"#,
            r#"{"content": "Noted.", "EXIT": "true", "sleep_hours": 7}"#,
        ]);
        let exec = executor(&provider);

        let mut state = ExecutionState::new();
        exec.execute(&session, "s1", &mut state, None).await.unwrap();
        let ops = &state.metadata.variable_operations;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].variable_name, "user_name");
        assert_eq!(ops[0].scope, VariableScope::Global);
        assert_eq!(ops[0].source, SOURCE_DECLARATION);
        assert_eq!(state.variable_definitions["user_name"].scope, VariableScope::Global);

        let mut state = ExecutionState::from_json(&state.to_json().unwrap()).unwrap();
        assert_eq!(state.metadata.variable_operations.len(), 1);
        exec.execute(&session, "s1", &mut state, Some("seven hours"))
            .await
            .unwrap();

        let names: Vec<&str> = state
            .metadata
            .variable_operations
            .iter()
            .map(|op| op.variable_name.as_str())
            .collect();
        assert_eq!(names, vec!["sleep_hours"]);
        let op = &state.metadata.variable_operations[0];
        assert_eq!(op.value, json!(7));
        assert_eq!(op.source, "ask_sleep");
        assert_eq!(op.scope, VariableScope::Topic);
    }
}
