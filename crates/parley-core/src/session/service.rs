//! Session service: the caller-facing entry points around the executor.
//!
//! Turns requests into executor calls and builds the flattened response.
//! Every failure becomes a response with status `error` and an
//! `EXECUTION_ERROR` body; the service itself never returns `Err`.

use std::time::Instant;

use serde_json::{Map, Value};

use parley_types::execution::{ExecutionState, ExecutionStatus};
use parley_types::session::{
    InitializeSessionRequest, ProcessInputRequest, SessionErrorBody, SessionPosition,
    SessionResponse,
};
use parley_types::variable::{
    SOURCE_GLOBAL_SYNC, SOURCE_INITIALIZATION, VariableBucket, VariableScope, VariableValue,
};

use crate::execution::{ExecutorError, ScriptExecutor};
use crate::script::parse_script;
use crate::variable::ScopeResolver;

/// Calls slower than this are logged at warn level.
const SLOW_INIT_MS: u128 = 1_000;
const SLOW_TURN_MS: u128 = 2_000;

/// Response plus the state to persist for the next turn.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub response: SessionResponse,
    pub state: ExecutionState,
}

#[derive(Clone)]
pub struct SessionService {
    executor: ScriptExecutor,
}

impl SessionService {
    pub fn new(executor: ScriptExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &ScriptExecutor {
        &self.executor
    }

    /// Create a fresh state from the request and run until the first wait.
    pub async fn initialize_session(&self, request: InitializeSessionRequest) -> SessionOutcome {
        let started = Instant::now();
        let mut state = ExecutionState::new();
        state.variable_store.global =
            wrap_variables(request.global_variables, VariableScope::Global);
        state.variable_store.session =
            wrap_variables(request.session_variables, VariableScope::Session);
        state.conversation_history = request.conversation_history;

        tracing::info!(
            session_id = %request.session_id,
            globals = state.variable_store.global.len(),
            session_vars = state.variable_store.session.len(),
            history = state.conversation_history.len(),
            "initializing session"
        );

        let outcome = self
            .run(&request.session_id, &request.script_content, &mut state, None)
            .await;
        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_INIT_MS {
            tracing::warn!(session_id = %request.session_id, elapsed_ms = elapsed as u64, "slow session initialization");
        }
        finish(&request.session_id, state, outcome)
    }

    /// Resume a persisted state with one user turn.
    pub async fn process_user_input(&self, request: ProcessInputRequest) -> SessionOutcome {
        let started = Instant::now();
        let mut state = request.state;
        let synced = sync_globals(&mut state, request.global_variables);

        tracing::info!(
            session_id = %request.session_id,
            status = %state.status,
            phase = state.position.phase_index,
            topic = state.position.topic_index,
            action = state.position.action_index,
            input_chars = request.user_input.len(),
            synced,
            "processing user input"
        );

        let outcome = self
            .run(
                &request.session_id,
                &request.script_content,
                &mut state,
                Some(&request.user_input),
            )
            .await;
        let elapsed = started.elapsed().as_millis();
        if elapsed > SLOW_TURN_MS {
            tracing::warn!(session_id = %request.session_id, elapsed_ms = elapsed as u64, "slow user turn");
        }
        finish(&request.session_id, state, outcome)
    }

    async fn run(
        &self,
        session_id: &str,
        script_content: &str,
        state: &mut ExecutionState,
        user_input: Option<&str>,
    ) -> Result<(), ExecutorError> {
        let script = match parse_script(script_content) {
            Ok(script) => script,
            Err(e) => {
                state.status = ExecutionStatus::Error;
                state.metadata.error = Some(e.to_string());
                return Err(e.into());
            }
        };
        self.executor
            .execute(&script, session_id, state, user_input)
            .await
    }
}

fn wrap_variables(variables: Map<String, Value>, scope: VariableScope) -> VariableBucket {
    variables
        .into_iter()
        .map(|(name, value)| {
            let wrapped = VariableValue::new(value, scope, SOURCE_INITIALIZATION);
            (name, wrapped)
        })
        .collect()
}

/// Copy caller-supplied globals the store does not have yet.
fn sync_globals(state: &mut ExecutionState, globals: Map<String, Value>) -> usize {
    let mut synced = 0;
    for (name, value) in globals {
        if state.variable_store.global.contains_key(&name) {
            continue;
        }
        state.variable_store.global.insert(
            name,
            VariableValue::new(value, VariableScope::Global, SOURCE_GLOBAL_SYNC),
        );
        synced += 1;
    }
    synced
}

fn finish(
    session_id: &str,
    mut state: ExecutionState,
    outcome: Result<(), ExecutorError>,
) -> SessionOutcome {
    let error = match outcome {
        Ok(()) => state.metadata.error.clone().map(SessionErrorBody::execution),
        Err(e) => {
            tracing::error!(session_id, error = %e, "session call failed");
            Some(SessionErrorBody::execution(e.to_string()))
        }
    };
    let response = build_response(session_id, &mut state, error);
    SessionOutcome { response, state }
}

/// Flattened caller-facing view of `state`.
pub fn build_response(
    session_id: &str,
    state: &mut ExecutionState,
    error: Option<SessionErrorBody>,
) -> SessionResponse {
    let scope_position = state.position.scope_position();
    let variables = ScopeResolver::new(&mut state.variable_store, &mut state.variable_definitions)
        .flatten(&scope_position);

    let (current_round, max_rounds) = match (
        &state.metadata.action_state,
        &state.metadata.last_action_round_info,
    ) {
        (Some(snapshot), _) => (Some(snapshot.current_round), Some(snapshot.max_rounds)),
        (None, Some(info)) => (Some(info.current_round), Some(info.max_rounds)),
        (None, None) => (None, None),
    };

    SessionResponse {
        session_id: session_id.to_string(),
        status: state.status,
        position: SessionPosition {
            position: state.position.clone(),
            current_round,
            max_rounds,
        },
        variables,
        variable_store: state.variable_store.clone(),
        ai_message: state.last_ai_message.clone(),
        debug_info: state.last_debug_info.clone(),
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::testing::services;
    use crate::llm::mock::ScriptedProvider;
    use serde_json::json;

    const SCRIPT: &str = r#"
session:
  session_id: intake
  phases:
    - phase_id: p1
      topics:
        - topic_id: t1
          actions:
            - action_id: ask_name
              action_type: ai_ask
              config:
                question_template: "Ask the user for their name"
                target_variable: user_name
            - action_id: greet
              action_type: ai_say
              content: "Nice to meet you, {user_name}, from {city}."
              rewrite: false
              require_acknowledgment: false
"#;

    fn service(provider: &ScriptedProvider) -> SessionService {
        SessionService::new(ScriptExecutor::from_services(services(provider)))
    }

    fn init_request() -> InitializeSessionRequest {
        InitializeSessionRequest {
            session_id: "s1".into(),
            script_content: SCRIPT.into(),
            global_variables: json!({"city": "Lisbon"}).as_object().unwrap().clone(),
            session_variables: json!({"channel": "web"}).as_object().unwrap().clone(),
            conversation_history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_initialize_then_process_input() {
        let provider = ScriptedProvider::with_replies(["What should I call you?"]);
        let service = service(&provider);

        let first = service.initialize_session(init_request()).await;
        assert_eq!(first.response.status, ExecutionStatus::WaitingInput);
        assert_eq!(first.response.ai_message.as_deref(), Some("What should I call you?"));
        assert_eq!(first.response.position.current_round, Some(1));
        assert_eq!(first.response.variables["city"], "Lisbon");
        assert_eq!(
            first.state.variable_store.global["city"].source,
            SOURCE_INITIALIZATION
        );
        assert!(first.response.error.is_none());

        let second = service
            .process_user_input(ProcessInputRequest {
                session_id: "s1".into(),
                script_content: SCRIPT.into(),
                user_input: "Ada".into(),
                state: first.state,
                global_variables: json!({"city": "Porto", "lang": "en"})
                    .as_object()
                    .unwrap()
                    .clone(),
            })
            .await;

        assert_eq!(second.response.status, ExecutionStatus::Completed);
        assert_eq!(
            second.response.ai_message.as_deref(),
            Some("Nice to meet you, Ada, from Lisbon.")
        );
        let global = &second.state.variable_store.global;
        assert_eq!(global["city"].value, "Lisbon");
        assert_eq!(global["lang"].source, SOURCE_GLOBAL_SYNC);
        assert_eq!(second.response.variables["user_name"], "Ada");
        assert_eq!(second.response.variables["channel"], "web");
    }

    #[tokio::test]
    async fn test_invalid_script_maps_to_execution_error() {
        let provider = ScriptedProvider::named("scripted");
        let mut request = init_request();
        request.script_content = "session: [".into();

        let outcome = service(&provider).initialize_session(request).await;
        assert_eq!(outcome.response.status, ExecutionStatus::Error);
        let error = outcome.response.error.unwrap();
        assert_eq!(error.code, "EXECUTION_ERROR");
        assert!(error.message.contains("script parse error"));
    }

    #[tokio::test]
    async fn test_action_failure_is_reported() {
        let provider = ScriptedProvider::named("scripted");
        provider.push_error("provider unavailable");

        let outcome = service(&provider).initialize_session(init_request()).await;
        assert_eq!(outcome.response.status, ExecutionStatus::Error);
        let error = outcome.response.error.unwrap();
        assert!(error.message.contains("provider unavailable"), "got: {}", error.message);
    }

    #[test]
    fn test_flattened_variables_prefer_narrower_scope() {
        let mut state = ExecutionState::new();
        state.position.phase_id = Some("p1".into());
        state.position.topic_id = Some("t1".into());
        state.variable_store.global.insert(
            "mood".into(),
            VariableValue::new(json!("global"), VariableScope::Global, "test"),
        );
        state.variable_store.topic.entry("t1".into()).or_default().insert(
            "mood".into(),
            VariableValue::new(json!("topic"), VariableScope::Topic, "test"),
        );
        state.variable_store.topic.entry("t0".into()).or_default().insert(
            "earlier".into(),
            VariableValue::new(json!(1), VariableScope::Topic, "test"),
        );

        let response = build_response("s1", &mut state, None);
        assert_eq!(response.variables["mood"], "topic");
        assert_eq!(response.variables["earlier"], 1);
        assert_eq!(response.position.current_round, None);
    }
}
