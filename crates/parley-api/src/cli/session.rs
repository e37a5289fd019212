//! Session files and the `parley run` command.
//!
//! A session file is the JSON form of [`SavedSession`]: the session id plus
//! the execution state to resume from. Nothing else is kept between turns.

use std::path::Path;

use anyhow::{Context, Result, bail};
use console::style;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use parley_core::session::SessionOutcome;
use parley_types::execution::{ExecutionState, ExecutionStatus};
use parley_types::session::{InitializeSessionRequest, ProcessInputRequest, SessionResponse};

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub session_id: String,
    pub state: ExecutionState,
}

impl SavedSession {
    pub fn new_id() -> String {
        uuid::Uuid::now_v7().to_string()
    }
}

/// Read a session file. `Ok(None)` when it does not exist yet.
pub async fn load_session(path: &Path) -> Result<Option<SavedSession>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let saved = serde_json::from_str(&content)
                .with_context(|| format!("invalid session file {}", path.display()))?;
            Ok(Some(saved))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
}

pub async fn save_session(path: &Path, saved: &SavedSession) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_string_pretty(saved)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn read_script(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read script {}", path.display()))
}

/// Start a new session. Returns the outcome and the id it was given.
pub async fn initialize(
    state: &AppState,
    script_path: &Path,
    globals: Map<String, Value>,
    session_vars: Map<String, Value>,
) -> Result<(String, SessionOutcome)> {
    let session_id = SavedSession::new_id();
    let outcome = state
        .session_service
        .initialize_session(InitializeSessionRequest {
            session_id: session_id.clone(),
            script_content: read_script(script_path).await?,
            global_variables: globals,
            session_variables: session_vars,
            conversation_history: Vec::new(),
        })
        .await;
    Ok((session_id, outcome))
}

/// Feed one user turn into a saved session.
pub async fn advance(
    state: &AppState,
    script_path: &Path,
    saved: SavedSession,
    input: String,
    globals: Map<String, Value>,
) -> Result<SessionOutcome> {
    Ok(state
        .session_service
        .process_user_input(ProcessInputRequest {
            session_id: saved.session_id,
            script_content: read_script(script_path).await?,
            user_input: input,
            state: saved.state,
            global_variables: globals,
        })
        .await)
}

/// `parley run`: one call, then persist.
pub async fn run(
    state: &AppState,
    script_path: &Path,
    session_path: &Path,
    input: Option<String>,
    globals: Map<String, Value>,
    session_vars: Map<String, Value>,
    json: bool,
) -> Result<()> {
    let outcome = match load_session(session_path).await? {
        None => {
            if input.is_some() {
                tracing::warn!("ignoring --input: a new session starts without user input");
            }
            initialize(state, script_path, globals, session_vars).await?.1
        }
        Some(saved) => {
            if saved.state.status.is_terminal() {
                bail!(
                    "session {} is already {}; delete {} to start over",
                    saved.session_id,
                    saved.state.status,
                    session_path.display()
                );
            }
            let Some(input) = input else {
                bail!("--input is required to continue session {}", saved.session_id);
            };
            advance(state, script_path, saved, input, globals).await?
        }
    };

    let SessionOutcome { response, state: exec_state } = outcome;
    save_session(
        session_path,
        &SavedSession {
            session_id: response.session_id.clone(),
            state: exec_state,
        },
    )
    .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }

    if let Some(error) = &response.error {
        bail!("{}: {}", error.code, error.message);
    }
    Ok(())
}

/// Human-readable rendering of one call's result.
pub fn print_response(response: &SessionResponse) {
    print!("{}", format_response(response));
}

pub fn format_response(response: &SessionResponse) -> String {
    let mut out = String::new();
    if let Some(message) = &response.ai_message {
        out.push_str(&format!("\n  {} {}\n", style("AI").cyan().bold(), message));
    }
    let status = match response.status {
        ExecutionStatus::WaitingInput => style("waiting for input").yellow(),
        ExecutionStatus::Completed => style("completed").green(),
        ExecutionStatus::Error => style("error").red(),
        ExecutionStatus::Running => style("running").dim(),
    };
    let position = &response.position;
    let location = match (
        &position.position.phase_id,
        &position.position.topic_id,
        &position.position.action_id,
    ) {
        (Some(p), Some(t), Some(a)) => format!("{p} / {t} / {a}"),
        _ => "end of script".to_string(),
    };
    let rounds = match (position.current_round, position.max_rounds) {
        (Some(c), Some(m)) => format!(" (round {c}/{m})"),
        _ => String::new(),
    };
    out.push_str(&format!(
        "\n  {} {}  {}{}\n",
        style("•").dim(),
        status,
        style(location).dim(),
        style(rounds).dim()
    ));
    if let Some(error) = &response.error {
        out.push_str(&format!(
            "  {} {}\n",
            style("!").red().bold(),
            style(&error.message).red()
        ));
    }
    out.push('\n');
    out
}
