//! Turn loop for `parley chat`.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use console::style;
use serde_json::{Map, Value};
use tracing::{debug, info};

use parley_core::session::{SessionOutcome, build_response};
use parley_types::execution::ExecutionStatus;

use crate::cli::script;
use crate::cli::session::{self, SavedSession, format_response, load_session, save_session};
use crate::cli::vars::{collect_rows, parse_scope, render_table};
use crate::state::AppState;

use super::banner::print_welcome_banner;
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};

/// Run a script interactively until it finishes or the user leaves.
///
/// With `session_path`, an unfinished session stored there is resumed and
/// every turn is written back to it.
pub async fn run_chat_loop(
    state: &AppState,
    script_path: &Path,
    session_path: Option<PathBuf>,
    globals: Map<String, Value>,
) -> Result<()> {
    let definition = script::load(script_path)?;

    let resumable = match &session_path {
        Some(path) => load_session(path)
            .await?
            .filter(|saved| !saved.state.status.is_terminal()),
        None => None,
    };

    let resumed = resumable.is_some();
    let mut current = match resumable {
        Some(saved) => {
            info!(session_id = %saved.session_id, "resuming chat session");
            print_welcome_banner(&definition, &saved.session_id, true);
            if let Some(message) = &saved.state.last_ai_message {
                println!("  {} {}", style("AI").cyan().bold(), message);
                println!();
            }
            saved
        }
        None => {
            let (session_id, outcome) =
                session::initialize(state, script_path, globals.clone(), Map::new()).await?;
            print_welcome_banner(&definition, &session_id, false);
            print!("{}", format_response(&outcome.response));
            persist(session_path.as_deref(), outcome).await?
        }
    };
    debug!(resumed, session_id = %current.session_id, "chat session ready");

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut chat_input, mut writer) =
        ChatInput::new(prompt).map_err(|e| anyhow!("failed to initialize input: {e}"))?;

    while !current.state.status.is_terminal() {
        let text = match chat_input.read_line().await {
            InputEvent::Eof => break,
            InputEvent::Interrupted => {
                writeln!(writer, "  {}", style("Press Ctrl+D to exit, or keep chatting.").dim())?;
                continue;
            }
            InputEvent::Line(text) if text.is_empty() => continue,
            InputEvent::Line(text) => text,
        };

        if let Some(cmd) = commands::parse(&text) {
            match cmd {
                ChatCommand::Help => commands::print_help(),
                ChatCommand::Clear => chat_input.clear(),
                ChatCommand::Exit => break,
                ChatCommand::Vars(scope) => match parse_scope(scope.as_deref()) {
                    Ok(filter) => {
                        let rows = collect_rows(&current.state.variable_store, filter);
                        if rows.is_empty() {
                            writeln!(writer, "  {}", style("No variables stored.").dim())?;
                        } else {
                            writeln!(writer, "{}", render_table(&rows))?;
                        }
                    }
                    Err(e) => writeln!(writer, "  {} {e}", style("?").yellow().bold())?,
                },
                ChatCommand::Status => {
                    let mut status =
                        build_response(&current.session_id, &mut current.state, None);
                    status.ai_message = None;
                    write!(writer, "{}", format_response(&status))?;
                }
                ChatCommand::Unknown(name) => writeln!(
                    writer,
                    "  {} Unknown command: {}. Type /help for available commands.",
                    style("?").yellow().bold(),
                    style(name).dim()
                )?,
            }
            continue;
        }

        let outcome =
            session::advance(state, script_path, current, text, globals.clone()).await?;
        write!(writer, "{}", format_response(&outcome.response))?;
        current = persist(session_path.as_deref(), outcome).await?;
    }

    chat_input.finish();
    match current.state.status {
        ExecutionStatus::Completed => println!("\n  {}", style("Script completed.").green()),
        ExecutionStatus::Error => println!("\n  {}", style("Session stopped on an error.").red()),
        _ => println!("\n  {}", style("Session ended.").dim()),
    }
    if let Some(path) = &session_path {
        println!("  {}", style(format!("Saved to {}", path.display())).dim());
    }
    println!();
    Ok(())
}

async fn persist(path: Option<&Path>, outcome: SessionOutcome) -> Result<SavedSession> {
    let saved = SavedSession {
        session_id: outcome.response.session_id,
        state: outcome.state,
    };
    if let Some(path) = path {
        save_session(path, &saved).await?;
    }
    Ok(saved)
}
