//! Parley CLI entry point.
//!
//! Binary name: `parley`
//!
//! Parses CLI arguments, sets up tracing, wires the session service, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use parley_observe::{TracingOptions, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingOptions {
        verbosity: cli.verbose,
        quiet: cli.quiet,
        json: cli.json,
        enable_otel: cli.otel,
    })?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        // Commands that never talk to a provider skip state setup.
        Commands::Completions { shell } => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            generate(shell, &mut cmd, "parley", &mut std::io::stdout());
        }

        Commands::Validate { script } => {
            cli::script::validate(&script, cli.json)?;
        }

        Commands::Vars { session, scope } => {
            cli::vars::show(&session, scope.as_deref(), cli.json).await?;
        }

        Commands::Run {
            script,
            session,
            input,
            globals,
            session_vars,
        } => {
            let state = AppState::init(cli.data_dir.as_deref()).await?;
            cli::session::run(
                &state,
                &script,
                &session,
                input,
                cli::to_map(globals),
                cli::to_map(session_vars),
                cli.json,
            )
            .await?;
        }

        Commands::Chat {
            script,
            session,
            globals,
        } => {
            let state = AppState::init(cli.data_dir.as_deref()).await?;
            cli::chat::loop_runner::run_chat_loop(&state, &script, session, cli::to_map(globals))
                .await?;
        }
    }
    Ok(())
}
