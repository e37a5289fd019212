//! CLI command definitions for the `parley` binary.
//!
//! Uses clap derive macros for argument parsing. Each subcommand lives in
//! its own module.

pub mod chat;
pub mod script;
pub mod session;
pub mod vars;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use serde_json::{Map, Value};

/// Run LLM-driven conversation scripts.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Data directory holding config.toml and templates.
    #[arg(long, global = true, env = "PARLEY_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse and validate a script without running it.
    Validate {
        /// Script file (YAML or JSON).
        script: PathBuf,
    },

    /// Run one turn of a script against a saved session file.
    ///
    /// Without an existing session file the session is initialized;
    /// otherwise `--input` is fed to the waiting action.
    Run {
        /// Script file (YAML or JSON).
        script: PathBuf,

        /// Session file to load and save.
        #[arg(long, short = 's')]
        session: PathBuf,

        /// User input for this turn.
        #[arg(long, short = 'i')]
        input: Option<String>,

        /// Global variable as NAME=VALUE (repeatable).
        #[arg(long = "global", short = 'g', value_parser = parse_key_value)]
        globals: Vec<(String, Value)>,

        /// Session variable as NAME=VALUE (repeatable, initialization only).
        #[arg(long = "var", value_parser = parse_key_value)]
        session_vars: Vec<(String, Value)>,
    },

    /// Talk to a script interactively.
    Chat {
        /// Script file (YAML or JSON).
        script: PathBuf,

        /// Persist the session here after every turn.
        #[arg(long, short = 's')]
        session: Option<PathBuf>,

        /// Global variable as NAME=VALUE (repeatable).
        #[arg(long = "global", short = 'g', value_parser = parse_key_value)]
        globals: Vec<(String, Value)>,
    },

    /// Show the variable store of a saved session.
    Vars {
        /// Session file written by `run` or `chat`.
        session: PathBuf,

        /// Only show one scope (global, session, phase, topic).
        #[arg(long)]
        scope: Option<String>,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

/// Parse `NAME=VALUE`. The value is read as JSON when it parses, otherwise
/// kept as a plain string.
pub fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

/// Collect parsed pairs into a variable map; later pairs win.
pub fn to_map(pairs: Vec<(String, Value)>) -> Map<String, Value> {
    pairs.into_iter().collect()
}
