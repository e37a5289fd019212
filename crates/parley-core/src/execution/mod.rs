//! Turn-by-turn traversal of a parsed script.

pub mod executor;

pub use executor::{ExecutorError, ScriptExecutor};
