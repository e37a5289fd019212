//! Script documents: parsing, validation, loading.

pub mod definition;

pub use definition::{ScriptError, load_script_file, parse_script, validate_script};
