//! Global configuration loader for Parley.
//!
//! Reads `config.toml` from the data directory (`~/.parley/` unless
//! `PARLEY_DATA_DIR` points elsewhere) and deserializes it into
//! [`GlobalConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use parley_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PARLEY_DATA_DIR";

const CONFIG_FILE: &str = "config.toml";

/// Resolve the data directory: `$PARLEY_DATA_DIR`, else `~/.parley`,
/// else `./.parley` when no home directory is known.
pub fn resolve_data_dir() -> PathBuf {
    data_dir_from(std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
}

fn data_dir_from(explicit: Option<PathBuf>) -> PathBuf {
    match explicit.filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir,
        None => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".parley"),
    }
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - Missing file: [`GlobalConfig::default()`].
/// - Unreadable or unparsable file: a warning, then the default.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

/// Template root: the configured one (relative paths resolve against the
/// data directory), or `{data_dir}/templates` when that exists.
pub fn resolve_template_root(config: &GlobalConfig, data_dir: &Path) -> Option<PathBuf> {
    match &config.templates.root {
        Some(root) if root.is_absolute() => Some(root.clone()),
        Some(root) => Some(data_dir.join(root)),
        None => {
            let candidate = data_dir.join("templates");
            candidate.is_dir().then_some(candidate)
        }
    }
}
