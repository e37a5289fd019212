//! Global configuration types for Parley.
//!
//! `GlobalConfig` represents the top-level `config.toml` that selects the
//! LLM provider, the template root, and prompt-building limits.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.parley/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub provider: ProviderSettings,

    #[serde(default)]
    pub templates: TemplateSettings,

    /// Number of history entries included by `build_prompt`.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_history_window() -> usize {
    10
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            templates: TemplateSettings::default(),
            history_window: default_history_window(),
        }
    }
}

/// Settings for the OpenAI-compatible provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Name the provider is registered under.
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    25
}

fn default_temperature() -> f64 {
    0.7
}

fn default_max_tokens() -> u32 {
    1000
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Where prompt templates are read from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Directory containing `_system/config/{default,custom}`. When unset,
    /// the built-in templates are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.history_window, 10);
        assert_eq!(config.provider.request_timeout_secs, 25);
        assert_eq!(config.provider.api_key_env, "OPENAI_API_KEY");
        assert!(config.templates.root.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.history_window, 10);
        assert_eq!(config.provider.name, "openai");
        assert!((config.provider.temperature - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
history_window = 6

[provider]
name = "local"
base_url = "http://localhost:11434/v1"
model = "llama3"
api_key_env = "LOCAL_KEY"
request_timeout_secs = 60

[templates]
root = "/srv/parley/templates"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.history_window, 6);
        assert_eq!(config.provider.name, "local");
        assert_eq!(config.provider.model, "llama3");
        assert_eq!(config.provider.request_timeout_secs, 60);
        assert_eq!(config.provider.max_tokens, 1000);
        assert_eq!(
            config.templates.root,
            Some(PathBuf::from("/srv/parley/templates"))
        );
    }
}
