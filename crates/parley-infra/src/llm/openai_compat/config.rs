//! Connection settings for an OpenAI-compatible endpoint.

use std::time::Duration;

use secrecy::SecretString;

use parley_types::config::ProviderSettings;
use parley_types::llm::ProviderCapabilities;

/// Default OpenAI base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Configuration for an [`super::OpenAiCompatibleProvider`].
///
/// Does not derive Debug so the API key never lands in logs.
pub struct OpenAiCompatConfig {
    /// Name the provider is registered under (e.g., "openai").
    pub provider_name: String,
    pub base_url: String,
    pub api_key: SecretString,
    /// Model used when a request leaves `model` empty.
    pub model: String,
    /// Upper bound on a single completion call.
    pub timeout: Duration,
    pub capabilities: ProviderCapabilities,
}

impl OpenAiCompatConfig {
    /// Build from the `[provider]` table of `config.toml`.
    pub fn from_settings(settings: &ProviderSettings, api_key: SecretString) -> Self {
        Self {
            provider_name: settings.name.clone(),
            base_url: match settings.base_url.trim().trim_end_matches('/') {
                "" => OPENAI_BASE_URL.to_string(),
                url => url.to_string(),
            },
            api_key,
            model: settings.model.clone(),
            timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
            capabilities: ProviderCapabilities {
                max_context_tokens: 128_000,
                max_output_tokens: settings.max_tokens.max(1),
            },
        }
    }
}
