//! LLM provider implementations.
//!
//! Contains the OpenAI-compatible implementation of the [`LlmProvider`]
//! trait defined in `parley-core`, plus the factory functions that turn the
//! `[provider]` config table into a ready [`GenerationService`].
//!
//! [`LlmProvider`]: parley_core::llm::provider::LlmProvider

pub mod openai_compat;

use secrecy::SecretString;

use parley_core::llm::box_provider::BoxLlmProvider;
use parley_core::llm::generation::GenerationService;
use parley_types::config::GlobalConfig;
use parley_types::config::ProviderSettings;
use parley_types::llm::LlmError;

use self::openai_compat::OpenAiCompatibleProvider;
use self::openai_compat::config::OpenAiCompatConfig;

/// Create a [`BoxLlmProvider`] from provider settings.
///
/// # Errors
///
/// Returns [`LlmError::AuthenticationFailed`] when no API key is supplied.
pub fn create_provider(
    settings: &ProviderSettings,
    api_key: Option<SecretString>,
) -> Result<BoxLlmProvider, LlmError> {
    let key = api_key.ok_or(LlmError::AuthenticationFailed)?;
    let provider = OpenAiCompatibleProvider::new(OpenAiCompatConfig::from_settings(settings, key));
    tracing::debug!(
        provider = %settings.name,
        base_url = %settings.base_url,
        model = %settings.model,
        "created LLM provider"
    );
    Ok(BoxLlmProvider::new(provider))
}

/// Read the API key from the environment variable named in the settings.
///
/// Blank values count as missing.
pub fn api_key_from_env(settings: &ProviderSettings) -> Option<SecretString> {
    std::env::var(&settings.api_key_env)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// Build the generation service the engine runs on.
///
/// Registers the configured provider as the default and applies the
/// configured temperature, token limit and history window.
pub fn build_generation_service(
    config: &GlobalConfig,
    api_key: Option<SecretString>,
) -> Result<GenerationService, LlmError> {
    let provider = create_provider(&config.provider, api_key)?;
    Ok(GenerationService::single(provider)
        .with_defaults(config.provider.temperature, config.provider.max_tokens)
        .with_history_window(config.history_window))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_uses_configured_name() {
        let settings = ProviderSettings {
            name: "deepseek".into(),
            base_url: "https://api.deepseek.com/v1".into(),
            model: "deepseek-chat".into(),
            ..Default::default()
        };
        let provider = create_provider(&settings, Some(SecretString::from("sk-test"))).unwrap();
        assert_eq!(provider.name(), "deepseek");
    }

    #[test]
    fn test_create_provider_missing_key() {
        let result = create_provider(&ProviderSettings::default(), None);
        match result {
            Err(LlmError::AuthenticationFailed) => {}
            Err(other) => panic!("Expected AuthenticationFailed, got: {other}"),
            Ok(_) => panic!("Expected error but got Ok"),
        }
    }

    #[test]
    fn test_api_key_from_env_ignores_unset_variable() {
        let settings = ProviderSettings {
            api_key_env: "PARLEY_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(api_key_from_env(&settings).is_none());
    }

    #[test]
    fn test_build_generation_service_registers_default() {
        let config = GlobalConfig::default();
        let service =
            build_generation_service(&config, Some(SecretString::from("sk-test"))).unwrap();
        assert_eq!(service.registry().default_name(), Some("openai"));
    }
}
