//! Generation service: the single entry point actions use to call a model.
//!
//! Wraps a [`ProviderRegistry`], fills unset options from service-wide
//! defaults, and records a [`GenerationDebugInfo`] for every call.

use chrono::Utc;
use futures_util::future::join_all;

use parley_types::execution::HistoryEntry;
use parley_types::llm::{
    CompletionRequest, DebugResponse, GenerationDebugInfo, GenerationOptions, GenerationOutput,
    LlmError, Message, MessageRole,
};

use super::box_provider::BoxLlmProvider;
use super::registry::ProviderRegistry;

const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Named-provider generation front end.
///
/// Constructed once and shared behind `Arc`; holds no per-session state.
pub struct GenerationService {
    registry: ProviderRegistry,
    default_temperature: f64,
    default_max_tokens: u32,
    history_window: usize,
}

impl GenerationService {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            default_temperature: DEFAULT_TEMPERATURE,
            default_max_tokens: DEFAULT_MAX_TOKENS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Service over a single provider, registered under its own name.
    pub fn single(provider: BoxLlmProvider) -> Self {
        let mut registry = ProviderRegistry::new();
        registry.register(provider.name().to_string(), provider);
        Self::new(registry)
    }

    pub fn with_defaults(mut self, temperature: f64, max_tokens: u32) -> Self {
        self.default_temperature = temperature;
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    /// How many recent history entries a prompt may carry.
    pub fn history_window(&self) -> usize {
        self.history_window
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    fn resolve_provider(&self, name: Option<&str>) -> Result<&BoxLlmProvider, LlmError> {
        match name {
            Some(name) => self
                .registry
                .get(name)
                .ok_or_else(|| LlmError::ProviderNotFound(name.to_string())),
            None => self
                .registry
                .default_provider()
                .ok_or_else(|| LlmError::ProviderNotFound("<default>".to_string())),
        }
    }

    /// Generate text for a single prompt.
    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationOutput, LlmError> {
        let provider = self.resolve_provider(options.provider.as_deref())?;

        let resolved = GenerationOptions {
            temperature: Some(options.temperature.unwrap_or(self.default_temperature)),
            max_tokens: Some(options.max_tokens.unwrap_or(self.default_max_tokens)),
            model: options.model.clone(),
            provider: Some(provider.name().to_string()),
        };

        let request = CompletionRequest {
            model: resolved.model.clone().unwrap_or_default(),
            messages: vec![Message {
                role: MessageRole::User,
                content: prompt.to_string(),
            }],
            system: None,
            max_tokens: resolved.max_tokens.unwrap_or(self.default_max_tokens),
            temperature: resolved.temperature,
        };

        tracing::debug!(
            provider = provider.name(),
            prompt_chars = prompt.len(),
            max_tokens = request.max_tokens,
            "generating text"
        );

        let response = provider.complete(&request).await.inspect_err(|e| {
            tracing::warn!(provider = provider.name(), error = %e, "generation failed");
        })?;

        let tokens_used = response.usage.total();
        let debug_info = GenerationDebugInfo {
            prompt: prompt.to_string(),
            response: DebugResponse {
                text: response.content.clone(),
                stop_reason: response.stop_reason,
                usage: response.usage,
            },
            model: response.model,
            config: resolved,
            timestamp: Utc::now(),
            tokens_used,
        };

        Ok(GenerationOutput {
            text: response.content,
            debug_info,
        })
    }

    /// Render a conversation into a plain-text prompt.
    ///
    /// Only the most recent `history_window` entries are kept.
    pub fn build_prompt(&self, history: &[HistoryEntry], system: Option<&str>) -> String {
        let mut prompt = String::new();
        if let Some(system) = system {
            prompt.push_str(&format!("System: {system}\n\n"));
        }

        let start = history.len().saturating_sub(self.history_window);
        for entry in &history[start..] {
            let role = match entry.role {
                MessageRole::User => "User",
                _ => "Assistant",
            };
            prompt.push_str(&format!("{role}: {}\n\n", entry.content));
        }
        prompt
    }

    /// Generate for several prompts concurrently. Results keep input order.
    pub async fn batch_generate(
        &self,
        prompts: &[String],
        options: &GenerationOptions,
    ) -> Vec<Result<GenerationOutput, LlmError>> {
        join_all(prompts.iter().map(|p| self.generate_text(p, options))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedProvider;
    use parley_types::action::ActionMetadata;

    #[tokio::test]
    async fn test_generate_text_fills_defaults_and_debug_info() {
        let provider = ScriptedProvider::with_replies(["hello there"]);
        let service = provider.service();

        let out = service
            .generate_text("Say hi", &GenerationOptions::default())
            .await
            .unwrap();

        assert_eq!(out.text, "hello there");
        assert_eq!(out.debug_info.prompt, "Say hi");
        assert_eq!(out.debug_info.tokens_used, 20);
        assert_eq!(out.debug_info.config.temperature, Some(0.7));
        assert_eq!(out.debug_info.config.max_tokens, Some(1000));
        assert_eq!(out.debug_info.model, "scripted-model");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].max_tokens, 1000);
        assert_eq!(requests[0].messages[0].content, "Say hi");
    }

    #[tokio::test]
    async fn test_generate_text_respects_explicit_options() {
        let provider = ScriptedProvider::with_replies(["x"]);
        let service = provider.service();

        service
            .generate_text("p", &GenerationOptions::new(0.3, 500))
            .await
            .unwrap();

        let req = &provider.requests()[0];
        assert_eq!(req.temperature, Some(0.3));
        assert_eq!(req.max_tokens, 500);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_an_error() {
        let service = ScriptedProvider::named("main").service();
        let opts = GenerationOptions {
            provider: Some("nope".into()),
            ..Default::default()
        };
        let err = service.generate_text("p", &opts).await.unwrap_err();
        assert!(matches!(err, LlmError::ProviderNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn test_provider_errors_propagate() {
        let provider = ScriptedProvider::named("main");
        provider.push_error("upstream down");
        let service = provider.service();

        let err = service
            .generate_text("p", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_build_prompt_applies_sliding_window() {
        let service = GenerationService::single(BoxLlmProvider::new(ScriptedProvider::named("m")))
            .with_history_window(2);
        let history = vec![
            HistoryEntry::user("first"),
            HistoryEntry::assistant("second", "a1", ActionMetadata::default()),
            HistoryEntry::user("third"),
        ];

        let prompt = service.build_prompt(&history, Some("be brief"));
        assert_eq!(
            prompt,
            "System: be brief\n\nAssistant: second\n\nUser: third\n\n"
        );
    }

    #[tokio::test]
    async fn test_batch_generate_keeps_order() {
        let provider = ScriptedProvider::with_replies(["one", "two", "three"]);
        let service = provider.service();
        let prompts = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let results = service
            .batch_generate(&prompts, &GenerationOptions::default())
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(provider.call_count(), 3);
    }
}
