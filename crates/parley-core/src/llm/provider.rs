//! LlmProvider trait definition.
//!
//! This is the core abstraction that all LLM providers implement. Uses
//! RPITIT for `complete`; [`super::box_provider::BoxLlmProvider`] restores
//! object safety for runtime selection.

use parley_types::llm::{CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities};

/// Trait for LLM provider backends.
///
/// Implementations live in parley-infra (e.g. `OpenAiCompatibleProvider`)
/// and in test modules as scripted mocks.
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g., "openai").
    fn name(&self) -> &str;

    /// Context and output limits of this provider.
    fn capabilities(&self) -> &ProviderCapabilities;

    /// Send a completion request and receive the full response.
    fn complete(
        &self,
        request: &CompletionRequest,
    ) -> impl std::future::Future<Output = Result<CompletionResponse, LlmError>> + Send;
}
