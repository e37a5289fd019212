//! Scripted provider shared by unit tests across the crate.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use parley_types::llm::{
    CompletionRequest, CompletionResponse, LlmError, ProviderCapabilities, StopReason, Usage,
};

use super::box_provider::BoxLlmProvider;
use super::generation::GenerationService;
use super::provider::LlmProvider;

/// Provider that replays queued replies in order.
///
/// Clones share the queue and the request log, so a test can keep a handle
/// after boxing the provider into a `GenerationService`.
#[derive(Clone)]
pub struct ScriptedProvider {
    name: String,
    capabilities: ProviderCapabilities,
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedProvider {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            capabilities: ProviderCapabilities {
                max_context_tokens: 128_000,
                max_output_tokens: 4_096,
            },
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_replies<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        let provider = Self::named("scripted");
        for reply in replies {
            provider.push_reply(reply);
        }
        provider
    }

    pub fn push_reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn push_error(&self, message: &str) {
        self.replies
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Wrap a clone of this provider in a single-provider service.
    pub fn service(&self) -> Arc<GenerationService> {
        Arc::new(GenerationService::single(BoxLlmProvider::new(self.clone())))
    }
}

impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &ProviderCapabilities {
        &self.capabilities
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        match next.unwrap_or_else(|| Ok("ok".to_string())) {
            Ok(content) => Ok(CompletionResponse {
                id: format!("resp-{}", self.call_count()),
                content,
                model: format!("{}-model", self.name),
                stop_reason: StopReason::EndTurn,
                usage: Usage {
                    input_tokens: 12,
                    output_tokens: 8,
                },
            }),
            Err(message) => Err(LlmError::Provider { message }),
        }
    }
}
