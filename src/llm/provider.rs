use crate::error::AIError;
use crate::llm::anthropic_provider::AnthropicProvider;
use crate::llm::openai_provider::OpenAICompatibleProvider;
use crate::llm::types::{
    ChunkSink, CompletionRequest, CompletionResponse, ModelInfo, ProviderConfig, ProviderType,
    estimate_tokens,
};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Capability interface every backend adapter implements.
///
/// Adapters are stateless with respect to health: circuit breaking, rate limiting
/// and timeouts are applied by the registry and the orchestrator around these calls.
pub trait LLMProvider: Send + Sync {
    /// Which backend this adapter talks to.
    fn provider_type(&self) -> ProviderType;

    /// Execute a single completion against `model`.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
        model: &'a str,
    ) -> BoxFuture<'a, Result<CompletionResponse, AIError>>;

    /// Execute a streamed completion, handing each chunk to `on_chunk` as it arrives.
    ///
    /// When the sink returns [`StreamControl::Cancel`](crate::llm::StreamControl) the
    /// adapter stops reading and resolves with finish reason `Cancelled`.
    fn stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
        model: &'a str,
        on_chunk: &'a mut ChunkSink<'a>,
    ) -> BoxFuture<'a, Result<CompletionResponse, AIError>>;

    /// Models served by this backend.
    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelInfo>, AIError>>;

    /// Estimate token count for text (provider-specific tokenization)
    fn estimate_tokens(&self, text: &str) -> u64 {
        estimate_tokens(text)
    }

    /// Test provider connectivity
    fn health_check(&self) -> BoxFuture<'_, Result<(), AIError>> {
        Box::pin(async { Ok(()) })
    }
}

/// Factory for creating LLM providers
pub struct LLMProviderFactory;

impl LLMProviderFactory {
    /// Pick the wire-format adapter for the configured provider type.
    pub fn create_provider(config: ProviderConfig) -> Result<Arc<dyn LLMProvider>, AIError> {
        match config.provider_type {
            ProviderType::Anthropic => Ok(Arc::new(AnthropicProvider::new(config)?)),
            ProviderType::OpenAI
            | ProviderType::Google
            | ProviderType::Groq
            | ProviderType::Together
            | ProviderType::Ollama => Ok(Arc::new(OpenAICompatibleProvider::new(config)?)),
        }
    }
}
