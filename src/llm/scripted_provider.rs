//! Offline adapter that answers from a queue of canned replies.
//!
//! Used by the test suites and by the CLI when no network backend is configured.
//! Every call is recorded so callers can assert what the orchestrator sent.

use crate::error::AIError;
use crate::llm::catalog;
use crate::llm::provider::LLMProvider;
use crate::llm::types::{
    ChunkSink, CompletionRequest, CompletionResponse, FinishReason, ModelInfo, ProviderType,
    StreamChunk, StreamControl, TokenUsage, ToolCall, estimate_tokens,
};
use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    /// Repeat the last user message back.
    Echo,
    ToolCalls(Vec<ToolCall>),
    Fail(AIError),
    /// Stream `chunks`, then fail. A non-streamed call fails immediately.
    FailAfter { chunks: Vec<String>, error: AIError },
    Delayed { delay: Duration, reply: Box<ScriptedReply> },
}

impl ScriptedReply {
    pub fn text(content: impl Into<String>) -> Self {
        ScriptedReply::Text(content.into())
    }

    pub fn delayed(delay: Duration, reply: ScriptedReply) -> Self {
        ScriptedReply::Delayed {
            delay,
            reply: Box::new(reply),
        }
    }
}

/// A call observed by the scripted provider.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub request: CompletionRequest,
    pub streamed: bool,
}

pub struct ScriptedProvider {
    provider_type: ProviderType,
    models: Vec<ModelInfo>,
    script: Mutex<VecDeque<ScriptedReply>>,
    default_reply: ScriptedReply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedProvider {
    /// A provider that echoes once its script runs out.
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            models: catalog::default_models(provider_type),
            script: Mutex::new(VecDeque::new()),
            default_reply: ScriptedReply::Echo,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_models(mut self, models: Vec<ModelInfo>) -> Self {
        self.models = models;
        self
    }

    /// Override the static latency estimate of every model.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        for model in &mut self.models {
            model.latency_ms = latency_ms;
        }
        self
    }

    pub fn with_replies(self, replies: impl IntoIterator<Item = ScriptedReply>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().collect()),
            ..self
        }
    }

    pub fn with_default_reply(mut self, reply: ScriptedReply) -> Self {
        self.default_reply = reply;
        self
    }

    pub async fn push_reply(&self, reply: ScriptedReply) {
        self.script.lock().await.push_back(reply);
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    async fn next_reply(&self, request: &CompletionRequest, model: &str, streamed: bool) -> Step {
        self.calls.lock().await.push(RecordedCall {
            model: model.to_string(),
            request: request.clone(),
            streamed,
        });
        let mut reply = self
            .script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_reply.clone());

        loop {
            return match reply {
                ScriptedReply::Delayed { delay, reply: inner } => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                    continue;
                }
                ScriptedReply::Text(content) => Step::Text(content),
                ScriptedReply::Echo => Step::Text(echo(request)),
                ScriptedReply::ToolCalls(calls) => Step::ToolCalls(calls),
                ScriptedReply::Fail(error) => Step::Fail(error),
                ScriptedReply::FailAfter { chunks, error } => Step::FailAfter(chunks, error),
            };
        }
    }

    fn response(
        &self,
        request: &CompletionRequest,
        model: &str,
        content: String,
        tool_calls: Vec<ToolCall>,
        finish_reason: FinishReason,
        start: Instant,
    ) -> CompletionResponse {
        let usage = TokenUsage::new(request.estimated_input_tokens(), estimate_tokens(&content));
        let usage = match self.models.iter().find(|m| m.id == model) {
            Some(info) => usage.priced(info),
            None => usage,
        };
        CompletionResponse {
            request_id: request.id,
            content,
            provider: self.provider_type,
            model: model.to_string(),
            tool_calls,
            finish_reason,
            usage,
            latency: start.elapsed(),
            fallback_count: 0,
            cached: false,
            provider_metadata: HashMap::new(),
        }
    }
}

/// A reply with delays already served.
enum Step {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Fail(AIError),
    FailAfter(Vec<String>, AIError),
}

fn echo(request: &CompletionRequest) -> String {
    request.last_user_message().unwrap_or_default().to_string()
}

impl LLMProvider for ScriptedProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
        model: &'a str,
    ) -> BoxFuture<'a, Result<CompletionResponse, AIError>> {
        Box::pin(async move {
            let start = Instant::now();
            match self.next_reply(request, model, false).await {
                Step::Text(content) => {
                    Ok(self.response(request, model, content, Vec::new(), FinishReason::Stop, start))
                }
                Step::ToolCalls(calls) => Ok(self.response(
                    request,
                    model,
                    String::new(),
                    calls,
                    FinishReason::ToolCalls,
                    start,
                )),
                Step::Fail(error) | Step::FailAfter(_, error) => Err(error),
            }
        })
    }

    fn stream<'a>(
        &'a self,
        request: &'a CompletionRequest,
        model: &'a str,
        on_chunk: &'a mut ChunkSink<'a>,
    ) -> BoxFuture<'a, Result<CompletionResponse, AIError>> {
        Box::pin(async move {
            let start = Instant::now();
            let (content, failure) = match self.next_reply(request, model, true).await {
                Step::Text(content) => (content, None),
                Step::ToolCalls(calls) => {
                    return Ok(self.response(
                        request,
                        model,
                        String::new(),
                        calls,
                        FinishReason::ToolCalls,
                        start,
                    ));
                }
                Step::Fail(error) => return Err(error),
                Step::FailAfter(chunks, error) => (chunks.concat(), Some((chunks, error))),
            };

            let pieces: Vec<String> = match &failure {
                Some((chunks, _)) => chunks.clone(),
                None => content.split_inclusive(' ').map(str::to_string).collect(),
            };

            let mut delivered = String::new();
            for piece in pieces {
                delivered.push_str(&piece);
                if on_chunk(StreamChunk::text(piece)) == StreamControl::Cancel {
                    return Ok(self.response(
                        request,
                        model,
                        delivered,
                        Vec::new(),
                        FinishReason::Cancelled,
                        start,
                    ));
                }
                tokio::task::yield_now().await;
            }

            if let Some((_, error)) = failure {
                return Err(error);
            }
            Ok(self.response(request, model, content, Vec::new(), FinishReason::Stop, start))
        })
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelInfo>, AIError>> {
        Box::pin(async move { Ok(self.models.clone()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    #[tokio::test]
    async fn test_script_then_default_reply() {
        let provider = ScriptedProvider::new(ProviderType::OpenAI)
            .with_replies([ScriptedReply::text("first")]);
        let request = CompletionRequest::new(vec![Message::user("ping")]);

        let first = provider.complete(&request, "gpt-4o").await.unwrap();
        assert_eq!(first.content, "first");
        let second = provider.complete(&request, "gpt-4o").await.unwrap();
        assert_eq!(second.content, "ping");
        assert_eq!(provider.call_count().await, 2);
        assert!(first.usage.estimated_cost > 0.0);
    }

    #[tokio::test]
    async fn test_stream_honours_cancel() {
        let provider = ScriptedProvider::new(ProviderType::Groq)
            .with_replies([ScriptedReply::text("one two three four")]);
        let request = CompletionRequest::new(vec![Message::user("count")]);
        let mut seen = Vec::new();
        let mut sink = |chunk: StreamChunk| {
            seen.push(chunk.delta);
            if seen.len() == 2 {
                StreamControl::Cancel
            } else {
                StreamControl::Continue
            }
        };

        let response = provider
            .stream(&request, "llama-3.3-70b-versatile", &mut sink)
            .await
            .unwrap();
        assert_eq!(response.finish_reason, FinishReason::Cancelled);
        assert_eq!(response.content, "one two ");
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn test_fail_after_delivers_partial_output() {
        let provider = ScriptedProvider::new(ProviderType::Ollama).with_replies([ScriptedReply::FailAfter {
            chunks: vec!["partial".into()],
            error: AIError::Provider {
                provider: ProviderType::Ollama,
                message: "connection reset".into(),
                status: None,
            },
        }]);
        let request = CompletionRequest::new(vec![Message::user("hi")]);
        let mut delivered = String::new();
        let mut sink = |chunk: StreamChunk| {
            delivered.push_str(&chunk.delta);
            StreamControl::Continue
        };

        let result = provider.stream(&request, "llama3.1", &mut sink).await;
        assert!(result.is_err());
        assert_eq!(delivered, "partial");
    }
}
