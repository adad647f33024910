//! OpenAI-compatible chat-completions adapter.
//!
//! Serves every backend that speaks the `/chat/completions` wire format: OpenAI
//! itself, Google's OpenAI-compatible Gemini endpoint, Groq, Together and Ollama.
//! Streaming uses server-sent events with `data: [DONE]` as terminator.

use crate::error::AIError;
use crate::llm::catalog;
use crate::llm::http::{self, SseDecoder};
use crate::llm::provider::LLMProvider;
use crate::llm::types::{
    ChunkSink, CompletionRequest, CompletionResponse, FinishReason, Message, MessageRole,
    ModelInfo, ProviderConfig, ProviderType, StreamChunk, StreamControl, TokenUsage, ToolCall,
    estimate_tokens,
};
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::debug;

pub struct OpenAICompatibleProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    api_key: Option<String>,
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    function: WireFunction,
}

#[derive(Debug, Default, Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

/// Tool call being assembled from streamed fragments.
#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl OpenAICompatibleProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AIError> {
        let api_key = http::require_api_key(&config)?;
        http::endpoint(&config, "chat/completions")?;
        let client = http::build_client(&config)?;
        let models = if config.models.is_empty() {
            catalog::default_models(config.provider_type)
        } else {
            config.models.clone()
        };

        Ok(Self {
            config,
            client,
            api_key,
            models,
        })
    }

    fn build_body(&self, request: &CompletionRequest, model: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
            "stream": stream,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.stop.is_empty() {
            body["stop"] = json!(request.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if stream && self.config.provider_type == ProviderType::OpenAI {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, AIError> {
        let url = http::endpoint(&self.config, "chat/completions")?;
        let mut builder = self.client.post(url).json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            http::map_transport_error(self.config.provider_type, self.config.timeout_ms(), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http::map_status_error(self.config.provider_type, status, &text));
        }
        Ok(response)
    }

    fn model_info(&self, model: &str) -> Option<&ModelInfo> {
        self.models.iter().find(|m| m.id == model)
    }

    fn usage(&self, model: &str, reported: Option<ChatUsage>, request: &CompletionRequest, output: &str) -> TokenUsage {
        let usage = match reported {
            Some(u) => TokenUsage::new(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::new(request.estimated_input_tokens(), estimate_tokens(output)),
        };
        match self.model_info(model) {
            Some(info) => usage.priced(info),
            None => usage,
        }
    }
}

fn wire_message(message: &Message) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content,
    });
    if message.role == MessageRole::Tool
        && let Some(ref id) = message.tool_call_id
    {
        value["tool_call_id"] = json!(id);
    }
    if !message.tool_calls.is_empty() {
        value["tool_calls"] = Value::Array(
            message
                .tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": call.arguments.to_string(),
                        }
                    })
                })
                .collect(),
        );
    }
    value
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn finish_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("length") => FinishReason::Length,
        Some("tool_calls") | Some("function_call") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

impl LLMProvider for OpenAICompatibleProvider {
    fn provider_type(&self) -> ProviderType {
        self.config.provider_type
    }

    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
        model: &'a str,
    ) -> BoxFuture<'a, Result<CompletionResponse, AIError>> {
        Box::pin(async move {
            let start = Instant::now();
            let body = self.build_body(request, model, false);
            let response = self.send(&body).await?;
            let parsed: ChatResponse = response.json().await.map_err(|e| AIError::Provider {
                provider: self.config.provider_type,
                message: format!("malformed completion response: {}", e),
                status: None,
            })?;

            let choice = parsed.choices.into_iter().next().ok_or_else(|| AIError::Provider {
                provider: self.config.provider_type,
                message: "completion response contained no choices".to_string(),
                status: None,
            })?;

            let content = choice.message.content.unwrap_or_default();
            let tool_calls: Vec<ToolCall> = choice
                .message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, call)| ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{}", i)),
                    name: call.function.name.unwrap_or_default(),
                    arguments: parse_arguments(call.function.arguments.as_deref().unwrap_or("")),
                })
                .collect();
            let usage = self.usage(model, parsed.usage, request, &content);

            debug!(
                provider = %self.config.provider_type,
                model,
                output_tokens = usage.output_tokens,
                "completion finished"
            );

            let mut provider_metadata = HashMap::new();
            if let Some(served) = parsed.model {
                provider_metadata.insert("served_model".to_string(), json!(served));
            }

            Ok(CompletionResponse {
                request_id: request.id,
                content,
                provider: self.config.provider_type,
                model: model.to_string(),
                tool_calls,
                finish_reason: finish_reason(choice.finish_reason.as_deref()),
                usage,
                latency: start.elapsed(),
                fallback_count: 0,
                cached: false,
                provider_metadata,
            })
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
            let provider = self.config.provider_type;
            let body = self.build_body(request, model, true);
            let response = self.send(&body).await?;

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut content = String::new();
            let mut partial_calls: BTreeMap<usize, PartialToolCall> = BTreeMap::new();
            let mut reported_usage = None;
            let mut finish = FinishReason::Stop;
            let mut done = false;

            let mut eof = false;
            'read: while !eof {
                let events = match bytes.next().await {
                    Some(next) => {
                        let chunk =
                            next.map_err(|e| http::map_transport_error(provider, self.config.timeout_ms(), e))?;
                        decoder.push(&chunk)
                    }
                    None => {
                        eof = true;
                        decoder.finish()
                    }
                };
                for event in events {
                    if event.data == "[DONE]" {
                        done = true;
                        break 'read;
                    }
                    let parsed: StreamResponse = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(provider = %provider, error = %e, "skipping unparseable stream event");
                            continue;
                        }
                    };
                    if parsed.usage.is_some() {
                        reported_usage = parsed.usage;
                    }
                    for choice in parsed.choices {
                        for call in choice.delta.tool_calls {
                            let slot = partial_calls.entry(call.index.unwrap_or(0)).or_default();
                            if let Some(id) = call.id {
                                slot.id = id;
                            }
                            if let Some(name) = call.function.name {
                                slot.name.push_str(&name);
                            }
                            if let Some(arguments) = call.function.arguments {
                                slot.arguments.push_str(&arguments);
                            }
                        }
                        if let Some(reason) = choice.finish_reason.as_deref() {
                            finish = finish_reason(Some(reason));
                        }
                        if let Some(delta) = choice.delta.content.filter(|d| !d.is_empty()) {
                            content.push_str(&delta);
                            if on_chunk(StreamChunk::text(delta)) == StreamControl::Cancel {
                                finish = FinishReason::Cancelled;
                                done = true;
                                break 'read;
                            }
                        }
                    }
                }
            }

            if !done {
                return Err(AIError::Provider {
                    provider,
                    message: "stream ended before completion marker".to_string(),
                    status: None,
                });
            }

            let tool_calls = partial_calls
                .into_iter()
                .map(|(i, call)| ToolCall {
                    id: if call.id.is_empty() { format!("call_{}", i) } else { call.id },
                    name: call.name,
                    arguments: parse_arguments(&call.arguments),
                })
                .collect();
            let usage = self.usage(model, reported_usage, request, &content);

            Ok(CompletionResponse {
                request_id: request.id,
                content,
                provider,
                model: model.to_string(),
                tool_calls,
                finish_reason: finish,
                usage,
                latency: start.elapsed(),
                fallback_count: 0,
                cached: false,
                provider_metadata: HashMap::new(),
            })
        })
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<ModelInfo>, AIError>> {
        Box::pin(async move { Ok(self.models.clone()) })
    }
}
