//! Anthropic Messages API adapter.
//!
//! System messages are lifted into the top-level `system` field, tool results are
//! sent as `tool_result` content blocks, and consecutive messages that map to the
//! same wire role are merged because the API requires strict alternation.

use crate::error::AIError;
use crate::llm::catalog;
use crate::llm::http::{self, SseDecoder};
use crate::llm::provider::LLMProvider;
use crate::llm::types::{
    ChunkSink, CompletionRequest, CompletionResponse, FinishReason, MessageRole, ModelInfo,
    ProviderConfig, ProviderType, StreamChunk, StreamControl, TokenUsage, ToolCall,
    estimate_tokens,
};
use futures::StreamExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`; used when the request leaves it unset.
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    api_key: Option<String>,
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {
        message: StreamMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: StreamBlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: StreamDelta,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamBlockStart {
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, AIError> {
        let api_key = http::require_api_key(&config)?;
        http::endpoint(&config, "messages")?;
        let client = http::build_client(&config)?;
        let models = if config.models.is_empty() {
            catalog::default_models(ProviderType::Anthropic)
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
        let system: Vec<&str> = request
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let mut messages: Vec<Value> = Vec::new();
        for message in request.messages.iter().filter(|m| m.role != MessageRole::System) {
            let (role, blocks) = match message.role {
                MessageRole::Tool => (
                    "user",
                    vec![json!({
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                        "content": message.content,
                    })],
                ),
                MessageRole::Assistant => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    for call in &message.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    ("assistant", blocks)
                }
                _ => ("user", vec![json!({"type": "text", "text": message.content})]),
            };

            match messages.last_mut() {
                Some(last) if last["role"] == role => {
                    if let Some(content) = last["content"].as_array_mut() {
                        content.extend(blocks);
                    }
                }
                _ => messages.push(json!({"role": role, "content": blocks})),
            }
        }

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.stop.is_empty() {
            body["stop_sequences"] = json!(request.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(
                request
                    .tools
                    .iter()
                    .map(|t| json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
                    .collect(),
            );
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, AIError> {
        let url = http::endpoint(&self.config, "messages")?;
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }
        let response = builder.send().await.map_err(|e| {
            http::map_transport_error(ProviderType::Anthropic, self.config.timeout_ms(), e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(http::map_status_error(ProviderType::Anthropic, status, &text));
        }
        Ok(response)
    }

    fn priced(&self, model: &str, usage: TokenUsage) -> TokenUsage {
        match self.models.iter().find(|m| m.id == model) {
            Some(info) => usage.priced(info),
            None => usage,
        }
    }
}

fn stop_reason(raw: Option<&str>) -> FinishReason {
    match raw {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl LLMProvider for AnthropicProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
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
            let parsed: MessagesResponse = response.json().await.map_err(|e| AIError::Provider {
                provider: ProviderType::Anthropic,
                message: format!("malformed messages response: {}", e),
                status: None,
            })?;

            let mut content = String::new();
            let mut tool_calls = Vec::new();
            for block in parsed.content {
                match block {
                    ContentBlock::Text { text } => content.push_str(&text),
                    ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                        id,
                        name,
                        arguments: input,
                    }),
                    ContentBlock::Other => {}
                }
            }

            let usage = self.priced(
                model,
                TokenUsage::new(parsed.usage.input_tokens, parsed.usage.output_tokens),
            );
            debug!(model, output_tokens = usage.output_tokens, "anthropic completion finished");

            Ok(CompletionResponse {
                request_id: request.id,
                content,
                provider: ProviderType::Anthropic,
                model: model.to_string(),
                tool_calls,
                finish_reason: stop_reason(parsed.stop_reason.as_deref()),
                usage,
                latency: start.elapsed(),
                fallback_count: 0,
                cached: false,
                provider_metadata: HashMap::new(),
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
            let body = self.build_body(request, model, true);
            let response = self.send(&body).await?;

            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::default();
            let mut content = String::new();
            let mut tools: BTreeMap<usize, (String, String, String)> = BTreeMap::new();
            let mut usage = WireUsage::default();
            let mut finish = FinishReason::Stop;
            let mut done = false;

            let mut eof = false;
            'read: while !eof {
                let events = match bytes.next().await {
                    Some(next) => {
                        let chunk = next.map_err(|e| {
                            http::map_transport_error(ProviderType::Anthropic, self.config.timeout_ms(), e)
                        })?;
                        decoder.push(&chunk)
                    }
                    None => {
                        eof = true;
                        decoder.finish()
                    }
                };
                for event in events {
                    let parsed: StreamEvent = match serde_json::from_str(&event.data) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            debug!(error = %e, "skipping unparseable anthropic stream event");
                            continue;
                        }
                    };
                    match parsed {
                        StreamEvent::MessageStart { message } => {
                            usage.input_tokens = message.usage.input_tokens;
                        }
                        StreamEvent::ContentBlockStart {
                            index,
                            content_block: StreamBlockStart::ToolUse { id, name },
                        } => {
                            tools.insert(index, (id, name, String::new()));
                        }
                        StreamEvent::ContentBlockStart { .. } => {}
                        StreamEvent::ContentBlockDelta { index, delta } => match delta {
                            StreamDelta::TextDelta { text } => {
                                content.push_str(&text);
                                if on_chunk(StreamChunk::text(text)) == StreamControl::Cancel {
                                    finish = FinishReason::Cancelled;
                                    done = true;
                                    break 'read;
                                }
                            }
                            StreamDelta::InputJsonDelta { partial_json } => {
                                if let Some(tool) = tools.get_mut(&index) {
                                    tool.2.push_str(&partial_json);
                                }
                            }
                            StreamDelta::Other => {}
                        },
                        StreamEvent::MessageDelta { delta, usage: delta_usage } => {
                            if let Some(reason) = delta.stop_reason.as_deref() {
                                finish = stop_reason(Some(reason));
                            }
                            if let Some(u) = delta_usage {
                                usage.output_tokens = u.output_tokens;
                            }
                        }
                        StreamEvent::MessageStop => {
                            done = true;
                            break 'read;
                        }
                        StreamEvent::Error { error } => {
                            return Err(AIError::Provider {
                                provider: ProviderType::Anthropic,
                                message: error.message,
                                status: None,
                            });
                        }
                        StreamEvent::Other => {}
                    }
                }
            }

            if !done {
                return Err(AIError::Provider {
                    provider: ProviderType::Anthropic,
                    message: "stream ended before message_stop".to_string(),
                    status: None,
                });
            }

            if usage.output_tokens == 0 {
                usage.output_tokens = estimate_tokens(&content);
            }
            if usage.input_tokens == 0 {
                usage.input_tokens = request.estimated_input_tokens();
            }
            let tool_calls = tools
                .into_values()
                .map(|(id, name, raw)| ToolCall {
                    id,
                    name,
                    arguments: parse_arguments(&raw),
                })
                .collect();

            Ok(CompletionResponse {
                request_id: request.id,
                content,
                provider: ProviderType::Anthropic,
                model: model.to_string(),
                tool_calls,
                finish_reason: finish,
                usage: self.priced(model, TokenUsage::new(usage.input_tokens, usage.output_tokens)),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Message;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::new(ProviderConfig {
            api_key: Some("sk-ant-test".into()),
            ..ProviderConfig::new(ProviderType::Anthropic)
        })
        .unwrap()
    }

    #[test]
    fn test_system_messages_are_lifted() {
        let request = CompletionRequest::new(vec![
            Message::system("rule one"),
            Message::system("rule two"),
            Message::user("hello"),
        ]);
        let body = provider().build_body(&request, "claude-3-5-haiku-latest", false);
        assert_eq!(body["system"], "rule one\n\nrule two");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_tool_results_merge_into_one_user_turn() {
        let mut assistant = Message::assistant("");
        assistant.tool_calls = vec![
            ToolCall {
                id: "a".into(),
                name: "x".into(),
                arguments: json!({}),
            },
            ToolCall {
                id: "b".into(),
                name: "y".into(),
                arguments: json!({}),
            },
        ];
        let request = CompletionRequest::new(vec![
            Message::user("go"),
            assistant,
            Message::tool_result("a", "1"),
            Message::tool_result("b", "2"),
        ]);
        let body = provider().build_body(&request, "claude-sonnet-4-20250514", false);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().unwrap().len(), 2);
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "b");
    }

    #[test]
    fn test_stream_event_parsing() {
        let event: StreamEvent = serde_json::from_str(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            StreamEvent::ContentBlockDelta {
                delta: StreamDelta::TextDelta { .. },
                ..
            }
        ));
        let event: StreamEvent = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(matches!(event, StreamEvent::Other));
    }
}
