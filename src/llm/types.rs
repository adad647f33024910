use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub type RequestId = Uuid;

/// Characters per token used by the heuristic estimator.
pub const CHARS_PER_TOKEN: f64 = 4.0;
/// Fixed per-message overhead (role markers, separators) in tokens.
pub const MESSAGE_OVERHEAD_TOKENS: u64 = 4;

/// Heuristic token estimate: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as f64 / CHARS_PER_TOKEN).ceil() as u64
}

/// Supported LLM backends. The registry holds at most one entry per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    Anthropic,
    Google,
    Groq,
    Together,
    Ollama,
}

impl ProviderType {
    pub const ALL: [ProviderType; 6] = [
        ProviderType::OpenAI,
        ProviderType::Anthropic,
        ProviderType::Google,
        ProviderType::Groq,
        ProviderType::Together,
        ProviderType::Ollama,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Google => "google",
            ProviderType::Groq => "groq",
            ProviderType::Together => "together",
            ProviderType::Ollama => "ollama",
        }
    }

    /// Base URL used when the configuration does not override it.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderType::OpenAI => "https://api.openai.com/v1",
            ProviderType::Anthropic => "https://api.anthropic.com/v1",
            ProviderType::Google => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderType::Groq => "https://api.groq.com/openai/v1",
            ProviderType::Together => "https://api.together.xyz/v1",
            ProviderType::Ollama => "http://localhost:11434/v1",
        }
    }

    /// Conventional environment variable holding the API key, if the backend needs one.
    pub fn default_api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderType::OpenAI => Some("OPENAI_API_KEY"),
            ProviderType::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderType::Google => Some("GOOGLE_API_KEY"),
            ProviderType::Groq => Some("GROQ_API_KEY"),
            ProviderType::Together => Some("TOGETHER_API_KEY"),
            ProviderType::Ollama => None,
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("unknown provider '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    pub fn estimated_tokens(&self) -> u64 {
        let calls: u64 = self
            .tool_calls
            .iter()
            .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.to_string()))
            .sum();
        estimate_tokens(&self.content) + calls + MESSAGE_OVERHEAD_TOKENS
    }
}

/// Provider-agnostic completion request. Message order is preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub id: RequestId,
    pub messages: Vec<Message>,
    /// Explicit model id; routing is restricted to it when set.
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub stream: bool,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    /// Hint consulted by `task_type_routing`.
    pub task_type: Option<String>,
    /// When false the memory manager neither injects context nor records the turn.
    #[serde(default = "default_true")]
    pub use_memory: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, agent_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn estimated_input_tokens(&self) -> u64 {
        self.messages.iter().map(Message::estimated_tokens).sum()
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
    }
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            messages: Vec::new(),
            model: None,
            temperature: None,
            max_tokens: None,
            stop: Vec::new(),
            tools: Vec::new(),
            stream: false,
            agent_id: None,
            session_id: None,
            user_id: None,
            task_type: None,
            use_memory: true,
            metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Cancelled,
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost: f64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated_cost: 0.0,
        }
    }

    pub fn priced(mut self, model: &ModelInfo) -> Self {
        self.estimated_cost = model.cost_for(self.input_tokens, self.output_tokens);
        self
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
        self.estimated_cost += other.estimated_cost;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub request_id: RequestId,
    pub content: String,
    pub provider: ProviderType,
    pub model: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: FinishReason,
    pub usage: TokenUsage,
    pub latency: Duration,
    /// Number of provider switches the orchestrator made before this answer.
    #[serde(default)]
    pub fallback_count: u32,
    #[serde(default)]
    pub cached: bool,
    #[serde(default)]
    pub provider_metadata: HashMap<String, serde_json::Value>,
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    pub delta: String,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            finish_reason: None,
        }
    }
}

/// Returned by a chunk sink to keep consuming or to cancel the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamControl {
    Continue,
    Cancel,
}

/// Caller-supplied receiver of streamed chunks.
pub type ChunkSink<'a> = dyn FnMut(StreamChunk) -> StreamControl + Send + 'a;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFeature {
    Streaming,
    ToolUse,
    Vision,
    JsonMode,
    SystemPrompt,
}

/// Qualitative model scores on a 0-10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScores {
    pub speed: f64,
    pub reasoning: f64,
    pub coding: f64,
    /// 1 = cheapest tier.
    pub cost_tier: u8,
}

/// Static capability and pricing metadata for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: ProviderType,
    pub context_window: u64,
    pub max_output_tokens: u64,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub features: Vec<ModelFeature>,
    pub scores: ModelScores,
    /// Typical end-to-end latency used before live observations exist.
    pub latency_ms: u64,
}

impl ModelInfo {
    pub fn supports(&self, feature: ModelFeature) -> bool {
        self.features.contains(&feature)
    }

    pub fn cost_for(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Request/token budget for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
    #[serde(default)]
    pub requests_per_day: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            tokens_per_minute: 100_000,
            requests_per_day: None,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable to read the API key from.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Falls back to the service defaults, then [`DEFAULT_TIMEOUT_MS`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Lower values win ties during routing.
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Replaces the built-in catalog for this provider when non-empty.
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            ..Default::default()
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES)
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider_type.default_base_url())
    }

    /// Resolve the API key: explicit value, then the configured variable, then the
    /// provider's conventional variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Some(key.clone());
        }
        let var = self
            .api_key_env
            .as_deref()
            .or_else(|| self.provider_type.default_api_key_env())?;
        std::env::var(var).ok().filter(|k| !k.is_empty())
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_type: ProviderType::OpenAI,
            enabled: true,
            api_key: None,
            api_key_env: None,
            base_url: None,
            default_model: None,
            timeout_ms: None,
            max_retries: None,
            priority: 0,
            rate_limits: RateLimitConfig::default(),
            models: Vec::new(),
        }
    }
}

/// Rate limiting status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub requests_remaining: u32,
    pub tokens_remaining: u64,
    pub daily_requests_remaining: Option<u32>,
    pub reset_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(Message::user("abcd").estimated_tokens(), 1 + MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!("Anthropic".parse::<ProviderType>(), Ok(ProviderType::Anthropic));
        assert!("watsonx".parse::<ProviderType>().is_err());
        assert_eq!(ProviderType::Groq.to_string(), "groq");
    }

    #[test]
    fn test_last_user_message() {
        let request = CompletionRequest::new(vec![
            Message::system("be nice"),
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
        ]);
        assert_eq!(request.last_user_message(), Some("second"));
    }

    #[test]
    fn test_explicit_api_key_wins() {
        let config = ProviderConfig {
            api_key: Some("sk-test".into()),
            api_key_env: Some("AI_ROUTER_UNSET_VARIABLE".into()),
            ..ProviderConfig::new(ProviderType::OpenAI)
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_ollama_needs_no_key() {
        let config = ProviderConfig::new(ProviderType::Ollama);
        assert_eq!(config.resolve_api_key(), None);
        assert_eq!(config.base_url(), "http://localhost:11434/v1");
    }
}
