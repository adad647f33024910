use crate::error::{AIError, ErrorInfo};
use crate::llm::types::{Message, ProviderType, TokenUsage, ToolCall, ToolDefinition};
use crate::router::RoutingConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Static description of an agent run by [`AIService::execute_agent`](super::AIService::execute_agent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Overrides the service routing configuration for this agent.
    #[serde(default)]
    pub routing: Option<RoutingConfig>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub max_iterations: u32,
    pub timeout_ms: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    pub use_memory: bool,
}

impl AgentConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: None,
            system_prompt: None,
            model: None,
            routing: None,
            tools: Vec::new(),
            max_iterations: 10,
            timeout_ms: 120_000,
            temperature: None,
            max_tokens: None,
            use_memory: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Runs the tools a model asks for. Implemented by the embedding application.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute one call and return the text fed back to the model.
    async fn execute(&self, call: &ToolCall, context: &ExecutionContext) -> Result<String, AIError>;
}

/// Per-run identity and collaborators.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub task_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub tool_executor: Option<Arc<dyn ToolExecutor>>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tool_executor = Some(executor);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("task_type", &self.task_type)
            .field("metadata", &self.metadata)
            .field("tool_executor", &self.tool_executor.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without asking for tools.
    Completed,
    MaxIterations,
    /// Tools were requested but the context carries no executor.
    ToolCallsPending,
    /// A streamed turn was cancelled by the caller.
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecution {
    pub call: ToolCall,
    pub output: String,
    pub error: Option<ErrorInfo>,
    pub latency: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent_id: String,
    pub session_id: String,
    /// Final assistant text.
    pub content: String,
    /// Full transcript sent in the last iteration plus the final answer.
    pub messages: Vec<Message>,
    pub tool_executions: Vec<ToolExecution>,
    /// Tool calls left unanswered when the run stopped.
    pub pending_tool_calls: Vec<ToolCall>,
    pub iterations: u32,
    pub usage: TokenUsage,
    pub latency: Duration,
    pub stop_reason: StopReason,
    pub provider: Option<ProviderType>,
    pub model: Option<String>,
    pub fallback_count: u32,
}
