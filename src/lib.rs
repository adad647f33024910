//! # AI Router
//!
//! Provider routing and resilience for applications that talk to several LLM
//! backends. Every request passes input safety checks, picks up conversational
//! memory, is routed to the best available provider and is retried or moved to
//! the next provider when a call fails.
//!
//! ## Architecture Overview
//!
//! - **[`llm`]**: Provider adapter trait, wire adapters and request/response types
//! - **[`registry`]**: Per-provider circuit breakers, rate limits and health
//! - **[`router`]**: Provider/model selection by latency, cost, quality or a fixed chain
//! - **[`safety`]**: Prompt injection, jailbreak and PII checks, transaction limits
//! - **[`memory`]**: Session short-term buffers and long-term ranked recall
//! - **[`service`]**: The orchestrator tying everything together, plus agents and events
//!
//! ## Features
//!
//! ### 🔀 Routing
//! - **Modes**: fast, balanced, quality, cost-optimised and custom fallback chains
//! - **Hard limits**: latency and cost ceilings, model include/exclude lists, required features
//!
//! ### 🛡️ Resilience
//! - **Circuit breaking**: consecutive-failure and error-rate tripping with half-open probes
//! - **Retries and fallback**: jittered backoff on the same provider, then the next candidate
//!
//! ### 🧠 Memory
//! - **Short-term**: bounded per-session turn buffers
//! - **Long-term**: importance, recency and relevance ranking over a pluggable store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_router::{AIConfig, AIService, CompletionRequest, Message};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AIConfig::from_toml_file("ai-router.toml")?;
//!     let service = AIService::from_config(config).await?;
//!
//!     let request = CompletionRequest::new(vec![Message::user("Summarise the changelog")])
//!         .with_session("release-bot", "session-1");
//!     let response = service.complete(request).await?;
//!
//!     println!("{} ({})", response.content, response.provider);
//!     Ok(())
//! }
//! ```

/// Service configuration loaded from TOML.
pub mod config;

/// Environment constants and path utilities.
pub mod env;

/// Error taxonomy shared by every component.
pub mod error;

/// Provider-agnostic LLM interface.
///
/// Adapter trait, OpenAI-compatible and Anthropic adapters, a scripted adapter
/// for offline use, and the request/response model.
pub mod llm;

/// Provider health: circuit breakers, rate limiters and latency tracking.
pub mod registry;

/// Provider and model selection.
pub mod router;

/// Input and output safety validation.
pub mod safety;

/// Conversational memory.
pub mod memory;

/// Request orchestration, agents, caching, metrics and events.
pub mod service;

// CLI module for command-line interface
pub mod cli;

pub use config::{AIConfig, DefaultsConfig, ObservabilityConfig, ResilienceConfig};
pub use error::{AIError, ErrorCode, ErrorInfo};
pub use llm::{
    CompletionRequest, CompletionResponse, FinishReason, LLMProvider, LLMProviderFactory, Message,
    MessageRole, ProviderConfig, ProviderType, ScriptedProvider, ScriptedReply, StreamChunk, StreamControl,
    TokenUsage, ToolCall, ToolDefinition,
};
pub use memory::{MemoryConfig, MemoryEntry, MemoryManager, MemoryQuery, MemoryStore, MemoryType};
pub use registry::{CircuitBreakerConfig, CircuitState, ProviderRegistry};
pub use router::{AIRouter, RoutingConfig, RoutingDecision, RoutingMode};
pub use safety::{SafetyAction, SafetyCheckResult, SafetyConfig, SafetyManager, TransactionRequest};
pub use service::{
    AIEvent, AIService, AIServiceBuilder, AgentConfig, EventSink, EventType, ExecutionContext,
    ExecutionResult, StopReason, ToolExecutor,
};
