//! Request orchestration: safety, memory, routing, resilient execution,
//! streaming, agents, caching, metrics and lifecycle events.

pub mod agent;
pub mod cache;
pub mod events;
pub mod metrics;
pub mod orchestrator;


pub use agent::{AgentConfig, ExecutionContext, ExecutionResult, StopReason, ToolExecution, ToolExecutor};
pub use cache::{CacheConfig, CacheStrategy, ResponseCache};
pub use events::{AIEvent, EventSink, EventType, RecordingEventSink, TracingEventSink};
pub use metrics::{MetricsSnapshot, ProviderMetrics, ServiceMetrics};
pub use orchestrator::{AIService, AIServiceBuilder};
