use crate::error::{AIError, ErrorInfo};
use crate::llm::types::{ProviderType, RequestId, TokenUsage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RequestStarted,
    RequestCompleted,
    RequestFailed,
    ProviderFallback,
    CircuitOpened,
    CircuitClosed,
    RateLimitHit,
    SafetyViolation,
    CacheHit,
    StreamCancelled,
    ToolExecuted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::RequestStarted => "request_started",
            EventType::RequestCompleted => "request_completed",
            EventType::RequestFailed => "request_failed",
            EventType::ProviderFallback => "provider_fallback",
            EventType::CircuitOpened => "circuit_opened",
            EventType::CircuitClosed => "circuit_closed",
            EventType::RateLimitHit => "rate_limit_hit",
            EventType::SafetyViolation => "safety_violation",
            EventType::CacheHit => "cache_hit",
            EventType::StreamCancelled => "stream_cancelled",
            EventType::ToolExecuted => "tool_executed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable observability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AIEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub request_id: Option<RequestId>,
    pub provider: Option<ProviderType>,
    pub model: Option<String>,
    pub latency_ms: Option<u64>,
    pub usage: Option<TokenUsage>,
    pub success: bool,
    pub error: Option<ErrorInfo>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AIEvent {
    pub fn new(event_type: EventType, request_id: Option<RequestId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            request_id,
            provider: None,
            model: None,
            latency_ms: None,
            usage: None,
            success: true,
            error: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: ProviderType, model: Option<&str>) -> Self {
        self.provider = Some(provider);
        self.model = model.map(str::to_string);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn with_usage(mut self, usage: &TokenUsage) -> Self {
        self.usage = Some(usage.clone());
        self
    }

    /// Attaching an error marks the event unsuccessful.
    pub fn with_error(mut self, error: &AIError) -> Self {
        self.success = false;
        self.error = Some(ErrorInfo::from(error));
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Receiver of [`AIEvent`]s. Called synchronously, once per event; delivery is
/// best effort.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AIEvent);
}

impl<F> EventSink for F
where
    F: Fn(&AIEvent) + Send + Sync,
{
    fn emit(&self, event: &AIEvent) {
        self(event)
    }
}

/// Renders events as tracing records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &AIEvent) {
        let provider = event.provider.map(|p| p.as_str()).unwrap_or("-");
        let model = event.model.as_deref().unwrap_or("-");
        match &event.error {
            Some(error) => warn!(
                event = %event.event_type,
                provider,
                model,
                code = %error.code,
                "{}",
                error.message
            ),
            None => info!(
                event = %event.event_type,
                provider,
                model,
                latency_ms = event.latency_ms,
                tokens = event.usage.as_ref().map(|u| u.total_tokens),
                "ai event"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AIEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AIEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn of_type(&self, event_type: EventType) -> Vec<AIEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.of_type(event_type).len()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &AIEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_closures_are_sinks() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sink: Arc<dyn EventSink> = Arc::new(move |_: &AIEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sink.emit(&AIEvent::new(EventType::CacheHit, None));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_marks_event_failed() {
        let event = AIEvent::new(EventType::RequestFailed, Some(Uuid::new_v4()))
            .with_error(&AIError::CircuitOpen(ProviderType::Groq));
        assert!(!event.success);
        assert_eq!(
            event.error.map(|e| e.code),
            Some(crate::error::ErrorCode::CircuitOpen)
        );
    }
}
