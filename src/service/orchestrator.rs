use crate::config::AIConfig;
use crate::error::{AIError, ErrorInfo};
use crate::llm::provider::{LLMProvider, LLMProviderFactory};
use crate::llm::types::{
    ChunkSink, CompletionRequest, CompletionResponse, FinishReason, Message, MessageRole, ProviderConfig,
    ProviderType, StreamChunk, StreamControl, TokenUsage,
};
use crate::memory::{MemoryManager, MemoryStore, open_store};
use crate::registry::{CallOutcome, CircuitTransition, ProviderRegistry, ProviderStatus};
use crate::router::{AIRouter, RouteCandidate, RoutingConfig, RoutingDecision};
use crate::safety::{SafetyAction, SafetyCheckResult, SafetyManager};
use crate::service::agent::{AgentConfig, ExecutionContext, ExecutionResult, StopReason, ToolExecution};
use crate::service::cache::ResponseCache;
use crate::service::events::{AIEvent, EventSink, EventType, TracingEventSink};
use crate::service::metrics::ServiceMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Output tokens assumed when sizing memory context for a request without a limit.
const CONTEXT_OUTPUT_RESERVE: u64 = 512;
/// Context window assumed when no provider is registered.
const FALLBACK_CONTEXT_WINDOW: u64 = 8_192;

/// Front door of the crate: safety, memory, routing, resilient execution and events
/// composed into `complete`, `stream` and `execute_agent`.
pub struct AIService {
    config: AIConfig,
    registry: Arc<ProviderRegistry>,
    router: AIRouter,
    safety: SafetyManager,
    memory: Option<Arc<MemoryManager>>,
    cache: Option<ResponseCache>,
    metrics: ServiceMetrics,
    events: Option<Arc<dyn EventSink>>,
}

pub struct AIServiceBuilder {
    config: AIConfig,
    adapters: Vec<(Arc<dyn LLMProvider>, Option<ProviderConfig>)>,
    memory_store: Option<Arc<dyn MemoryStore>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl AIServiceBuilder {
    /// Register a ready adapter. Its settings come from the configuration entry of
    /// the same type when there is one.
    pub fn with_provider(mut self, adapter: Arc<dyn LLMProvider>) -> Self {
        self.adapters.push((adapter, None));
        self
    }

    pub fn with_provider_config(mut self, adapter: Arc<dyn LLMProvider>, config: ProviderConfig) -> Self {
        self.adapters.push((adapter, Some(config)));
        self
    }

    pub fn with_memory_store(mut self, store: Arc<dyn MemoryStore>) -> Self {
        self.memory_store = Some(store);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub async fn build(self) -> Result<AIService, AIError> {
        let config = self.config;
        config.validate()?;

        let registry = Arc::new(
            ProviderRegistry::new(config.resilience.circuit_breaker.clone())
                .with_latency_alpha(config.resilience.latency_ewma_alpha),
        );
        let resolved = config.resolved_providers();

        for (adapter, explicit) in self.adapters {
            let provider_type = adapter.provider_type();
            let mut provider_config = explicit
                .or_else(|| resolved.iter().find(|p| p.provider_type == provider_type).cloned())
                .unwrap_or_else(|| ProviderConfig::new(provider_type));
            provider_config.timeout_ms.get_or_insert(config.defaults.timeout_ms);
            provider_config.max_retries.get_or_insert(config.defaults.max_retries);
            registry.register(adapter, provider_config).await?;
        }

        for provider_config in resolved {
            if registry.contains(provider_config.provider_type) || !provider_config.enabled {
                continue;
            }
            match LLMProviderFactory::create_provider(provider_config.clone()) {
                Ok(adapter) => registry.register(adapter, provider_config).await?,
                Err(AIError::Authentication(reason)) => {
                    warn!(provider = %provider_config.provider_type, "skipping provider: {}", reason);
                }
                Err(error) => return Err(error),
            }
        }
        if registry.is_empty() {
            warn!("no providers registered; every request will fail with NO_AVAILABLE_PROVIDERS");
        }

        let memory = if config.memory.enabled {
            let store = match self.memory_store {
                Some(store) => store,
                None => open_store(&config.memory.store).await?,
            };
            Some(Arc::new(MemoryManager::new(config.memory.clone(), store)))
        } else {
            None
        };

        let events: Option<Arc<dyn EventSink>> = if !config.observability.enabled {
            None
        } else if let Some(sink) = self.event_sink {
            Some(sink)
        } else if config.observability.tracing_enabled {
            Some(Arc::new(TracingEventSink))
        } else {
            None
        };

        info!(
            providers = registry.len(),
            mode = %config.routing.mode,
            memory = memory.is_some(),
            cache = config.cache.enabled,
            "AI service ready"
        );

        Ok(AIService {
            safety: SafetyManager::new(config.safety.clone())?,
            cache: config.cache.enabled.then(|| ResponseCache::new(config.cache.clone())),
            metrics: ServiceMetrics::new(config.observability.metrics_enabled),
            router: AIRouter::new(registry.clone()),
            registry,
            memory,
            events,
            config,
        })
    }
}

/// Conversation split around the user turn memory is assembled for.
struct MemoryTurn {
    agent_id: String,
    session_id: String,
    input: String,
}

/// A request that passed input safety, with memory context applied.
struct Prepared {
    request: CompletionRequest,
    turn: Option<MemoryTurn>,
}

/// What the caller's sink has seen during one streamed attempt.
#[derive(Default)]
struct StreamProgress {
    delivered_chars: usize,
    pending: String,
    cancelled: bool,
}

impl AIService {
    pub fn builder(config: AIConfig) -> AIServiceBuilder {
        AIServiceBuilder {
            config,
            adapters: Vec::new(),
            memory_store: None,
            event_sink: None,
        }
    }

    /// Build from configuration alone, creating adapters through the factory.
    pub async fn from_config(config: AIConfig) -> Result<Self, AIError> {
        Self::builder(config).build().await
    }

    pub fn config(&self) -> &AIConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn safety(&self) -> &SafetyManager {
        &self.safety
    }

    pub fn memory(&self) -> Option<&Arc<MemoryManager>> {
        self.memory.as_ref()
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.metrics
    }

    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        self.registry.snapshot().await.into_iter().map(|s| s.status).collect()
    }

    fn emit(&self, event: AIEvent) {
        if let Some(sink) = &self.events {
            sink.emit(&event);
        }
    }

    fn apply_defaults(&self, mut request: CompletionRequest) -> CompletionRequest {
        let defaults = &self.config.defaults;
        if request.temperature.is_none() {
            request.temperature = defaults.temperature;
        }
        if request.max_tokens.is_none() {
            request.max_tokens = defaults.max_tokens;
        }
        request
    }

    /// Routing decision for `request` under the service configuration. Calls no provider.
    pub async fn route(&self, request: &CompletionRequest) -> Result<RoutingDecision, AIError> {
        let request = self.apply_defaults(request.clone());
        self.router.route(&request, &self.config.routing).await
    }

    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AIError> {
        self.complete_with_routing(request, &self.config.routing).await
    }

    pub async fn complete_with_routing(
        &self,
        request: CompletionRequest,
        routing: &RoutingConfig,
    ) -> Result<CompletionResponse, AIError> {
        let started = Instant::now();
        let mut request = self.apply_defaults(request);
        request.stream = false;
        let request_id = request.id;
        self.emit(AIEvent::new(EventType::RequestStarted, Some(request_id)));

        let result = self.run_complete(request, routing, started).await;
        if let Err(error) = &result {
            self.fail(request_id, error, started).await;
        }
        result
    }

    async fn run_complete(
        &self,
        request: CompletionRequest,
        routing: &RoutingConfig,
        started: Instant,
    ) -> Result<CompletionResponse, AIError> {
        let Prepared { request, turn } = self.prepare(request).await?;

        let cache_key = match &self.cache {
            Some(_) if ResponseCache::is_cacheable(&request) => Some(ResponseCache::key(&request, routing)),
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, cache_key)
            && let Some(mut cached) = cache.get(key).await
        {
            cached.request_id = request.id;
            cached.cached = true;
            cached.latency = started.elapsed();
            self.emit(
                AIEvent::new(EventType::CacheHit, Some(request.id))
                    .with_provider(cached.provider, Some(cached.model.as_str()))
                    .with_latency(cached.latency),
            );
            self.metrics.record_cache_hit().await;
            self.remember(turn, &cached.content);
            return Ok(cached);
        }

        let decision = self.router.route(&request, routing).await?;
        self.announce_skipped(&request, &decision).await;
        let candidates = decision.candidates();

        let mut failed = Vec::new();
        let mut attempts = 0;
        let mut last_error = None;
        for (index, candidate) in candidates.iter().enumerate() {
            if failed.contains(&candidate.provider) {
                continue;
            }
            attempts += 1;
            match self.attempt_complete(&request, candidate).await {
                Ok(mut response) => {
                    response.fallback_count = (attempts - 1 + decision.skipped.len()) as u32;
                    let response = self.finish(response, turn, started).await;
                    if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
                        cache.insert(key, response.clone()).await;
                    }
                    return Ok(response);
                }
                Err(error) if !error.allows_fallback() => return Err(error),
                Err(error) => {
                    if error.rules_out_provider() {
                        failed.push(candidate.provider);
                    }
                    self.fall_back(&request, candidate, next_candidate(&candidates, index, &failed), &error)
                        .await;
                    last_error = Some(error);
                }
            }
        }
        Err(exhausted(attempts, last_error))
    }

    /// Input safety, sanitisation and memory context.
    async fn prepare(&self, request: CompletionRequest) -> Result<Prepared, AIError> {
        if request.messages.is_empty() {
            return Err(AIError::InvalidRequest("request has no messages".to_string()));
        }

        let results = self.safety.validate_request(&request);
        self.enforce(&request, &results).await?;
        let mut request = self.safety.sanitize_request(&request);

        let turn = match (&self.memory, &request.agent_id, &request.session_id) {
            (Some(_), Some(agent_id), Some(session_id)) if request.use_memory => {
                request.last_user_message().map(|input| MemoryTurn {
                    agent_id: agent_id.clone(),
                    session_id: session_id.clone(),
                    input: input.to_string(),
                })
            }
            _ => None,
        };
        if let Some(turn) = &turn {
            request.messages = self
                .with_memory_context(turn, std::mem::take(&mut request.messages), request.max_tokens)
                .await;
        }
        Ok(Prepared { request, turn })
    }

    async fn enforce(&self, request: &CompletionRequest, results: &[SafetyCheckResult]) -> Result<(), AIError> {
        for warning in results.iter().filter(|r| r.passed && r.action != SafetyAction::Allow) {
            debug!(request_id = %request.id, category = %warning.category, "{}", warning.reason);
        }
        let Some(failure) = SafetyManager::get_most_severe_failure(results) else {
            return Ok(());
        };

        let error = AIError::SafetyViolation {
            category: failure.category.to_string(),
            reason: failure.reason.clone(),
        };
        self.emit(
            AIEvent::new(EventType::SafetyViolation, Some(request.id))
                .with_error(&error)
                .with_meta("category", failure.category.as_str())
                .with_meta("severity", format!("{:?}", failure.severity).to_lowercase())
                .with_meta("action", format!("{:?}", failure.action).to_lowercase()),
        );
        self.metrics.record_safety_block().await;
        Err(error)
    }

    /// Replace the user turn with assembled context: facts, session turns, input.
    /// Messages before it (system prompts, caller history) and after it are kept.
    async fn with_memory_context(&self, turn: &MemoryTurn, messages: Vec<Message>, max_tokens: Option<u32>) -> Vec<Message> {
        let Some(memory) = &self.memory else {
            return messages;
        };
        let Some(position) = messages.iter().rposition(|m| m.role == MessageRole::User) else {
            return messages;
        };

        let window = self.registry.min_context_window().unwrap_or(FALLBACK_CONTEXT_WINDOW);
        let share = (window as f64 * self.config.memory.context_window_ratio) as u64;
        let surrounding: u64 = messages
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != position)
            .map(|(_, m)| m.estimated_tokens())
            .sum();
        let reserve = max_tokens.map(u64::from).unwrap_or(CONTEXT_OUTPUT_RESERVE);
        let budget = share.saturating_sub(surrounding).saturating_sub(reserve);

        match memory
            .build_context(&turn.agent_id, &turn.session_id, &turn.input, budget)
            .await
        {
            Ok(context) if !context.is_empty() => {
                let mut assembled = Vec::with_capacity(messages.len() + context.len());
                let mut rest = messages.into_iter();
                assembled.extend(rest.by_ref().take(position));
                rest.next();
                assembled.extend(context);
                assembled.extend(rest);
                assembled
            }
            Ok(_) => {
                debug!(agent_id = %turn.agent_id, budget, "no room for memory context");
                messages
            }
            Err(error) => {
                warn!(agent_id = %turn.agent_id, "memory context unavailable: {}", error);
                messages
            }
        }
    }

    fn remember(&self, turn: Option<MemoryTurn>, answer: &str) {
        if let (Some(memory), Some(turn)) = (&self.memory, turn) {
            memory.add_to_short_term(&turn.agent_id, &turn.session_id, &Message::user(turn.input.as_str()));
            memory.add_to_short_term(&turn.agent_id, &turn.session_id, &Message::assistant(answer));
        }
    }

    /// Output safety, memory, metrics and the completion event.
    async fn finish(&self, mut response: CompletionResponse, turn: Option<MemoryTurn>, started: Instant) -> CompletionResponse {
        let (content, results) = self.safety.validate_output(&response.content);
        for result in results.iter().filter(|r| r.action != SafetyAction::Allow) {
            debug!(request_id = %response.request_id, category = %result.category, "{}", result.reason);
        }
        response.content = content;
        response.latency = started.elapsed();

        self.remember(turn, &response.content);
        self.metrics.record_success(&response).await;
        self.emit(
            AIEvent::new(EventType::RequestCompleted, Some(response.request_id))
                .with_provider(response.provider, Some(response.model.as_str()))
                .with_latency(response.latency)
                .with_usage(&response.usage)
                .with_meta("fallback_count", response.fallback_count)
                .with_meta("finish_reason", format!("{:?}", response.finish_reason).to_lowercase()),
        );
        response
    }

    async fn fail(&self, request_id: uuid::Uuid, error: &AIError, started: Instant) {
        self.metrics.record_request_failure().await;
        self.emit(
            AIEvent::new(EventType::RequestFailed, Some(request_id))
                .with_error(error)
                .with_latency(started.elapsed()),
        );
    }

    /// Custom chain entries the router had to pass over count as fallbacks.
    /// Providers held back by their rate limit are reported as rate limit hits.
    async fn announce_skipped(&self, request: &CompletionRequest, decision: &RoutingDecision) {
        for limited in &decision.rate_limited {
            debug!(request_id = %request.id, provider = %limited, "rate limit window exhausted");
            self.emit(
                AIEvent::new(EventType::RateLimitHit, Some(request.id))
                    .with_provider(*limited, None)
                    .with_meta("reason", "rate limit window exhausted at routing time"),
            );
        }
        for skipped in &decision.skipped {
            info!(from = %skipped, to = %decision.provider, "provider unavailable, falling back");
            self.metrics.record_fallback(*skipped).await;
            self.emit(
                AIEvent::new(EventType::ProviderFallback, Some(request.id))
                    .with_provider(*skipped, None)
                    .with_meta("to_provider", decision.provider.as_str())
                    .with_meta("to_model", decision.model.as_str())
                    .with_meta("reason", "unavailable at routing time"),
            );
        }
    }

    async fn fall_back(
        &self,
        request: &CompletionRequest,
        from: &RouteCandidate,
        to: Option<&RouteCandidate>,
        error: &AIError,
    ) {
        let Some(to) = to else {
            return;
        };
        warn!(from = %from.provider, to = %to.provider, code = %error.code(), "falling back: {}", error);
        self.metrics.record_fallback(from.provider).await;
        self.emit(
            AIEvent::new(EventType::ProviderFallback, Some(request.id))
                .with_provider(from.provider, Some(from.model.as_str()))
                .with_error(error)
                .with_meta("to_provider", to.provider.as_str())
                .with_meta("to_model", to.model.as_str()),
        );
    }

    /// Admit a call through the circuit breaker and rate limiter.
    async fn acquire(&self, request: &CompletionRequest, candidate: &RouteCandidate) -> Result<(), AIError> {
        let tokens = request.estimated_input_tokens() + request.max_tokens.map(u64::from).unwrap_or(0);
        let result = self.registry.acquire(candidate.provider, tokens).await;
        if let Err(error @ AIError::RateLimitExceeded { .. }) = &result {
            self.emit(
                AIEvent::new(EventType::RateLimitHit, Some(request.id))
                    .with_provider(candidate.provider, Some(candidate.model.as_str()))
                    .with_error(error),
            );
        }
        result
    }

    /// Report an outcome and surface any circuit transition it caused.
    async fn record(&self, request: &CompletionRequest, candidate: &RouteCandidate, outcome: CallOutcome) {
        if let CallOutcome::Failure { error, .. } = &outcome {
            self.metrics.record_attempt_failure(candidate.provider, error).await;
        }
        let event_type = match self.registry.record_outcome(candidate.provider, outcome).await {
            Some(CircuitTransition::Opened) => EventType::CircuitOpened,
            Some(CircuitTransition::Closed) => EventType::CircuitClosed,
            None => return,
        };
        self.emit(AIEvent::new(event_type, Some(request.id)).with_provider(candidate.provider, Some(candidate.model.as_str())));
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config
            .resilience
            .backoff_ceiling(attempt)
            .mul_f64(rand::random::<f64>())
    }

    fn adapter(&self, candidate: &RouteCandidate) -> Result<(Arc<dyn LLMProvider>, ProviderConfig), AIError> {
        self.registry
            .get(candidate.provider)
            .zip(self.registry.config(candidate.provider))
            .ok_or_else(|| AIError::NoAvailableProviders(format!("{} is not registered", candidate.provider)))
    }

    /// One candidate, retried on retryable errors up to the provider's limit.
    async fn attempt_complete(&self, request: &CompletionRequest, candidate: &RouteCandidate) -> Result<CompletionResponse, AIError> {
        let (adapter, provider_config) = self.adapter(candidate)?;
        let max_retries = provider_config.max_retries();
        let mut retries = 0;

        loop {
            self.acquire(request, candidate).await?;
            let call_started = Instant::now();
            let result = match tokio::time::timeout(
                provider_config.timeout(),
                adapter.complete(request, &candidate.model),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(AIError::Timeout {
                    provider: Some(candidate.provider),
                    timeout_ms: provider_config.timeout_ms(),
                }),
            };
            let latency = call_started.elapsed();

            match result {
                Ok(response) => {
                    self.record(request, candidate, CallOutcome::Success { latency }).await;
                    debug!(provider = %candidate.provider, model = %candidate.model, latency_ms = latency.as_millis() as u64, "provider call succeeded");
                    return Ok(response);
                }
                Err(error) => {
                    self.record(
                        request,
                        candidate,
                        CallOutcome::Failure { latency, error: error.clone() },
                    )
                    .await;
                    if !error.is_retryable() || retries >= max_retries {
                        return Err(error);
                    }
                    retries += 1;
                    let delay = self.backoff(retries);
                    debug!(provider = %candidate.provider, retry = retries, delay_ms = delay.as_millis() as u64, "retrying: {}", error);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn redacts_stream(&self) -> bool {
        let safety = self.safety.config();
        safety.enabled && safety.detect_pii && safety.redact_pii
    }

    /// Stream a completion into `on_chunk`.
    ///
    /// A failure before anything reached the sink falls back like `complete`; after
    /// partial delivery the call ends with an error. When PII redaction is on, text
    /// is released a line at a time after redaction.
    pub async fn stream(&self, request: CompletionRequest, on_chunk: &mut ChunkSink<'_>) -> Result<CompletionResponse, AIError> {
        let started = Instant::now();
        let mut request = self.apply_defaults(request);
        request.stream = true;
        let request_id = request.id;
        self.emit(AIEvent::new(EventType::RequestStarted, Some(request_id)).with_meta("stream", true));

        let result = self.run_stream(request, on_chunk, started).await;
        if let Err(error) = &result {
            self.fail(request_id, error, started).await;
        }
        result
    }

    async fn run_stream(
        &self,
        request: CompletionRequest,
        on_chunk: &mut ChunkSink<'_>,
        started: Instant,
    ) -> Result<CompletionResponse, AIError> {
        let Prepared { request, turn } = self.prepare(request).await?;
        let decision = self.router.route(&request, &self.config.routing).await?;
        self.announce_skipped(&request, &decision).await;
        let candidates = decision.candidates();

        let mut failed = Vec::new();
        let mut attempts = 0;
        let mut last_error = None;
        for (index, candidate) in candidates.iter().enumerate() {
            if failed.contains(&candidate.provider) {
                continue;
            }
            attempts += 1;
            let mut progress = StreamProgress::default();
            match self.attempt_stream(&request, candidate, on_chunk, &mut progress).await {
                Ok(mut response) => {
                    response.fallback_count = (attempts - 1 + decision.skipped.len()) as u32;
                    if progress.cancelled || response.finish_reason == FinishReason::Cancelled {
                        return Ok(self.cancelled(response, &progress, started).await);
                    }
                    if !progress.pending.is_empty() {
                        let tail = self.safety.redact_output(&progress.pending);
                        let _ = on_chunk(StreamChunk::text(tail));
                    }
                    return Ok(self.finish(response, turn, started).await);
                }
                Err(error) if progress.delivered_chars > 0 => {
                    return Err(AIError::StreamInterrupted {
                        provider: candidate.provider,
                        delivered_chars: progress.delivered_chars,
                        message: error.to_string(),
                    });
                }
                Err(error) if !error.allows_fallback() => return Err(error),
                Err(error) => {
                    if error.rules_out_provider() {
                        failed.push(candidate.provider);
                    }
                    self.fall_back(&request, candidate, next_candidate(&candidates, index, &failed), &error)
                        .await;
                    last_error = Some(error);
                }
            }
        }
        Err(exhausted(attempts, last_error))
    }

    async fn cancelled(&self, mut response: CompletionResponse, progress: &StreamProgress, started: Instant) -> CompletionResponse {
        response.finish_reason = FinishReason::Cancelled;
        response.content = self.safety.redact_output(&response.content);
        response.latency = started.elapsed();
        info!(request_id = %response.request_id, delivered_chars = progress.delivered_chars, "stream cancelled by caller");
        self.emit(
            AIEvent::new(EventType::StreamCancelled, Some(response.request_id))
                .with_provider(response.provider, Some(response.model.as_str()))
                .with_latency(response.latency)
                .with_meta("delivered_chars", progress.delivered_chars),
        );
        response
    }

    async fn attempt_stream(
        &self,
        request: &CompletionRequest,
        candidate: &RouteCandidate,
        on_chunk: &mut ChunkSink<'_>,
        progress: &mut StreamProgress,
    ) -> Result<CompletionResponse, AIError> {
        let (adapter, provider_config) = self.adapter(candidate)?;
        let max_retries = provider_config.max_retries();
        let redact = self.redacts_stream();
        let safety = &self.safety;
        let mut retries = 0;

        loop {
            self.acquire(request, candidate).await?;
            let call_started = Instant::now();
            let result = {
                let mut forward = |chunk: StreamChunk| -> StreamControl {
                    if !redact {
                        progress.delivered_chars += chunk.delta.chars().count();
                        let control = on_chunk(chunk);
                        progress.cancelled |= control == StreamControl::Cancel;
                        return control;
                    }
                    progress.pending.push_str(&chunk.delta);
                    while let Some(end) = progress.pending.find('\n') {
                        let line: String = progress.pending.drain(..=end).collect();
                        let line = safety.redact_output(&line);
                        progress.delivered_chars += line.chars().count();
                        if on_chunk(StreamChunk::text(line)) == StreamControl::Cancel {
                            progress.cancelled = true;
                            return StreamControl::Cancel;
                        }
                    }
                    StreamControl::Continue
                };
                match tokio::time::timeout(
                    provider_config.timeout(),
                    adapter.stream(request, &candidate.model, &mut forward),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AIError::Timeout {
                        provider: Some(candidate.provider),
                        timeout_ms: provider_config.timeout_ms(),
                    }),
                }
            };
            let latency = call_started.elapsed();

            match result {
                Ok(response) => {
                    let outcome = if progress.cancelled || response.finish_reason == FinishReason::Cancelled {
                        CallOutcome::Cancelled
                    } else {
                        CallOutcome::Success { latency }
                    };
                    self.record(request, candidate, outcome).await;
                    return Ok(response);
                }
                Err(error) => {
                    self.record(
                        request,
                        candidate,
                        CallOutcome::Failure { latency, error: error.clone() },
                    )
                    .await;
                    if progress.delivered_chars > 0 || !error.is_retryable() || retries >= max_retries {
                        return Err(error);
                    }
                    progress.pending.clear();
                    retries += 1;
                    tokio::time::sleep(self.backoff(retries)).await;
                }
            }
        }
    }

    /// Run an agent: a bounded loop of completions with tool calls executed through
    /// the context's [`ToolExecutor`](super::ToolExecutor) and fed back as tool messages.
    pub async fn execute_agent(
        &self,
        agent: &AgentConfig,
        messages: Vec<Message>,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, AIError> {
        let started = Instant::now();
        match tokio::time::timeout(agent.timeout(), self.run_agent(agent, messages, &context, started)).await {
            Ok(result) => result,
            Err(_) => {
                let error = AIError::Timeout {
                    provider: None,
                    timeout_ms: agent.timeout_ms,
                };
                warn!(agent_id = %agent.agent_id, timeout_ms = agent.timeout_ms, "agent run timed out");
                self.emit(
                    AIEvent::new(EventType::RequestFailed, None)
                        .with_error(&error)
                        .with_latency(started.elapsed())
                        .with_meta("agent_id", agent.agent_id.as_str()),
                );
                Err(error)
            }
        }
    }

    async fn run_agent(
        &self,
        agent: &AgentConfig,
        messages: Vec<Message>,
        context: &ExecutionContext,
        started: Instant,
    ) -> Result<ExecutionResult, AIError> {
        let mut transcript = Vec::with_capacity(messages.len() + 1);
        if let Some(prompt) = &agent.system_prompt {
            transcript.push(Message::system(prompt.as_str()));
        }
        transcript.extend(messages);

        let turn = if agent.use_memory && self.memory.is_some() {
            transcript
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::User)
                .map(|m| MemoryTurn {
                    agent_id: agent.agent_id.clone(),
                    session_id: context.session_id.clone(),
                    input: m.content.clone(),
                })
        } else {
            None
        };
        if let Some(turn) = &turn {
            transcript = self.with_memory_context(turn, transcript, agent.max_tokens).await;
        }

        let routing = agent.routing.as_ref().unwrap_or(&self.config.routing);
        let max_iterations = agent.max_iterations.max(1);
        let mut usage = TokenUsage::default();
        let mut executions = Vec::new();
        let mut pending = Vec::new();
        let mut last = None;
        let mut fallback_count = 0;
        let mut stop_reason = StopReason::MaxIterations;
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;
            let request = CompletionRequest {
                messages: transcript.clone(),
                model: agent.model.clone(),
                temperature: agent.temperature,
                max_tokens: agent.max_tokens,
                tools: agent.tools.clone(),
                agent_id: Some(agent.agent_id.clone()),
                session_id: Some(context.session_id.clone()),
                user_id: context.user_id.clone(),
                task_type: context.task_type.clone(),
                use_memory: false,
                metadata: context.metadata.clone(),
                ..Default::default()
            };
            let response = self.complete_with_routing(request, routing).await?;
            usage.accumulate(&response.usage);
            fallback_count += response.fallback_count;

            let mut assistant = Message::assistant(response.content.as_str());
            assistant.tool_calls = response.tool_calls.clone();
            transcript.push(assistant);

            if response.tool_calls.is_empty() {
                stop_reason = StopReason::Completed;
                last = Some(response);
                break;
            }

            let Some(executor) = &context.tool_executor else {
                pending = response.tool_calls.clone();
                stop_reason = StopReason::ToolCallsPending;
                last = Some(response);
                break;
            };
            for call in &response.tool_calls {
                let tool_started = Instant::now();
                let (output, error) = match executor.execute(call, context).await {
                    Ok(output) => (output, None),
                    Err(error) => (format!("error: {}", error), Some(error)),
                };
                let latency = tool_started.elapsed();
                let mut event = AIEvent::new(EventType::ToolExecuted, Some(response.request_id))
                    .with_latency(latency)
                    .with_meta("tool", call.name.as_str())
                    .with_meta("agent_id", agent.agent_id.as_str());
                if let Some(error) = &error {
                    event = event.with_error(error);
                }
                self.emit(event);

                transcript.push(Message::tool_result(call.id.as_str(), output.as_str()));
                executions.push(ToolExecution {
                    call: call.clone(),
                    output,
                    error: error.as_ref().map(ErrorInfo::from),
                    latency,
                });
            }
            last = Some(response);
        }

        let content = last.as_ref().map(|r| r.content.clone()).unwrap_or_default();
        if stop_reason == StopReason::MaxIterations {
            warn!(agent_id = %agent.agent_id, iterations, "agent stopped at the iteration limit");
        }
        if stop_reason == StopReason::Completed {
            self.remember(turn, &content);
        }

        Ok(ExecutionResult {
            agent_id: agent.agent_id.clone(),
            session_id: context.session_id.clone(),
            content,
            messages: transcript,
            tool_executions: executions,
            pending_tool_calls: pending,
            iterations,
            usage,
            latency: started.elapsed(),
            stop_reason,
            provider: last.as_ref().map(|r| r.provider),
            model: last.map(|r| r.model),
            fallback_count,
        })
    }
}

/// The next candidate whose provider has not already been ruled out.
fn next_candidate<'a>(
    candidates: &'a [RouteCandidate],
    index: usize,
    failed: &[ProviderType],
) -> Option<&'a RouteCandidate> {
    candidates[index + 1..]
        .iter()
        .find(|c| !failed.contains(&c.provider))
}

fn exhausted(candidates: usize, last_error: Option<AIError>) -> AIError {
    match last_error {
        Some(error) => AIError::NoAvailableProviders(format!(
            "all {} candidate(s) failed; last error: {}",
            candidates, error
        )),
        None => AIError::NoAvailableProviders("no candidates to try".to_string()),
    }
}
