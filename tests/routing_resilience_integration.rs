use ai_router::llm::catalog::default_models;
use ai_router::service::RecordingEventSink;
use ai_router::{
    AIConfig, AIError, AIService, CompletionRequest, ErrorCode, EventType, Message, ProviderConfig, ProviderType,
    RoutingConfig, RoutingMode, ScriptedProvider, ScriptedReply,
};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

fn provider(provider_type: ProviderType, latency_ms: u64) -> Arc<ScriptedProvider> {
    let mut model = default_models(provider_type).remove(0);
    model.latency_ms = latency_ms;
    Arc::new(
        ScriptedProvider::new(provider_type)
            .with_models(vec![model])
            .with_default_reply(ScriptedReply::text(format!("answer from {}", provider_type))),
    )
}

fn base_config() -> AIConfig {
    let mut config = AIConfig::default();
    config.resilience.retry_base_delay_ms = 1;
    config.resilience.retry_max_delay_ms = 2;
    config
}

async fn build(config: AIConfig, providers: &[Arc<ScriptedProvider>]) -> (AIService, Arc<RecordingEventSink>) {
    let events = Arc::new(RecordingEventSink::new());
    let mut builder = AIService::builder(config).with_event_sink(events.clone());
    for provider in providers {
        builder = builder.with_provider(provider.clone());
    }
    (builder.build().await.unwrap(), events)
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest::new(vec![Message::user(text)])
}

#[tokio::test]
async fn test_fast_mode_selects_200ms_provider_over_800ms() {
    let slow = provider(ProviderType::Anthropic, 800);
    let fast = provider(ProviderType::Groq, 200);
    let mut config = base_config();
    config.routing.mode = RoutingMode::Fast;
    let (service, _) = build(config, &[slow, fast]).await;

    let decision = service.route(&request("quick question")).await.unwrap();
    assert_eq!(decision.provider, ProviderType::Groq);
    assert_eq!(decision.alternatives[0].provider, ProviderType::Anthropic);

    let response = service.complete(request("quick question")).await.unwrap();
    assert_eq!(response.provider, ProviderType::Groq);
}

#[tokio::test]
async fn test_open_primary_resolves_to_next_in_chain() {
    let a = provider(ProviderType::OpenAI, 400);
    let b = provider(ProviderType::Groq, 400);
    let mut config = base_config();
    config.routing = RoutingConfig::custom(ProviderType::OpenAI, vec![ProviderType::Groq]);
    let (service, events) = build(config, &[a.clone(), b]).await;
    service.registry().force_open(ProviderType::OpenAI).await;

    let response = service.complete(request("hello")).await.unwrap();
    assert_eq!(response.provider, ProviderType::Groq);
    assert_eq!(response.content, "answer from groq");
    assert_eq!(a.call_count().await, 0);

    let fallbacks = events.of_type(EventType::ProviderFallback);
    assert_eq!(fallbacks.len(), 1);
    assert_eq!(fallbacks[0].provider, Some(ProviderType::OpenAI));
}

#[tokio::test]
async fn test_all_circuits_open_fails_with_no_available_providers() {
    let a = provider(ProviderType::OpenAI, 400);
    let b = provider(ProviderType::Groq, 400);
    let (service, events) = build(base_config(), &[a.clone(), b.clone()]).await;
    service.registry().force_open(ProviderType::OpenAI).await;
    service.registry().force_open(ProviderType::Groq).await;

    let error = service.complete(request("hello")).await.unwrap_err();
    assert_eq!(error.code(), ErrorCode::NoAvailableProviders);
    assert_eq!(a.call_count().await + b.call_count().await, 0);

    let failed = events.of_type(EventType::RequestFailed);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].error.as_ref().map(|e| e.code), Some(ErrorCode::NoAvailableProviders));
}

#[tokio::test]
async fn test_circuit_recovers_after_cooldown() {
    let a = Arc::new(ScriptedProvider::new(ProviderType::OpenAI).with_replies([
        ScriptedReply::Fail(AIError::Provider {
            provider: ProviderType::OpenAI,
            message: "502 bad gateway".into(),
            status: Some(502),
        }),
        ScriptedReply::text("recovered"),
    ]));
    let b = provider(ProviderType::Groq, 400);

    let mut config = base_config();
    config.routing = RoutingConfig::custom(ProviderType::OpenAI, vec![ProviderType::Groq]);
    config.resilience.circuit_breaker.failure_threshold = 1;
    config.resilience.circuit_breaker.cooldown_ms = 50;

    let events = Arc::new(RecordingEventSink::new());
    let service = AIService::builder(config)
        .with_event_sink(events.clone())
        .with_provider_config(
            a.clone(),
            ProviderConfig {
                max_retries: Some(0),
                ..ProviderConfig::new(ProviderType::OpenAI)
            },
        )
        .with_provider(b)
        .build()
        .await
        .unwrap();

    let first = service.complete(request("hello")).await.unwrap();
    assert_eq!(first.provider, ProviderType::Groq);
    assert_eq!(events.count(EventType::CircuitOpened), 1);
    assert!(!service.registry().list_available().await.contains(&ProviderType::OpenAI));

    tokio::time::sleep(Duration::from_millis(80)).await;

    let second = service.complete(request("hello again")).await.unwrap();
    assert_eq!(second.provider, ProviderType::OpenAI);
    assert_eq!(second.content, "recovered");
    assert_eq!(events.count(EventType::CircuitClosed), 1);
    assert_eq!(a.call_count().await, 2);
}

#[tokio::test]
async fn test_concurrent_requests_are_all_answered() {
    let a = provider(ProviderType::OpenAI, 300);
    let b = provider(ProviderType::Groq, 300);
    let (service, events) = build(base_config(), &[a.clone(), b.clone()]).await;

    let results = join_all((0..16).map(|i| service.complete(request(&format!("question {}", i))))).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(a.call_count().await + b.call_count().await, 16);
    assert_eq!(events.count(EventType::RequestCompleted), 16);

    let metrics = service.metrics().snapshot().await;
    assert_eq!(metrics.totals.requests, 16);
}

#[tokio::test]
async fn test_rate_limit_rejection_moves_to_next_provider() {
    let a = provider(ProviderType::OpenAI, 300);
    let b = provider(ProviderType::Groq, 300);
    let mut config = base_config();
    config.routing = RoutingConfig::custom(ProviderType::OpenAI, vec![ProviderType::Groq]);
    config.providers.push(ProviderConfig {
        rate_limits: ai_router::llm::RateLimitConfig {
            requests_per_minute: 1,
            ..Default::default()
        },
        ..ProviderConfig::new(ProviderType::OpenAI)
    });
    let (service, events) = build(config, &[a.clone(), b]).await;

    let first = service.complete(request("one")).await.unwrap();
    let second = service.complete(request("two")).await.unwrap();

    assert_eq!(first.provider, ProviderType::OpenAI);
    assert_eq!(second.provider, ProviderType::Groq);
    assert_eq!(a.call_count().await, 1);
    assert_eq!(events.count(EventType::RateLimitHit), 1);
}
