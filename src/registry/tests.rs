use super::*;
use crate::error::AIError;
use crate::llm::{ProviderConfig, ProviderType, RateLimitConfig, ScriptedProvider};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

fn failure(provider: ProviderType) -> CallOutcome {
    CallOutcome::Failure {
        latency: Duration::from_millis(10),
        error: AIError::Provider {
            provider,
            message: "502 bad gateway".into(),
            status: Some(502),
        },
    }
}

async fn registry_with(types: &[ProviderType], breaker: CircuitBreakerConfig) -> ProviderRegistry {
    let registry = ProviderRegistry::new(breaker);
    for provider_type in types {
        registry
            .register(
                Arc::new(ScriptedProvider::new(*provider_type)),
                ProviderConfig::new(*provider_type),
            )
            .await
            .unwrap();
    }
    registry
}

#[tokio::test]
async fn test_register_and_lookup() {
    let registry = registry_with(&[ProviderType::Groq, ProviderType::Anthropic], Default::default()).await;
    assert_eq!(registry.len(), 2);
    assert!(registry.get(ProviderType::Groq).is_some());
    assert!(registry.get(ProviderType::OpenAI).is_none());
    assert_eq!(
        registry.provider_types(),
        vec![ProviderType::Anthropic, ProviderType::Groq]
    );
    assert_eq!(registry.list_available().await.len(), 2);
}

#[tokio::test]
async fn test_register_rejects_mismatched_adapter() {
    let registry = ProviderRegistry::default();
    let result = registry
        .register(
            Arc::new(ScriptedProvider::new(ProviderType::Groq)),
            ProviderConfig::new(ProviderType::OpenAI),
        )
        .await;
    assert!(matches!(result, Err(AIError::Configuration(_))));
}

#[tokio::test]
async fn test_register_rejects_unknown_default_model() {
    let registry = ProviderRegistry::default();
    let config = ProviderConfig {
        default_model: Some("not-a-model".into()),
        ..ProviderConfig::new(ProviderType::OpenAI)
    };
    let result = registry
        .register(Arc::new(ScriptedProvider::new(ProviderType::OpenAI)), config)
        .await;
    assert!(matches!(result, Err(AIError::Configuration(_))));
}

#[tokio::test]
async fn test_failures_open_and_probe_closes() {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 3,
        cooldown_ms: 1_000,
        ..Default::default()
    };
    let registry = registry_with(&[ProviderType::OpenAI], breaker).await;
    let now = Utc::now();

    for _ in 0..2 {
        assert_eq!(
            registry
                .record_outcome_at(ProviderType::OpenAI, failure(ProviderType::OpenAI), now)
                .await,
            None
        );
    }
    assert_eq!(
        registry
            .record_outcome_at(ProviderType::OpenAI, failure(ProviderType::OpenAI), now)
            .await,
        Some(CircuitTransition::Opened)
    );
    assert!(registry.list_available_at(now).await.is_empty());
    assert!(matches!(
        registry.acquire_at(ProviderType::OpenAI, 10, now).await,
        Err(AIError::CircuitOpen(ProviderType::OpenAI))
    ));

    let later = now + chrono::Duration::seconds(2);
    assert_eq!(registry.list_available_at(later).await, vec![ProviderType::OpenAI]);
    registry.acquire_at(ProviderType::OpenAI, 10, later).await.unwrap();
    let transition = registry
        .record_outcome_at(
            ProviderType::OpenAI,
            CallOutcome::Success {
                latency: Duration::from_millis(120),
            },
            later,
        )
        .await;
    assert_eq!(transition, Some(CircuitTransition::Closed));

    let status = registry.status(ProviderType::OpenAI).await.unwrap();
    assert_eq!(status.circuit_state, CircuitState::Closed);
    assert_eq!(status.total_calls, 4);
    assert_eq!(status.total_failures, 3);
    assert!(status.last_error.is_some());
}

#[tokio::test]
async fn test_request_scoped_errors_do_not_trip_breaker() {
    let breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        ..Default::default()
    };
    let registry = registry_with(&[ProviderType::Anthropic], breaker).await;
    let outcome = CallOutcome::Failure {
        latency: Duration::ZERO,
        error: AIError::ContextLengthExceeded {
            current: 300_000,
            max: 200_000,
        },
    };
    assert_eq!(registry.record_outcome(ProviderType::Anthropic, outcome).await, None);
    assert_eq!(registry.record_outcome(ProviderType::Anthropic, CallOutcome::Cancelled).await, None);
    let status = registry.status(ProviderType::Anthropic).await.unwrap();
    assert_eq!(status.circuit_state, CircuitState::Closed);
    assert_eq!(status.total_failures, 0);
}

#[tokio::test]
async fn test_rate_limit_rejects_locally() {
    let registry = ProviderRegistry::default();
    let config = ProviderConfig {
        rate_limits: RateLimitConfig {
            requests_per_minute: 1,
            tokens_per_minute: 0,
            requests_per_day: None,
        },
        ..ProviderConfig::new(ProviderType::Together)
    };
    registry
        .register(Arc::new(ScriptedProvider::new(ProviderType::Together)), config)
        .await
        .unwrap();

    registry.acquire(ProviderType::Together, 50).await.unwrap();
    let err = registry.acquire(ProviderType::Together, 50).await.unwrap_err();
    match err {
        AIError::RateLimitExceeded { reset_time, .. } => assert!(reset_time.is_some()),
        other => panic!("unexpected error {other:?}"),
    }
    assert!(registry.list_available().await.is_empty());
}

#[tokio::test]
async fn test_latency_estimate_is_smoothed() {
    let registry = registry_with(&[ProviderType::Groq], Default::default()).await;
    for ms in [100, 200] {
        registry
            .record_outcome(
                ProviderType::Groq,
                CallOutcome::Success {
                    latency: Duration::from_millis(ms),
                },
            )
            .await;
    }
    let latency = registry.status(ProviderType::Groq).await.unwrap().latency_ms.unwrap();
    assert!((latency - 130.0).abs() < 1e-6);
}
