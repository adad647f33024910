use crate::error::AIError;
use crate::llm::provider::LLMProvider;
use crate::llm::types::{ModelInfo, ProviderConfig, ProviderType, RateLimitStatus};
use crate::registry::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CircuitTransition,
};
use crate::registry::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Smoothing factor for the per-provider latency estimate.
pub const DEFAULT_LATENCY_EWMA_ALPHA: f64 = 0.3;

/// Outcome of one provider call, reported back after the attempt.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    Success { latency: Duration },
    Failure { latency: Duration, error: AIError },
    /// The caller stopped consuming; says nothing about provider health.
    Cancelled,
}

/// Live health of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider_type: ProviderType,
    pub enabled: bool,
    pub available: bool,
    /// The request or token window for the current minute is used up.
    pub rate_limited: bool,
    pub circuit_state: CircuitState,
    pub last_transition: DateTime<Utc>,
    /// Smoothed observed latency, absent until the first success.
    pub latency_ms: Option<f64>,
    pub error_rate: f64,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub rate_limit: RateLimitStatus,
}

/// Everything the router needs to know about a provider at one instant.
#[derive(Debug, Clone)]
pub struct ProviderSnapshot {
    pub provider_type: ProviderType,
    pub priority: u32,
    pub default_model: String,
    pub models: Vec<ModelInfo>,
    pub status: ProviderStatus,
}

#[derive(Debug)]
struct ProviderHealth {
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    latency_ewma_ms: Option<f64>,
    total_calls: u64,
    total_failures: u64,
    last_error: Option<String>,
    last_success: Option<DateTime<Utc>>,
}

struct ProviderEntry {
    provider: Arc<dyn LLMProvider>,
    config: ProviderConfig,
    models: Vec<ModelInfo>,
    default_model: String,
    health: Mutex<ProviderHealth>,
}

impl ProviderEntry {
    fn status(&self, health: &ProviderHealth, now: DateTime<Utc>) -> ProviderStatus {
        let circuit_state = health.breaker.state_at(now);
        let rate_limited = health.limiter.is_exhausted_at(now);
        ProviderStatus {
            provider_type: self.config.provider_type,
            enabled: self.config.enabled,
            available: self.config.enabled && circuit_state != CircuitState::Open && !rate_limited,
            rate_limited,
            circuit_state,
            last_transition: health.breaker.last_transition(),
            latency_ms: health.latency_ewma_ms,
            error_rate: health.breaker.error_rate(),
            consecutive_failures: health.breaker.consecutive_failures(),
            total_calls: health.total_calls,
            total_failures: health.total_failures,
            last_error: health.last_error.clone(),
            last_success: health.last_success,
            rate_limit: health.limiter.status_at(now),
        }
    }
}

/// Owns the configured adapters and their health. Keyed by provider type; each
/// entry's breaker, limiter and statistics sit behind one async mutex so updates
/// for a provider are atomic while different providers never contend.
pub struct ProviderRegistry {
    entries: DashMap<ProviderType, Arc<ProviderEntry>>,
    breaker_config: CircuitBreakerConfig,
    latency_alpha: f64,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl ProviderRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            entries: DashMap::new(),
            breaker_config,
            latency_alpha: DEFAULT_LATENCY_EWMA_ALPHA,
        }
    }

    pub fn with_latency_alpha(mut self, alpha: f64) -> Self {
        self.latency_alpha = alpha.clamp(0.01, 1.0);
        self
    }

    /// Register `provider` under its type, replacing any previous entry. Models come
    /// from the configuration when it lists any, otherwise from the adapter.
    pub async fn register(
        &self,
        provider: Arc<dyn LLMProvider>,
        config: ProviderConfig,
    ) -> Result<(), AIError> {
        if provider.provider_type() != config.provider_type {
            return Err(AIError::Configuration(format!(
                "adapter for {} registered with {} configuration",
                provider.provider_type(),
                config.provider_type
            )));
        }

        let models = if config.models.is_empty() {
            provider.list_models().await?
        } else {
            config.models.clone()
        };
        let default_model = match &config.default_model {
            Some(model) if models.iter().any(|m| &m.id == model) => model.clone(),
            Some(model) => {
                return Err(AIError::Configuration(format!(
                    "default model '{}' is not served by {}",
                    model, config.provider_type
                )));
            }
            None => models
                .first()
                .map(|m| m.id.clone())
                .ok_or_else(|| {
                    AIError::Configuration(format!("{} has no models", config.provider_type))
                })?,
        };

        let health = ProviderHealth {
            breaker: CircuitBreaker::new(self.breaker_config.clone()),
            limiter: RateLimiter::new(config.rate_limits.clone()),
            latency_ewma_ms: None,
            total_calls: 0,
            total_failures: 0,
            last_error: None,
            last_success: None,
        };
        let provider_type = config.provider_type;
        info!(
            provider = %provider_type,
            models = models.len(),
            default_model = %default_model,
            "registered provider"
        );

        let entry = ProviderEntry {
            provider,
            config,
            models,
            default_model,
            health: Mutex::new(health),
        };
        if self.entries.insert(provider_type, Arc::new(entry)).is_some() {
            debug!(provider = %provider_type, "replaced existing provider entry");
        }
        Ok(())
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn LLMProvider>> {
        self.entries.get(&provider_type).map(|e| e.provider.clone())
    }

    pub fn config(&self, provider_type: ProviderType) -> Option<ProviderConfig> {
        self.entries.get(&provider_type).map(|e| e.config.clone())
    }

    pub fn models(&self, provider_type: ProviderType) -> Option<Vec<ModelInfo>> {
        self.entries.get(&provider_type).map(|e| e.models.clone())
    }

    pub fn model_info(&self, provider_type: ProviderType, model: &str) -> Option<ModelInfo> {
        self.entries
            .get(&provider_type)
            .and_then(|e| e.models.iter().find(|m| m.id == model).cloned())
    }

    pub fn contains(&self, provider_type: ProviderType) -> bool {
        self.entries.contains_key(&provider_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered provider types in a stable order.
    pub fn provider_types(&self) -> Vec<ProviderType> {
        let mut types: Vec<ProviderType> = self.entries.iter().map(|e| *e.key()).collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    /// Smallest context window across every registered model.
    pub fn min_context_window(&self) -> Option<u64> {
        self.entries
            .iter()
            .filter_map(|e| e.models.iter().map(|m| m.context_window).min())
            .min()
    }

    fn entry(&self, provider_type: ProviderType) -> Option<Arc<ProviderEntry>> {
        self.entries.get(&provider_type).map(|e| e.value().clone())
    }

    fn entries_sorted(&self) -> Vec<Arc<ProviderEntry>> {
        let mut entries: Vec<Arc<ProviderEntry>> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by_key(|e| e.config.provider_type.as_str());
        entries
    }

    pub async fn status(&self, provider_type: ProviderType) -> Option<ProviderStatus> {
        let entry = self.entry(provider_type)?;
        let health = entry.health.lock().await;
        Some(entry.status(&health, Utc::now()))
    }

    pub async fn list_available(&self) -> Vec<ProviderType> {
        self.list_available_at(Utc::now()).await
    }

    /// Providers that are enabled, not open and not rate-limited at `now`.
    pub async fn list_available_at(&self, now: DateTime<Utc>) -> Vec<ProviderType> {
        let mut available = Vec::new();
        for entry in self.entries_sorted() {
            let health = entry.health.lock().await;
            if entry.status(&health, now).available {
                available.push(entry.config.provider_type);
            }
        }
        available
    }

    pub async fn snapshot(&self) -> Vec<ProviderSnapshot> {
        self.snapshot_at(Utc::now()).await
    }

    pub async fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<ProviderSnapshot> {
        let mut snapshots = Vec::new();
        for entry in self.entries_sorted() {
            let health = entry.health.lock().await;
            snapshots.push(ProviderSnapshot {
                provider_type: entry.config.provider_type,
                priority: entry.config.priority,
                default_model: entry.default_model.clone(),
                models: entry.models.clone(),
                status: entry.status(&health, now),
            });
        }
        snapshots
    }

    pub async fn acquire(&self, provider_type: ProviderType, estimated_tokens: u64) -> Result<(), AIError> {
        self.acquire_at(provider_type, estimated_tokens, Utc::now()).await
    }

    /// Admit one call: circuit first, then the rate limit. Fails locally without
    /// touching the network.
    pub async fn acquire_at(
        &self,
        provider_type: ProviderType,
        estimated_tokens: u64,
        now: DateTime<Utc>,
    ) -> Result<(), AIError> {
        let entry = self.entry(provider_type).ok_or_else(|| {
            AIError::NoAvailableProviders(format!("{} is not registered", provider_type))
        })?;
        if !entry.config.enabled {
            return Err(AIError::NoAvailableProviders(format!("{} is disabled", provider_type)));
        }

        let mut health = entry.health.lock().await;
        if !health.breaker.try_acquire_at(now) {
            debug!(provider = %provider_type, "rejected by open circuit");
            return Err(AIError::CircuitOpen(provider_type));
        }
        if let Err(rejection) = health.limiter.try_acquire_at(estimated_tokens, now) {
            health.breaker.record_cancelled();
            warn!(provider = %provider_type, reset_time = %rejection.reset_time, "{}", rejection.message);
            return Err(AIError::RateLimitExceeded {
                provider: provider_type,
                message: rejection.message,
                reset_time: Some(rejection.reset_time),
            });
        }
        Ok(())
    }

    pub async fn record_outcome(
        &self,
        provider_type: ProviderType,
        outcome: CallOutcome,
    ) -> Option<CircuitTransition> {
        self.record_outcome_at(provider_type, outcome, Utc::now()).await
    }

    /// Feed a call result into the provider's breaker and statistics. Returns the
    /// circuit transition it caused, if any.
    pub async fn record_outcome_at(
        &self,
        provider_type: ProviderType,
        outcome: CallOutcome,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        let entry = self.entry(provider_type)?;
        let mut health = entry.health.lock().await;
        match outcome {
            CallOutcome::Success { latency } => {
                health.total_calls += 1;
                health.last_success = Some(now);
                let observed = latency.as_secs_f64() * 1000.0;
                health.latency_ewma_ms = Some(match health.latency_ewma_ms {
                    Some(previous) => self.latency_alpha * observed + (1.0 - self.latency_alpha) * previous,
                    None => observed,
                });
                health.breaker.record_success_at(now)
            }
            CallOutcome::Failure { error, .. } => {
                health.total_calls += 1;
                health.last_error = Some(error.to_string());
                if error.counts_against_provider() {
                    health.total_failures += 1;
                    health.breaker.record_failure_at(now)
                } else {
                    health.breaker.record_cancelled();
                    None
                }
            }
            CallOutcome::Cancelled => {
                health.breaker.record_cancelled();
                None
            }
        }
    }

    pub async fn force_open(&self, provider_type: ProviderType) -> Option<CircuitTransition> {
        let entry = self.entry(provider_type)?;
        let mut health = entry.health.lock().await;
        health.breaker.force_open_at(Utc::now())
    }

    pub async fn force_close(&self, provider_type: ProviderType) -> Option<CircuitTransition> {
        let entry = self.entry(provider_type)?;
        let mut health = entry.health.lock().await;
        health.breaker.force_close_at(Utc::now())
    }
}
