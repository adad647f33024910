//! Service configuration.
//!
//! Loaded from TOML; every section is optional and falls back to its defaults.
//!
//! ```toml
//! [routing]
//! mode = "fast"
//!
//! [[providers]]
//! provider_type = "openai"
//! api_key_env = "OPENAI_API_KEY"
//!
//! [[providers]]
//! provider_type = "ollama"
//! priority = 10
//! ```

use crate::error::AIError;
use crate::llm::types::{ProviderConfig, ProviderType};
use crate::memory::{MemoryConfig, MemoryStoreConfig};
use crate::registry::{CircuitBreakerConfig, manager::DEFAULT_LATENCY_EWMA_ALPHA};
use crate::router::RoutingConfig;
use crate::safety::SafetyConfig;
use crate::service::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Deliver events to the sink. When off, no events are emitted at all.
    pub enabled: bool,
    /// Default level of the `ai_router` log target.
    pub log_level: String,
    pub metrics_enabled: bool,
    /// Render events through `tracing` when no sink is supplied.
    pub tracing_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
            metrics_enabled: true,
            tracing_enabled: true,
        }
    }
}

/// Generation and call defaults applied when a request or provider leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1024),
            timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

/// Circuit breaking, latency smoothing and retry backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub latency_ewma_alpha: f64,
    /// First retry delay; doubles per attempt with full jitter.
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            latency_ewma_alpha: DEFAULT_LATENCY_EWMA_ALPHA,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 5_000,
        }
    }
}

impl ResilienceConfig {
    /// Upper bound of the jittered delay before retry number `attempt` (1-based).
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.retry_base_delay_ms
                .saturating_mul(factor)
                .min(self.retry_max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AIConfig {
    pub providers: Vec<ProviderConfig>,
    pub routing: RoutingConfig,
    pub safety: SafetyConfig,
    pub memory: MemoryConfig,
    pub observability: ObservabilityConfig,
    pub cache: CacheConfig,
    pub defaults: DefaultsConfig,
    pub resilience: ResilienceConfig,
}

impl AIConfig {
    /// A starting point listing the hosted backends and a local Ollama.
    pub fn example() -> Self {
        let providers = [
            (ProviderType::OpenAI, 0),
            (ProviderType::Anthropic, 1),
            (ProviderType::Groq, 2),
            (ProviderType::Ollama, 10),
        ]
        .into_iter()
        .map(|(provider_type, priority)| ProviderConfig {
            api_key_env: provider_type.default_api_key_env().map(str::to_string),
            priority,
            ..ProviderConfig::new(provider_type)
        })
        .collect();

        let mut config = Self {
            providers,
            ..Default::default()
        };
        config.memory.store = MemoryStoreConfig::File {
            path: crate::env::memory_file_path(Path::new(".")),
        };
        config
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AIError> {
        let config: AIConfig =
            toml::from_str(content).map_err(|e| AIError::Configuration(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, AIError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AIError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, AIError> {
        toml::to_string_pretty(self).map_err(|e| AIError::Configuration(format!("cannot serialize config: {}", e)))
    }

    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<(), AIError> {
        let path = path.as_ref();
        let content = self.to_toml_string()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| AIError::Configuration(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| AIError::Configuration(format!("cannot write {}: {}", path.display(), e)))
    }

    pub fn provider(&self, provider_type: ProviderType) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.provider_type == provider_type)
    }

    /// Provider configurations with the service defaults filled in.
    pub fn resolved_providers(&self) -> Vec<ProviderConfig> {
        self.providers
            .iter()
            .cloned()
            .map(|mut provider| {
                provider.timeout_ms.get_or_insert(self.defaults.timeout_ms);
                provider.max_retries.get_or_insert(self.defaults.max_retries);
                provider
            })
            .collect()
    }

    /// Reject settings that cannot work. Problems that only degrade behaviour are logged.
    pub fn validate(&self) -> Result<(), AIError> {
        let invalid = |message: String| Err(AIError::Configuration(message));

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if !seen.insert(provider.provider_type) {
                return invalid(format!("provider {} is configured twice", provider.provider_type));
            }
            if provider.timeout_ms == Some(0) {
                return invalid(format!("provider {} has a zero timeout", provider.provider_type));
            }
        }

        let routing = &self.routing;
        for provider in routing.primary_provider.iter().chain(&routing.fallback_chain) {
            if !seen.contains(provider) {
                warn!(provider = %provider, "routing names a provider that is not configured");
            }
        }
        let w = &routing.weights;
        if [w.latency, w.cost, w.error_rate].iter().any(|v| !v.is_finite() || *v < 0.0) {
            return invalid("routing weights must be finite and non-negative".to_string());
        }
        if routing.max_cost_per_request.is_some_and(|c| !c.is_finite() || c < 0.0) {
            return invalid("routing.max_cost_per_request must be non-negative".to_string());
        }

        for pattern in &self.safety.blocked_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                return invalid(format!("blocked pattern '{}': {}", pattern, e));
            }
        }

        let ratio = self.memory.context_window_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return invalid(format!("memory.context_window_ratio must be in (0, 1], got {}", ratio));
        }
        if self.memory.short_term_capacity == 0 {
            return invalid("memory.short_term_capacity must be at least 1".to_string());
        }

        if self.cache.enabled && self.cache.max_size == 0 {
            return invalid("cache.max_size must be positive when the cache is enabled".to_string());
        }

        let breaker = &self.resilience.circuit_breaker;
        if breaker.failure_threshold == 0 {
            return invalid("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if !(breaker.error_rate_threshold > 0.0 && breaker.error_rate_threshold <= 1.0) {
            return invalid("circuit_breaker.error_rate_threshold must be in (0, 1]".to_string());
        }
        if breaker.window_size == 0 || breaker.half_open_max_probes == 0 {
            return invalid("circuit_breaker window and probe counts must be positive".to_string());
        }
        let alpha = self.resilience.latency_ewma_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return invalid(format!("resilience.latency_ewma_alpha must be in (0, 1], got {}", alpha));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::RoutingMode;
    use tempfile::TempDir;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AIConfig::from_toml_str(
            r#"
            [routing]
            mode = "fast"

            [[providers]]
            provider_type = "groq"
            priority = 3

            [cache]
            enabled = true
            strategy = "lfu"
            "#,
        )
        .unwrap();

        assert_eq!(config.routing.mode, RoutingMode::Fast);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].priority, 3);
        assert_eq!(config.providers[0].rate_limits.requests_per_minute, 60);
        assert!(config.cache.enabled);
        assert_eq!(config.memory.short_term_capacity, 20);
        assert!(config.safety.detect_prompt_injection);
    }

    #[test]
    fn test_defaults_fill_provider_gaps() {
        let mut config = AIConfig::default();
        config.defaults.timeout_ms = 5_000;
        config.providers.push(ProviderConfig::new(ProviderType::OpenAI));
        config.providers.push(ProviderConfig {
            timeout_ms: Some(1_000),
            ..ProviderConfig::new(ProviderType::Groq)
        });

        let resolved = config.resolved_providers();
        assert_eq!(resolved[0].timeout_ms, Some(5_000));
        assert_eq!(resolved[1].timeout_ms, Some(1_000));
        assert_eq!(resolved[0].max_retries, Some(2));
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let duplicate = AIConfig {
            providers: vec![
                ProviderConfig::new(ProviderType::Groq),
                ProviderConfig::new(ProviderType::Groq),
            ],
            ..Default::default()
        };
        assert!(matches!(duplicate.validate(), Err(AIError::Configuration(_))));

        let mut bad_regex = AIConfig::default();
        bad_regex.safety.blocked_patterns.push("(unclosed".into());
        assert!(bad_regex.validate().is_err());

        let mut bad_ratio = AIConfig::default();
        bad_ratio.memory.context_window_ratio = 0.0;
        assert!(bad_ratio.validate().is_err());

        assert!(AIConfig::from_toml_str("routing = 3").is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("ai-router.toml");
        let config = AIConfig::example();

        config.to_toml_file(&path).unwrap();
        let loaded = AIConfig::from_toml_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let resilience = ResilienceConfig {
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 350,
            ..Default::default()
        };
        assert_eq!(resilience.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(resilience.backoff_ceiling(2), Duration::from_millis(200));
        assert_eq!(resilience.backoff_ceiling(3), Duration::from_millis(350));
    }
}
