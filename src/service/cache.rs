use crate::llm::types::{CompletionRequest, CompletionResponse};
use crate::router::RoutingConfig;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStrategy {
    #[default]
    Lru,
    Lfu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub max_size: usize,
    pub strategy: CacheStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: 300,
            max_size: 1_000,
            strategy: CacheStrategy::Lru,
        }
    }
}

#[derive(Debug)]
struct CachedResponse {
    response: CompletionResponse,
    inserted_at: DateTime<Utc>,
    /// Logical clock value of the last hit or insert.
    last_used: u64,
    hits: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<u64, CachedResponse>,
    clock: u64,
}

/// In-process response cache keyed by the conversation and generation parameters.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Streams and tool-bearing requests are never cached.
    pub fn is_cacheable(request: &CompletionRequest) -> bool {
        !request.stream && request.tools.is_empty()
    }

    /// Key over the conversation, the generation parameters and the routing
    /// constraints that decide which provider may answer.
    pub fn key(request: &CompletionRequest, routing: &RoutingConfig) -> u64 {
        let mut hasher = DefaultHasher::new();
        for message in &request.messages {
            message.role.as_str().hash(&mut hasher);
            message.content.hash(&mut hasher);
            message.tool_call_id.hash(&mut hasher);
        }
        request.model.hash(&mut hasher);
        request.temperature.map(f32::to_bits).hash(&mut hasher);
        request.max_tokens.hash(&mut hasher);
        request.stop.hash(&mut hasher);
        request.task_type.hash(&mut hasher);

        routing.mode.hash(&mut hasher);
        routing.primary_provider.hash(&mut hasher);
        routing.fallback_chain.hash(&mut hasher);
        request
            .task_type
            .as_ref()
            .and_then(|task| routing.task_type_routing.get(task))
            .hash(&mut hasher);
        routing.preferred_models.hash(&mut hasher);
        routing.exclude_models.hash(&mut hasher);
        routing.require_features.hash(&mut hasher);
        routing.max_latency_ms.hash(&mut hasher);
        routing.max_cost_per_request.map(f64::to_bits).hash(&mut hasher);
        hasher.finish()
    }

    fn expired(&self, entry: &CachedResponse, now: DateTime<Utc>) -> bool {
        now - entry.inserted_at >= Duration::seconds(self.config.ttl_seconds.min(i64::MAX as u64) as i64)
    }

    pub async fn get(&self, key: u64) -> Option<CompletionResponse> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: u64, now: DateTime<Utc>) -> Option<CompletionResponse> {
        let mut state = self.state.lock().await;
        let expired = self.expired(state.entries.get(&key)?, now);
        if expired {
            state.entries.remove(&key);
            return None;
        }
        state.clock += 1;
        let clock = state.clock;
        let entry = state.entries.get_mut(&key)?;
        entry.last_used = clock;
        entry.hits += 1;
        Some(entry.response.clone())
    }

    pub async fn insert(&self, key: u64, response: CompletionResponse) {
        self.insert_at(key, response, Utc::now()).await
    }

    /// Store a response, evicting expired entries first and then one victim chosen
    /// by the strategy when the cache is full.
    pub async fn insert_at(&self, key: u64, response: CompletionResponse, now: DateTime<Utc>) {
        if self.config.max_size == 0 {
            return;
        }
        let mut state = self.state.lock().await;
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            state.entries.retain(|_, entry| !self.expired(entry, now));
        }
        if !state.entries.contains_key(&key) && state.entries.len() >= self.config.max_size {
            let victim = match self.config.strategy {
                CacheStrategy::Lru => state.entries.iter().min_by_key(|(_, e)| e.last_used),
                CacheStrategy::Lfu => state
                    .entries
                    .iter()
                    .min_by_key(|(_, e)| (e.hits, e.last_used)),
            }
            .map(|(k, _)| *k);
            if let Some(victim) = victim {
                state.entries.remove(&victim);
                debug!(strategy = ?self.config.strategy, "evicted cached response");
            }
        }

        state.clock += 1;
        let clock = state.clock;
        state.entries.insert(
            key,
            CachedResponse {
                response,
                inserted_at: now,
                last_used: clock,
                hits: 0,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn clear(&self) {
        self.state.lock().await.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{FinishReason, Message, ProviderType, TokenUsage};

    fn response(content: &str) -> CompletionResponse {
        CompletionResponse {
            request_id: uuid::Uuid::new_v4(),
            content: content.into(),
            provider: ProviderType::OpenAI,
            model: "gpt-4o-mini".into(),
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            latency: std::time::Duration::from_millis(5),
            fallback_count: 0,
            cached: false,
            provider_metadata: HashMap::new(),
        }
    }

    fn cache(strategy: CacheStrategy) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            enabled: true,
            ttl_seconds: 60,
            max_size: 2,
            strategy,
        })
    }

    #[test]
    fn test_key_ignores_request_id() {
        let a = CompletionRequest::new(vec![Message::user("hi")]);
        let b = CompletionRequest::new(vec![Message::user("hi")]);
        let c = CompletionRequest::new(vec![Message::user("hello")]);
        let routing = RoutingConfig::default();
        assert_eq!(ResponseCache::key(&a, &routing), ResponseCache::key(&b, &routing));
        assert_ne!(ResponseCache::key(&a, &routing), ResponseCache::key(&c, &routing));
    }

    #[test]
    fn test_key_separates_routing_constraints() {
        let request = CompletionRequest::new(vec![Message::user("hi")]);
        let default = ResponseCache::key(&request, &RoutingConfig::default());
        let groq_only = ResponseCache::key(&request, &RoutingConfig::custom(ProviderType::Groq, Vec::new()));
        let openai_only = ResponseCache::key(&request, &RoutingConfig::custom(ProviderType::OpenAI, Vec::new()));
        let fast = ResponseCache::key(
            &request,
            &RoutingConfig {
                mode: crate::router::RoutingMode::Fast,
                ..RoutingConfig::default()
            },
        );

        assert_ne!(default, groq_only);
        assert_ne!(groq_only, openai_only);
        assert_ne!(default, fast);
        assert_eq!(groq_only, ResponseCache::key(&request, &RoutingConfig::custom(ProviderType::Groq, Vec::new())));
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = cache(CacheStrategy::Lru);
        let now = Utc::now();
        cache.insert_at(1, response("a"), now).await;
        assert!(cache.get_at(1, now + Duration::seconds(59)).await.is_some());
        assert!(cache.get_at(1, now + Duration::seconds(60)).await.is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let cache = cache(CacheStrategy::Lru);
        let now = Utc::now();
        cache.insert_at(1, response("a"), now).await;
        cache.insert_at(2, response("b"), now).await;
        cache.get_at(1, now).await;
        cache.insert_at(3, response("c"), now).await;

        assert!(cache.get_at(1, now).await.is_some());
        assert!(cache.get_at(2, now).await.is_none());
        assert!(cache.get_at(3, now).await.is_some());
    }

    #[tokio::test]
    async fn test_lfu_evicts_least_frequently_used() {
        let cache = cache(CacheStrategy::Lfu);
        let now = Utc::now();
        cache.insert_at(1, response("a"), now).await;
        cache.insert_at(2, response("b"), now).await;
        cache.get_at(2, now).await;
        cache.get_at(2, now).await;
        cache.get_at(1, now).await;
        cache.insert_at(3, response("c"), now).await;

        assert!(cache.get_at(1, now).await.is_none());
        assert!(cache.get_at(2, now).await.is_some());
    }
}
