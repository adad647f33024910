use crate::error::AIError;
use crate::llm::types::{CompletionResponse, ProviderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Aggregated usage counters. A disabled instance records nothing.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    enabled: bool,
    data: Arc<Mutex<MetricsData>>,
}

#[derive(Debug, Default)]
struct MetricsData {
    providers: HashMap<ProviderType, ProviderMetrics>,
    daily: BTreeMap<String, DailyUsage>,
    totals: TotalUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Times the orchestrator moved away from this provider.
    pub fallbacks: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
    pub average_latency_ms: f64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub date: String,
    pub requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TotalUsage {
    pub requests: u64,
    pub failures: u64,
    pub fallbacks: u64,
    pub cache_hits: u64,
    pub safety_blocks: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub first_request: Option<DateTime<Utc>>,
    pub last_request: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub providers: BTreeMap<String, ProviderMetrics>,
    pub daily: Vec<DailyUsage>,
    pub totals: TotalUsage,
}

impl MetricsData {
    fn touch(&mut self, now: DateTime<Utc>) {
        self.totals.first_request.get_or_insert(now);
        self.totals.last_request = Some(now);
    }
}

impl ServiceMetrics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            data: Arc::new(Mutex::new(MetricsData::default())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A request the caller received a provider answer for.
    pub async fn record_success(&self, response: &CompletionResponse) {
        if !self.enabled {
            return;
        }
        let now = Utc::now();
        let mut data = self.data.lock().await;
        data.touch(now);

        let provider = data.providers.entry(response.provider).or_default();
        provider.requests += 1;
        provider.successes += 1;
        provider.input_tokens += response.usage.input_tokens;
        provider.output_tokens += response.usage.output_tokens;
        provider.total_cost += response.usage.estimated_cost;
        let latency_ms = response.latency.as_secs_f64() * 1000.0;
        provider.average_latency_ms += (latency_ms - provider.average_latency_ms) / provider.successes as f64;

        let date_key = now.format("%Y-%m-%d").to_string();
        let daily = data.daily.entry(date_key.clone()).or_insert_with(|| DailyUsage {
            date: date_key,
            ..Default::default()
        });
        daily.requests += 1;
        daily.total_tokens += response.usage.total_tokens;
        daily.total_cost += response.usage.estimated_cost;

        data.totals.requests += 1;
        data.totals.total_tokens += response.usage.total_tokens;
        data.totals.total_cost += response.usage.estimated_cost;
    }

    /// One failed provider attempt.
    pub async fn record_attempt_failure(&self, provider: ProviderType, error: &AIError) {
        if !self.enabled {
            return;
        }
        let mut data = self.data.lock().await;
        let metrics = data.providers.entry(provider).or_default();
        metrics.requests += 1;
        metrics.failures += 1;
        metrics.last_error = Some(error.to_string());
    }

    /// A request that ended in an error for the caller.
    pub async fn record_request_failure(&self) {
        if !self.enabled {
            return;
        }
        let mut data = self.data.lock().await;
        data.touch(Utc::now());
        data.totals.requests += 1;
        data.totals.failures += 1;
    }

    pub async fn record_fallback(&self, from: ProviderType) {
        if !self.enabled {
            return;
        }
        let mut data = self.data.lock().await;
        data.providers.entry(from).or_default().fallbacks += 1;
        data.totals.fallbacks += 1;
    }

    pub async fn record_cache_hit(&self) {
        if !self.enabled {
            return;
        }
        let mut data = self.data.lock().await;
        data.touch(Utc::now());
        data.totals.requests += 1;
        data.totals.cache_hits += 1;
    }

    pub async fn record_safety_block(&self) {
        if !self.enabled {
            return;
        }
        self.data.lock().await.totals.safety_blocks += 1;
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let data = self.data.lock().await;
        MetricsSnapshot {
            providers: data
                .providers
                .iter()
                .map(|(provider, metrics)| (provider.as_str().to_string(), metrics.clone()))
                .collect(),
            daily: data.daily.values().cloned().collect(),
            totals: data.totals.clone(),
        }
    }

    pub async fn reset(&self) {
        *self.data.lock().await = MetricsData::default();
    }
}
