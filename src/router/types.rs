use crate::llm::types::{ModelFeature, ProviderType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    Fast,
    #[default]
    Balanced,
    Quality,
    CostOptimized,
    Custom,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Fast => "fast",
            RoutingMode::Balanced => "balanced",
            RoutingMode::Quality => "quality",
            RoutingMode::CostOptimized => "cost_optimized",
            RoutingMode::Custom => "custom",
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RoutingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "fast" => Ok(RoutingMode::Fast),
            "balanced" => Ok(RoutingMode::Balanced),
            "quality" => Ok(RoutingMode::Quality),
            "cost_optimized" | "cost" => Ok(RoutingMode::CostOptimized),
            "custom" => Ok(RoutingMode::Custom),
            other => Err(format!("unknown routing mode '{}'", other)),
        }
    }
}

/// Relative weights of the balanced score. They need not sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancedWeights {
    pub latency: f64,
    pub cost: f64,
    pub error_rate: f64,
}

impl Default for BalancedWeights {
    fn default() -> Self {
        Self {
            latency: 0.34,
            cost: 0.33,
            error_rate: 0.33,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub mode: RoutingMode,
    pub primary_provider: Option<ProviderType>,
    pub fallback_chain: Vec<ProviderType>,
    /// Task type to the provider whose candidates go first.
    pub task_type_routing: HashMap<String, ProviderType>,
    pub max_latency_ms: Option<u64>,
    pub max_cost_per_request: Option<f64>,
    pub preferred_models: Vec<String>,
    pub exclude_models: Vec<String>,
    pub require_features: Vec<ModelFeature>,
    pub weights: BalancedWeights,
    pub max_alternatives: usize,
    /// Output tokens assumed for cost and fit estimates when the request sets none.
    pub default_output_tokens: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Balanced,
            primary_provider: None,
            fallback_chain: Vec::new(),
            task_type_routing: HashMap::new(),
            max_latency_ms: None,
            max_cost_per_request: None,
            preferred_models: Vec::new(),
            exclude_models: Vec::new(),
            require_features: Vec::new(),
            weights: BalancedWeights::default(),
            max_alternatives: 5,
            default_output_tokens: 512,
        }
    }
}

impl RoutingConfig {
    pub fn with_mode(mut self, mode: RoutingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn custom(primary: ProviderType, fallback_chain: Vec<ProviderType>) -> Self {
        Self {
            mode: RoutingMode::Custom,
            primary_provider: Some(primary),
            fallback_chain,
            ..Default::default()
        }
    }
}

/// One ranked (provider, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCandidate {
    pub provider: ProviderType,
    pub model: String,
    /// Mode-specific score in [0, 1], higher is better.
    pub score: f64,
    pub estimated_latency_ms: f64,
    pub estimated_cost: f64,
}

/// Immutable outcome of one routing pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub provider: ProviderType,
    pub model: String,
    pub reason: String,
    pub score: f64,
    pub estimated_latency_ms: f64,
    pub estimated_cost: f64,
    pub mode: RoutingMode,
    pub alternatives: Vec<RouteCandidate>,
    /// Providers named by a custom chain that could not be used.
    pub skipped: Vec<ProviderType>,
    /// Providers left out because their rate limit window is exhausted.
    pub rate_limited: Vec<ProviderType>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// The chosen candidate followed by the alternatives, in fallback order.
    pub fn candidates(&self) -> Vec<RouteCandidate> {
        let mut all = Vec::with_capacity(self.alternatives.len() + 1);
        all.push(RouteCandidate {
            provider: self.provider,
            model: self.model.clone(),
            score: self.score,
            estimated_latency_ms: self.estimated_latency_ms,
            estimated_cost: self.estimated_cost,
        });
        all.extend(self.alternatives.iter().cloned());
        all
    }
}
