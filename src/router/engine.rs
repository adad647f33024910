use crate::error::AIError;
use crate::llm::types::{CompletionRequest, ModelFeature, ModelInfo, ProviderType};
use crate::registry::{ProviderRegistry, ProviderSnapshot};
use crate::router::types::{RouteCandidate, RoutingConfig, RoutingDecision, RoutingMode};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Picks a provider and model for a request. Never calls a provider: the live
/// inputs are a snapshot of the registry taken at routing time.
pub struct AIRouter {
    registry: Arc<ProviderRegistry>,
}

/// A candidate with the raw figures the orderings need.
#[derive(Debug, Clone)]
struct Scored {
    provider: ProviderType,
    priority: u32,
    model: String,
    latency_ms: f64,
    cost: f64,
    error_rate: f64,
    quality: f64,
    score: f64,
}

impl Scored {
    fn candidate(&self) -> RouteCandidate {
        RouteCandidate {
            provider: self.provider,
            model: self.model.clone(),
            score: self.score,
            estimated_latency_ms: self.latency_ms,
            estimated_cost: self.cost,
        }
    }
}

impl AIRouter {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    pub async fn route(
        &self,
        request: &CompletionRequest,
        config: &RoutingConfig,
    ) -> Result<RoutingDecision, AIError> {
        self.route_at(request, config, Utc::now()).await
    }

    pub async fn route_at(
        &self,
        request: &CompletionRequest,
        config: &RoutingConfig,
        now: DateTime<Utc>,
    ) -> Result<RoutingDecision, AIError> {
        let snapshots = self.registry.snapshot_at(now).await;
        let decision = rank(&snapshots, request, config, now)?;
        info!(
            provider = %decision.provider,
            model = %decision.model,
            mode = %decision.mode,
            score = decision.score,
            alternatives = decision.alternatives.len(),
            "{}",
            decision.reason
        );
        Ok(decision)
    }
}

/// Expected output tokens for estimates.
fn output_tokens(request: &CompletionRequest, config: &RoutingConfig) -> u64 {
    request.max_tokens.unwrap_or(config.default_output_tokens) as u64
}

fn required_features(request: &CompletionRequest, config: &RoutingConfig) -> Vec<ModelFeature> {
    let mut features = config.require_features.clone();
    if request.stream && !features.contains(&ModelFeature::Streaming) {
        features.push(ModelFeature::Streaming);
    }
    if !request.tools.is_empty() && !features.contains(&ModelFeature::ToolUse) {
        features.push(ModelFeature::ToolUse);
    }
    features
}

/// Static and request-level filters shared by every mode.
fn admits(
    model: &ModelInfo,
    request: &CompletionRequest,
    config: &RoutingConfig,
    features: &[ModelFeature],
    input_tokens: u64,
) -> bool {
    if config.exclude_models.iter().any(|m| m == &model.id) {
        return false;
    }
    if !config.preferred_models.is_empty() && !config.preferred_models.iter().any(|m| m == &model.id) {
        return false;
    }
    if let Some(ref wanted) = request.model
        && wanted != &model.id
    {
        return false;
    }
    if !features.iter().all(|f| model.supports(*f)) {
        return false;
    }
    input_tokens + output_tokens(request, config) <= model.context_window
}

fn score(
    snapshot: &ProviderSnapshot,
    model: &ModelInfo,
    request: &CompletionRequest,
    config: &RoutingConfig,
    input_tokens: u64,
) -> Scored {
    let latency_ms = snapshot
        .status
        .latency_ms
        .unwrap_or(model.latency_ms as f64);
    Scored {
        provider: snapshot.provider_type,
        priority: snapshot.priority,
        model: model.id.clone(),
        latency_ms,
        cost: model.cost_for(input_tokens, output_tokens(request, config)),
        error_rate: snapshot.status.error_rate,
        quality: (model.scores.reasoning + model.scores.coding) / 2.0,
        score: 0.0,
    }
}

fn within_limits(candidate: &Scored, config: &RoutingConfig) -> bool {
    if let Some(max) = config.max_latency_ms
        && candidate.latency_ms > max as f64
    {
        return false;
    }
    if let Some(max) = config.max_cost_per_request
        && candidate.cost > max
    {
        return false;
    }
    true
}

/// Min-max normalisation onto [0, 1]; a flat range maps to 0.
fn normalise(value: f64, min: f64, max: f64) -> f64 {
    if max - min <= f64::EPSILON {
        0.0
    } else {
        (value - min) / (max - min)
    }
}

fn range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn assign_scores(candidates: &mut [Scored], config: &RoutingConfig) {
    let (lat_min, lat_max) = range(candidates.iter().map(|c| c.latency_ms));
    let (cost_min, cost_max) = range(candidates.iter().map(|c| c.cost));
    let w = &config.weights;
    let total_weight = (w.latency + w.cost + w.error_rate).max(f64::EPSILON);

    for c in candidates.iter_mut() {
        let lat = normalise(c.latency_ms, lat_min, lat_max);
        let cost = normalise(c.cost, cost_min, cost_max);
        c.score = match config.mode {
            RoutingMode::Fast => 1.0 - lat,
            RoutingMode::CostOptimized => 1.0 - cost,
            RoutingMode::Quality => (c.quality / 10.0).clamp(0.0, 1.0),
            RoutingMode::Balanced | RoutingMode::Custom => {
                1.0 - (w.latency * lat + w.cost * cost + w.error_rate * c.error_rate.clamp(0.0, 1.0))
                    / total_weight
            }
        };
    }
}

/// Deterministic tie-break: declared priority, then provider name, then model id.
fn tie_break(a: &Scored, b: &Scored) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.provider.as_str().cmp(b.provider.as_str()))
        .then_with(|| a.model.cmp(&b.model))
}

fn order(candidates: &mut [Scored], mode: RoutingMode) {
    candidates.sort_by(|a, b| {
        let primary = match mode {
            RoutingMode::Fast => a.latency_ms.total_cmp(&b.latency_ms),
            RoutingMode::CostOptimized => a.cost.total_cmp(&b.cost),
            RoutingMode::Quality => b.quality.total_cmp(&a.quality),
            RoutingMode::Balanced | RoutingMode::Custom => b.score.total_cmp(&a.score),
        };
        primary.then_with(|| tie_break(a, b))
    });
}

/// Produce a decision from a registry snapshot. Pure apart from the timestamp.
pub fn rank(
    snapshots: &[ProviderSnapshot],
    request: &CompletionRequest,
    config: &RoutingConfig,
    now: DateTime<Utc>,
) -> Result<RoutingDecision, AIError> {
    if snapshots.is_empty() {
        return Err(AIError::NoAvailableProviders("no providers registered".to_string()));
    }

    let input_tokens = request.estimated_input_tokens();
    let features = required_features(request, config);
    let chain = custom_order(config);
    let mut skipped = Vec::new();

    let (mut candidates, reason) = if config.mode == RoutingMode::Custom && !chain.is_empty() {
        let mut candidates = Vec::new();
        for provider in &chain {
            let usable = snapshots
                .iter()
                .find(|s| s.provider_type == *provider && s.status.available)
                .and_then(|s| {
                    s.models
                        .iter()
                        .find(|m| m.id == s.default_model)
                        .filter(|m| admits(m, request, config, &features, input_tokens))
                        .map(|m| score(s, m, request, config, input_tokens))
                })
                .filter(|c| within_limits(c, config));
            match usable {
                Some(candidate) => candidates.push(candidate),
                None => skipped.push(*provider),
            }
        }
        let count = candidates.len().max(1) as f64;
        for (position, candidate) in candidates.iter_mut().enumerate() {
            candidate.score = 1.0 - position as f64 / count;
        }
        let reason = match (candidates.first(), skipped.is_empty()) {
            (Some(first), true) => format!("custom: {} is first in the configured chain", first.provider),
            (Some(first), false) => format!(
                "custom: {} is the first usable entry (skipped: {})",
                first.provider,
                join(&skipped)
            ),
            (None, _) => String::new(),
        };
        (candidates, reason)
    } else {
        let features = features.as_slice();
        let mut candidates: Vec<Scored> = snapshots
            .iter()
            .filter(|s| s.status.available)
            .flat_map(|s| {
                s.models
                    .iter()
                    .filter(move |m| admits(m, request, config, features, input_tokens))
                    .map(move |m| (s, m))
            })
            .map(|(s, m)| score(s, m, request, config, input_tokens))
            .filter(|c| within_limits(c, config))
            .collect();
        assign_scores(&mut candidates, config);
        order(&mut candidates, config.mode);
        let reason = candidates
            .first()
            .map(|c| mode_reason(config.mode, c))
            .unwrap_or_default();
        (candidates, reason)
    };

    let mut reason = reason;
    if let Some(task_type) = request.task_type.as_deref()
        && let Some(target) = config.task_type_routing.get(task_type)
        && candidates.iter().any(|c| c.provider == *target)
    {
        // stable: relative order inside each group survives
        candidates.sort_by_key(|c| c.provider != *target);
        reason = format!("task type '{}' routed to {}; {}", task_type, target, reason);
    }

    if candidates.is_empty() {
        let unavailable: Vec<String> = snapshots
            .iter()
            .filter(|s| !s.status.available)
            .map(|s| format!("{} ({})", s.provider_type, s.status.circuit_state.as_str()))
            .collect();
        let detail = if unavailable.len() == snapshots.len() {
            format!("all providers unavailable: {}", unavailable.join(", "))
        } else {
            "no model satisfies the routing constraints".to_string()
        };
        debug!(mode = %config.mode, "{}", detail);
        return Err(AIError::NoAvailableProviders(detail));
    }

    let rate_limited = snapshots
        .iter()
        .filter(|s| s.status.enabled && s.status.rate_limited)
        .map(|s| s.provider_type)
        .collect();

    let chosen = candidates.remove(0);
    let alternatives = fallback_order(&chosen, &candidates)
        .into_iter()
        .take(config.max_alternatives)
        .map(Scored::candidate)
        .collect();

    Ok(RoutingDecision {
        provider: chosen.provider,
        model: chosen.model.clone(),
        reason,
        score: chosen.score,
        estimated_latency_ms: chosen.latency_ms,
        estimated_cost: chosen.cost,
        mode: config.mode,
        alternatives,
        skipped,
        rate_limited,
        decided_at: now,
    })
}

/// Best-ranked model of every other provider first, then the remaining models in
/// rank order. A provider that is down cannot fill the whole fallback list.
fn fallback_order<'a>(chosen: &Scored, ranked: &'a [Scored]) -> Vec<&'a Scored> {
    let mut seen = vec![chosen.provider];
    let (mut distinct, mut rest) = (Vec::new(), Vec::new());
    for candidate in ranked {
        if seen.contains(&candidate.provider) {
            rest.push(candidate);
        } else {
            seen.push(candidate.provider);
            distinct.push(candidate);
        }
    }
    distinct.append(&mut rest);
    distinct
}

fn custom_order(config: &RoutingConfig) -> Vec<ProviderType> {
    let mut order = Vec::new();
    for provider in config.primary_provider.iter().chain(config.fallback_chain.iter()) {
        if !order.contains(provider) {
            order.push(*provider);
        }
    }
    order
}

fn join(providers: &[ProviderType]) -> String {
    providers
        .iter()
        .map(ProviderType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

fn mode_reason(mode: RoutingMode, chosen: &Scored) -> String {
    match mode {
        RoutingMode::Fast => format!("fast: lowest estimated latency ({:.0}ms)", chosen.latency_ms),
        RoutingMode::CostOptimized => format!("cost_optimized: lowest estimated cost (${:.6})", chosen.cost),
        RoutingMode::Quality => format!("quality: highest capability score ({:.1})", chosen.quality),
        RoutingMode::Balanced | RoutingMode::Custom => {
            format!("balanced: best combined score ({:.3})", chosen.score)
        }
    }
}
