//! Built-in model metadata used when a provider's configuration does not list its
//! own models. Prices are USD per 1k tokens and only feed routing estimates.

use crate::llm::types::{ModelFeature, ModelInfo, ModelScores, ProviderType};

#[allow(clippy::too_many_arguments)]
fn model(
    provider: ProviderType,
    id: &str,
    context_window: u64,
    max_output_tokens: u64,
    costs: (f64, f64),
    features: &[ModelFeature],
    scores: (f64, f64, f64, u8),
    latency_ms: u64,
) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        provider,
        context_window,
        max_output_tokens,
        input_cost_per_1k: costs.0,
        output_cost_per_1k: costs.1,
        features: features.to_vec(),
        scores: ModelScores {
            speed: scores.0,
            reasoning: scores.1,
            coding: scores.2,
            cost_tier: scores.3,
        },
        latency_ms,
    }
}

/// Default catalog for a provider. The first entry is the provider's default model.
pub fn default_models(provider: ProviderType) -> Vec<ModelInfo> {
    use ModelFeature::*;
    let full = [Streaming, ToolUse, Vision, JsonMode, SystemPrompt];
    let text_tools = [Streaming, ToolUse, JsonMode, SystemPrompt];

    match provider {
        ProviderType::OpenAI => vec![
            model(provider, "gpt-4o", 128_000, 16_384, (0.0025, 0.01), &full, (7.0, 9.0, 9.0, 3), 900),
            model(provider, "gpt-4o-mini", 128_000, 16_384, (0.00015, 0.0006), &full, (9.0, 7.0, 7.0, 1), 450),
        ],
        ProviderType::Anthropic => vec![
            model(provider, "claude-sonnet-4-20250514", 200_000, 64_000, (0.003, 0.015), &full, (7.0, 9.5, 9.5, 3), 1_100),
            model(provider, "claude-3-5-haiku-latest", 200_000, 8_192, (0.0008, 0.004), &text_tools, (9.0, 7.0, 7.5, 2), 500),
        ],
        ProviderType::Google => vec![
            model(provider, "gemini-1.5-pro", 2_000_000, 8_192, (0.00125, 0.005), &full, (6.5, 8.5, 8.0, 3), 1_200),
            model(provider, "gemini-1.5-flash", 1_000_000, 8_192, (0.000075, 0.0003), &full, (9.5, 6.5, 6.5, 1), 400),
        ],
        ProviderType::Groq => vec![model(
            provider,
            "llama-3.3-70b-versatile",
            128_000,
            32_768,
            (0.00059, 0.00079),
            &text_tools,
            (10.0, 7.0, 7.0, 1),
            250,
        )],
        ProviderType::Together => vec![model(
            provider,
            "meta-llama/Llama-3.3-70B-Instruct-Turbo",
            131_072,
            8_192,
            (0.00088, 0.00088),
            &text_tools,
            (8.0, 7.0, 7.0, 2),
            600,
        )],
        ProviderType::Ollama => vec![model(
            provider,
            "llama3.1",
            128_000,
            8_192,
            (0.0, 0.0),
            &[Streaming, ToolUse, SystemPrompt],
            (6.0, 6.0, 6.0, 1),
            1_500,
        )],
    }
}
