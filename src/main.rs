use ai_router::cli::{Args, CheckConfig, CompleteConfig, ConfigDiscovery, ExecutionMode, RouteConfig};
use ai_router::{
    AIConfig, AIError, AIService, CompletionRequest, CompletionResponse, Message, ProviderType,
    RoutingMode, SafetyManager, ScriptedProvider, StreamChunk, StreamControl,
};
use anyhow::{Context, Result, anyhow};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::ShowConfig => {
            init_logging("info", args.verbose);
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
        ExecutionMode::InitConfig { path, force } => {
            init_logging("info", args.verbose);
            let path = ConfigDiscovery::create_config(path.as_deref(), force)?;
            println!("Configuration file: {}", path.display());
            Ok(())
        }
        ExecutionMode::Check(check) => run_check(load_config(&args)?, check),
        ExecutionMode::Providers => run_providers(load_config(&args)?, args.offline).await,
        ExecutionMode::Route(route) => run_route(load_config(&args)?, route, args.offline).await,
        ExecutionMode::Complete(complete) => {
            run_complete(load_config(&args)?, complete, args.offline, args.verbose).await
        }
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: &str, verbose: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("ai_router={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(args: &Args) -> Result<AIConfig> {
    let (config, source) = ConfigDiscovery::load(args.config.as_deref())?;
    init_logging(&config.observability.log_level, args.verbose);
    match source {
        Some(path) => info!("Using configuration from {:?}", path),
        None => info!("Using built-in configuration defaults"),
    }
    Ok(config)
}

fn coded(error: AIError) -> anyhow::Error {
    anyhow!("[{}] {}", error.code().as_str(), error)
}

async fn build_service(config: AIConfig, offline: bool) -> Result<AIService> {
    if !offline {
        return AIService::from_config(config)
            .await
            .map_err(coded)
            .context("failed to start AI service");
    }

    let mut provider_types: Vec<ProviderType> = config
        .providers
        .iter()
        .filter(|p| p.enabled)
        .map(|p| p.provider_type)
        .collect();
    if provider_types.is_empty() {
        provider_types = ProviderType::ALL.to_vec();
    }
    info!(providers = provider_types.len(), "offline mode: scripted adapters echo the prompt");

    let mut builder = AIService::builder(config);
    for provider_type in provider_types {
        builder = builder.with_provider(Arc::new(ScriptedProvider::new(provider_type)));
    }
    builder
        .build()
        .await
        .map_err(coded)
        .context("failed to start AI service")
}

async fn run_complete(mut config: AIConfig, complete: CompleteConfig, offline: bool, verbose: bool) -> Result<()> {
    if let Some(mode) = complete.mode {
        config.routing.mode = mode;
    }
    if let Some(provider) = complete.provider {
        config.routing.mode = RoutingMode::Custom;
        config.routing.primary_provider = Some(provider);
        config.routing.fallback_chain.clear();
    }
    let service = build_service(config, offline).await?;
    if service.registry().is_empty() {
        eprintln!("No provider could be started. Set the API key variables or run with --offline.");
    }

    let mut messages = Vec::new();
    if let Some(system) = complete.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(complete.prompt));
    let mut request = CompletionRequest::new(messages);
    request.model = complete.model;
    request.task_type = complete.task_type;
    request.max_tokens = complete.max_tokens;
    if let Some((agent, session)) = complete.session {
        request = request.with_session(agent, session);
    }

    let response = if complete.stream {
        let mut print_chunk = |chunk: StreamChunk| {
            print!("{}", chunk.delta);
            match io::stdout().flush() {
                Ok(()) => StreamControl::Continue,
                Err(_) => StreamControl::Cancel,
            }
        };
        let response = service.stream(request, &mut print_chunk).await.map_err(coded)?;
        println!();
        response
    } else {
        let response = service.complete(request).await.map_err(coded)?;
        println!("{}", response.content);
        response
    };

    if verbose {
        print_summary(&response);
    }
    Ok(())
}

fn print_summary(response: &CompletionResponse) {
    eprintln!(
        "[{} / {} | {} tokens | ${:.5} | {}ms | fallbacks: {}{}]",
        response.provider,
        response.model,
        response.usage.total_tokens,
        response.usage.estimated_cost,
        response.latency.as_millis(),
        response.fallback_count,
        if response.cached { " | cached" } else { "" }
    );
}

async fn run_route(mut config: AIConfig, route: RouteConfig, offline: bool) -> Result<()> {
    if let Some(mode) = route.mode {
        config.routing.mode = mode;
    }
    let service = build_service(config, offline).await?;

    let mut request = CompletionRequest::new(vec![Message::user(route.prompt)]);
    request.task_type = route.task_type;
    request.stream = route.stream;
    let decision = service.route(&request).await.map_err(coded)?;

    println!("🔀 Routing decision ({})", decision.mode);
    println!("  Provider: {}", decision.provider);
    println!("  Model:    {}", decision.model);
    println!("  Reason:   {}", decision.reason);
    println!("  Score:    {:.3}", decision.score);
    println!("  Latency:  ~{:.0}ms", decision.estimated_latency_ms);
    println!("  Cost:     ~${:.5}", decision.estimated_cost);
    if !decision.alternatives.is_empty() {
        println!("  Alternatives:");
        for (i, alternative) in decision.alternatives.iter().enumerate() {
            println!(
                "    {}. {} / {} (score {:.3})",
                i + 1,
                alternative.provider,
                alternative.model,
                alternative.score
            );
        }
    }
    if !decision.skipped.is_empty() {
        let skipped: Vec<&str> = decision.skipped.iter().map(|p| p.as_str()).collect();
        println!("  Skipped:  {}", skipped.join(", "));
    }
    Ok(())
}

fn run_check(config: AIConfig, check: CheckConfig) -> Result<()> {
    let safety = SafetyManager::new(config.safety).map_err(coded)?;

    let results = if check.output {
        let (redacted, results) = safety.validate_output(&check.text);
        println!("{}", redacted);
        results
    } else {
        safety.validate_request(&CompletionRequest::new(vec![Message::user(check.text)]))
    };

    for result in &results {
        let mark = if result.passed { "✓" } else { "✗" };
        println!(
            "  {} {:<16} {:?}/{:?}: {}",
            mark,
            result.category.as_str(),
            result.severity,
            result.action,
            result.reason
        );
    }

    match SafetyManager::get_most_severe_failure(&results) {
        Some(failure) => Err(anyhow!("blocked by {} check: {}", failure.category, failure.reason)),
        None => Ok(()),
    }
}

async fn run_providers(config: AIConfig, offline: bool) -> Result<()> {
    let service = build_service(config, offline).await?;
    let snapshots = service.registry().snapshot().await;
    if snapshots.is_empty() {
        println!("No providers registered.");
        return Ok(());
    }

    println!("📡 Providers:");
    for snapshot in snapshots {
        let status = &snapshot.status;
        println!(
            "  {} (priority {}) - circuit {}, {}",
            snapshot.provider_type,
            snapshot.priority,
            status.circuit_state.as_str(),
            if status.available { "available" } else { "unavailable" }
        );
        println!(
            "    rate limit: {} requests, {} tokens remaining",
            status.rate_limit.requests_remaining, status.rate_limit.tokens_remaining
        );
        for model in &snapshot.models {
            let marker = if model.id == snapshot.default_model { "*" } else { " " };
            println!(
                "    {} {:<40} ctx {:>9}  ~{}ms  ${}/{} per 1k",
                marker, model.id, model.context_window, model.latency_ms, model.input_cost_per_1k, model.output_cost_per_1k
            );
        }
    }
    Ok(())
}
