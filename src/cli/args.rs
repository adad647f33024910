//! Command line argument parsing
//!
//! Subcommands:
//! - `complete`: Send a prompt through the configured providers
//! - `route`: Print the routing decision without calling a provider
//! - `check`: Run input safety checks, or output redaction, on text
//! - `providers`: List registered providers, their health and models
//! - `show-config`: Show configuration discovery information
//! - `init-config`: Write an example configuration file

use crate::llm::ProviderType;
use crate::router::RoutingMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug)]
pub enum ExecutionMode {
    Complete(CompleteConfig),
    Route(RouteConfig),
    Check(CheckConfig),
    Providers,
    ShowConfig,
    InitConfig { path: Option<PathBuf>, force: bool },
}

#[derive(Debug)]
pub struct CompleteConfig {
    pub prompt: String,
    pub system: Option<String>,
    pub stream: bool,
    pub mode: Option<RoutingMode>,
    /// Pins the request to one provider, bypassing ranking.
    pub provider: Option<ProviderType>,
    pub model: Option<String>,
    pub task_type: Option<String>,
    pub session: Option<(String, String)>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug)]
pub struct RouteConfig {
    pub prompt: String,
    pub mode: Option<RoutingMode>,
    pub task_type: Option<String>,
    pub stream: bool,
}

#[derive(Debug)]
pub struct CheckConfig {
    pub text: String,
    /// Treat the text as model output: redact instead of validating input.
    pub output: bool,
}

#[derive(Debug, Parser)]
#[command(name = "ai-router")]
#[command(author = "AI Router Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route LLM requests across providers with circuit breaking, safety checks and memory")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,
    /// Answer from scripted adapters instead of calling provider APIs
    #[arg(long = "offline", global = true)]
    pub offline: bool,
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Send a prompt through the configured providers
    Complete {
        /// Prompt text
        #[arg(required = true)]
        prompt: Vec<String>,
        /// System prompt
        #[arg(short = 's', long = "system")]
        system: Option<String>,
        /// Print chunks as they arrive
        #[arg(long = "stream")]
        stream: bool,
        /// Routing mode: fast, balanced, quality, cost_optimized, custom
        #[arg(short = 'm', long = "mode")]
        mode: Option<RoutingMode>,
        /// Use only this provider
        #[arg(short = 'p', long = "provider")]
        provider: Option<ProviderType>,
        /// Model to request
        #[arg(long = "model")]
        model: Option<String>,
        /// Task type used for task-based routing
        #[arg(long = "task")]
        task_type: Option<String>,
        /// Agent id for conversational memory (requires --session)
        #[arg(long = "agent", requires = "session")]
        agent: Option<String>,
        /// Session id for conversational memory (requires --agent)
        #[arg(long = "session", requires = "agent")]
        session: Option<String>,
        /// Output token limit
        #[arg(long = "max-tokens")]
        max_tokens: Option<u32>,
    },
    /// Print the routing decision without calling any provider
    Route {
        #[arg(required = true)]
        prompt: Vec<String>,
        #[arg(short = 'm', long = "mode")]
        mode: Option<RoutingMode>,
        #[arg(long = "task")]
        task_type: Option<String>,
        /// Route as a streaming request
        #[arg(long = "stream")]
        stream: bool,
    },
    /// Run safety checks on text
    Check {
        #[arg(required = true)]
        text: Vec<String>,
        /// Redact the text as model output instead of validating it as input
        #[arg(long = "output")]
        output: bool,
    },
    /// List registered providers, their health and models
    Providers,
    /// Show configuration discovery information
    ShowConfig,
    /// Write an example configuration file
    InitConfig {
        /// Target path (default: ~/.ai-router/config.toml)
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(short = 'f', long = "force")]
        force: bool,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<ExecutionMode, String> {
        match &self.command {
            Some(Commands::Complete {
                prompt,
                system,
                stream,
                mode,
                provider,
                model,
                task_type,
                agent,
                session,
                max_tokens,
            }) => Ok(ExecutionMode::Complete(CompleteConfig {
                prompt: Self::join(prompt)?,
                system: system.clone(),
                stream: *stream,
                mode: *mode,
                provider: *provider,
                model: model.clone(),
                task_type: task_type.clone(),
                session: agent.clone().zip(session.clone()),
                max_tokens: *max_tokens,
            })),
            Some(Commands::Route {
                prompt,
                mode,
                task_type,
                stream,
            }) => Ok(ExecutionMode::Route(RouteConfig {
                prompt: Self::join(prompt)?,
                mode: *mode,
                task_type: task_type.clone(),
                stream: *stream,
            })),
            Some(Commands::Check { text, output }) => Ok(ExecutionMode::Check(CheckConfig {
                text: Self::join(text)?,
                output: *output,
            })),
            Some(Commands::Providers) => Ok(ExecutionMode::Providers),
            Some(Commands::ShowConfig) => Ok(ExecutionMode::ShowConfig),
            Some(Commands::InitConfig { path, force }) => Ok(ExecutionMode::InitConfig {
                path: path.clone(),
                force: *force,
            }),
            None => Err("No command specified. Use 'ai-router --help' to see available commands.".to_string()),
        }
    }

    /// Words given on the command line form one text.
    fn join(words: &[String]) -> Result<String, String> {
        let text = words.join(" ");
        if text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv.iter().copied()).unwrap()
    }

    #[test]
    fn test_complete_command() {
        let args = parse(&[
            "ai-router",
            "complete",
            "--mode",
            "fast",
            "--agent",
            "helper",
            "--session",
            "s1",
            "--stream",
            "hello",
            "world",
        ]);
        let ExecutionMode::Complete(config) = args.mode().unwrap() else {
            panic!("Expected Complete mode");
        };
        assert_eq!(config.prompt, "hello world");
        assert_eq!(config.mode, Some(RoutingMode::Fast));
        assert!(config.stream);
        assert_eq!(config.session, Some(("helper".to_string(), "s1".to_string())));
    }

    #[test]
    fn test_session_requires_agent() {
        assert!(Args::try_parse_from(["ai-router", "complete", "--session", "s1", "hi"]).is_err());
    }

    #[test]
    fn test_provider_and_global_flags() {
        let args = parse(&["ai-router", "route", "hi", "--offline", "-c", "custom.toml", "--mode", "cost"]);
        assert!(args.offline);
        assert_eq!(args.config, Some(PathBuf::from("custom.toml")));
        let ExecutionMode::Route(config) = args.mode().unwrap() else {
            panic!("Expected Route mode");
        };
        assert_eq!(config.mode, Some(RoutingMode::CostOptimized));

        let args = parse(&["ai-router", "complete", "-p", "groq", "hi"]);
        let ExecutionMode::Complete(config) = args.mode().unwrap() else {
            panic!("Expected Complete mode");
        };
        assert_eq!(config.provider, Some(ProviderType::Groq));
        assert!(Args::try_parse_from(["ai-router", "complete", "-p", "acme", "hi"]).is_err());
    }

    #[test]
    fn test_check_and_config_commands() {
        let args = parse(&["ai-router", "check", "--output", "mail me at a@b.io"]);
        assert!(matches!(args.mode().unwrap(), ExecutionMode::Check(CheckConfig { output: true, .. })));

        let args = parse(&["ai-router", "init-config", "--force"]);
        assert!(matches!(
            args.mode().unwrap(),
            ExecutionMode::InitConfig { path: None, force: true }
        ));

        let args = parse(&["ai-router", "show-config"]);
        assert!(matches!(args.mode().unwrap(), ExecutionMode::ShowConfig));
    }

    #[test]
    fn test_blank_text_is_rejected() {
        let args = parse(&["ai-router", "check", " "]);
        assert!(args.mode().is_err());
    }
}
