//! CLI-specific functionality for the ai-router binary
//!
//! Argument parsing and configuration discovery.

pub mod args;
pub mod config;

pub use args::{Args, CheckConfig, CompleteConfig, ExecutionMode, RouteConfig};
pub use config::ConfigDiscovery;
