//! Configuration discovery and loading
//!
//! Lookup order, first existing file wins:
//! 1. `$AI_ROUTER_CONFIG`
//! 2. Current directory: `./ai-router.toml` or `./.ai-router/config.toml`
//! 3. User config: `~/.ai-router/config.toml`
//! 4. System config: `/etc/ai-router/config.toml`
//! 5. Built-in defaults

use crate::config::AIConfig;
use crate::env;
use anyhow::{Context, Result};
use std::env as std_env;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration discovery system
pub struct ConfigDiscovery;

impl ConfigDiscovery {
    /// Load `path` when given, otherwise the first file of the hierarchy, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<(AIConfig, Option<PathBuf>)> {
        if let Some(path) = path {
            info!("Loading configuration override from: {:?}", path);
            let config = AIConfig::from_toml_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?;
            return Ok((config, Some(path.to_path_buf())));
        }
        Self::discover_config()
    }

    /// Discover and load configuration using the hierarchy
    pub fn discover_config() -> Result<(AIConfig, Option<PathBuf>)> {
        if let Some(config_path) = Self::find_config_file() {
            info!("Loading configuration from: {:?}", config_path);
            let config = AIConfig::from_toml_file(&config_path)
                .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;
            return Ok((config, Some(config_path)));
        }

        info!("No configuration file found, using defaults");
        Ok((AIConfig::default(), None))
    }

    /// Find configuration file using discovery hierarchy
    pub fn find_config_file() -> Option<PathBuf> {
        Self::config_candidates().into_iter().find(|candidate| {
            debug!("Checking for config file: {:?}", candidate);
            candidate.is_file()
        })
    }

    /// Configuration file candidates in priority order
    pub fn config_candidates() -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(explicit) = std_env::var_os(env::CONFIG_PATH_ENV).filter(|v| !v.is_empty()) {
            candidates.push(PathBuf::from(explicit));
        }

        if let Ok(current_dir) = std_env::current_dir() {
            candidates.push(env::local_config_file_path(&current_dir));
            candidates.push(env::local_app_config_file_path(&current_dir));
        }

        if let Some(home_dir) = Self::home_dir() {
            candidates.push(env::user_config_file_path(&home_dir));
        }

        #[cfg(unix)]
        candidates.push(PathBuf::from(env::SYSTEM_CONFIG_PATH));

        #[cfg(windows)]
        if let Ok(program_data) = std_env::var("PROGRAMDATA") {
            candidates.push(PathBuf::from(program_data).join("ai-router").join(env::CONFIG_FILE_NAME));
        }

        candidates
    }

    fn home_dir() -> Option<PathBuf> {
        std_env::var("HOME")
            .ok()
            .or_else(|| std_env::var("USERPROFILE").ok())
            .map(PathBuf::from)
    }

    /// Write the example configuration to `path`, or to the user config file.
    /// An existing file is kept unless `force` is set.
    pub fn create_config(path: Option<&Path>, force: bool) -> Result<PathBuf> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let home_dir = Self::home_dir().context("could not determine home directory")?;
                env::user_config_file_path(&home_dir)
            }
        };

        if config_path.exists() && !force {
            warn!("Configuration file already exists: {:?}", config_path);
            return Ok(config_path);
        }

        AIConfig::example()
            .to_toml_file(&config_path)
            .with_context(|| format!("failed to write {}", config_path.display()))?;
        info!("Created configuration file: {:?}", config_path);
        Ok(config_path)
    }

    /// Show configuration discovery information for debugging
    pub fn show_discovery_info() {
        println!("Configuration Discovery Hierarchy:");
        println!();

        for (i, candidate) in Self::config_candidates().iter().enumerate() {
            let status = if candidate.is_file() {
                "✓ EXISTS"
            } else if candidate.exists() {
                "✗ NOT A FILE"
            } else {
                "✗ NOT FOUND"
            };
            println!("  {}. {:?} - {}", i + 1, candidate, status);
        }

        println!();
        match Self::find_config_file() {
            Some(found) => println!("Active configuration: {:?}", found),
            None => println!("Active configuration: Built-in defaults"),
        }
    }
}
