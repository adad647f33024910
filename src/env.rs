//! Path constants and helpers for configuration and on-disk state.

use std::path::{Path, PathBuf};

/// Hidden application directory, in the working directory or the user's home.
pub const APP_DIR_NAME: &str = ".ai-router";

/// Configuration file name inside [`APP_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration file name looked up directly in the working directory.
pub const LOCAL_CONFIG_FILE_NAME: &str = "ai-router.toml";

/// Default file for the JSON memory store.
pub const MEMORY_FILE_NAME: &str = "memory.json";

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "AI_ROUTER_CONFIG";

#[cfg(unix)]
pub const SYSTEM_CONFIG_PATH: &str = "/etc/ai-router/config.toml";

pub fn app_dir_path(root: &Path) -> PathBuf {
    root.join(APP_DIR_NAME)
}

/// `./ai-router.toml`
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(LOCAL_CONFIG_FILE_NAME)
}

/// `./.ai-router/config.toml`
pub fn local_app_config_file_path(current_dir: &Path) -> PathBuf {
    app_dir_path(current_dir).join(CONFIG_FILE_NAME)
}

pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    app_dir_path(home_dir)
}

/// `~/.ai-router/config.toml`
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

pub fn memory_file_path(root: &Path) -> PathBuf {
    app_dir_path(root).join(MEMORY_FILE_NAME)
}
