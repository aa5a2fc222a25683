//! Centralized path management for the dataforge CLI
//!
//! Artifacts and the default configuration file live in platform
//! directories, resolved here so every command agrees on them.

use std::path::PathBuf;

/// The name of the application directory used across all platforms
const APP_DIR: &str = "dataforge";

/// Subdirectory of the data directory holding job artifacts
const ARTIFACTS_SUBDIR: &str = "artifacts";

/// Directory the engine writes job artifacts into under `data_dir`
pub fn artifacts_dir(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(ARTIFACTS_SUBDIR)
}

/// Returns the configuration directory (`~/.config/dataforge` on Linux)
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".dataforge"))
}

/// Returns the path to the configuration file
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}
