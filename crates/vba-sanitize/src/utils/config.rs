//! Application configuration management utilities.

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use vba_sanitize_core::TextEncoding;

/// Application-wide defaults stored in config.toml next to the executable.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// Archive path of the macro project when neither the CLI nor a job file names one.
    pub default_entry: Option<String>,
    pub default_encoding: Option<TextEncoding>,
    pub compression_level: Option<i64>,
}

/// Returns the directory where the current executable resides.
pub fn install_dir() -> Option<Utf8PathBuf> {
    let exe = env::current_exe().ok()?;
    let parent = exe.parent()?;
    Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok()
}

/// Returns a config file path located next to the executable.
pub fn config_path(file_name: &str) -> Option<Utf8PathBuf> {
    install_dir().map(|dir| dir.join(file_name))
}

/// Returns the default configuration file path (config.toml).
pub fn default_config_path() -> Option<Utf8PathBuf> {
    config_path("config.toml")
}

/// Loads the application configuration from config.toml.
/// Returns default configuration if file doesn't exist or cannot be parsed.
pub fn load_config() -> AppConfig {
    if let Some(path) = default_config_path() {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(&path) {
                match toml::from_str(&content) {
                    Ok(cfg) => return cfg,
                    Err(e) => tracing::warn!("Ignoring unreadable {}: {}", path, e),
                }
            }
        }
    }
    AppConfig::default()
}

/// Saves the application configuration to config.toml.
pub fn save_config(cfg: &AppConfig) -> io::Result<()> {
    if let Some(path) = default_config_path() {
        let content = toml::to_string_pretty(cfg).map_err(io::Error::other)?;
        fs::write(&path, content)
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine config path",
        ))
    }
}
