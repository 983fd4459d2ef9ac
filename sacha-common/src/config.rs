//! Configuration file discovery and loading
//!
//! Settings resolve in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Built-in default (fallback)
//!
//! Missing config files are not an error: services start with defaults and log that
//! no file was found. A config file that exists but fails to parse IS an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Application directory name under the platform config/data directories
pub const APP_DIR: &str = "sacha";

/// Resolve which TOML config file a service should read
///
/// Priority: command-line argument → environment variable → per-user config dir
/// (`~/.config/sacha/<file_name>` on Linux) → `/etc/sacha/<file_name>` on Linux.
/// Explicit paths (CLI/ENV) are returned even if the file does not exist so the
/// caller can report it; discovered paths are returned only when present.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config locations
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file into `T`
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load config from `path`, falling back to `T::default()` when no file is available
///
/// A missing explicit path degrades to defaults with a warning; a parse failure is returned.
pub fn load_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) if path.exists() => {
            let config = load_toml_config(path)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Some(path) => {
            warn!(
                "Config file not found: {} (using built-in defaults)",
                path.display()
            );
            Ok(T::default())
        }
        None => {
            info!("No config file found (using built-in defaults)");
            Ok(T::default())
        }
    }
}

/// OS-dependent default data folder for a service's local state (database files)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("./sacha_data"))
}
