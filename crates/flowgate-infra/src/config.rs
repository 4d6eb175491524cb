//! Configuration loader for Flowgate.
//!
//! Reads `config.toml` from the Flowgate home (`~/.flowgate/` by default)
//! and deserializes it into [`FlowgateConfig`]. Falls back to defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use flowgate_types::config::FlowgateConfig;

/// Environment variable overriding the home directory.
pub const HOME_ENV: &str = "FLOWGATE_HOME";

/// Resolve the Flowgate home directory.
///
/// Priority: explicit override, `FLOWGATE_HOME`, then `~/.flowgate`.
pub fn resolve_home_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .map(|home| home.join(".flowgate"))
        .unwrap_or_else(|| PathBuf::from(".flowgate"))
}

/// Load configuration from `{home}/config.toml`.
///
/// - Missing file: [`FlowgateConfig::default()`].
/// - Unreadable or unparseable file: a warning and the default.
pub async fn load_config(home: &Path) -> FlowgateConfig {
    let config_path = home.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return FlowgateConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return FlowgateConfig::default();
        }
    };

    match toml::from_str::<FlowgateConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            FlowgateConfig::default()
        }
    }
}
