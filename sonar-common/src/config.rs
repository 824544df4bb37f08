//! Configuration file resolution and loading

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the session file
pub const CONFIG_ENV_VAR: &str = "SONAR_CONFIG";

/// Application directory under the platform config dir
pub const APP_DIR: &str = "sonar";

/// Default session file name
pub const DEFAULT_FILE_NAME: &str = "session.toml";

/// Config file resolution following priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. Platform user config directory (`<config_dir>/sonar/<file_name>`)
///
/// Unlike the first two sources, the config-dir fallback must exist on disk.
pub fn resolve_config_file(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        debug!("Config file from command line: {}", path.display());
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            debug!("Config file from {}: {}", env_var_name, path);
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: user config dir
    let candidate = default_config_path(file_name)
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if candidate.exists() {
        debug!("Config file from user config dir: {}", candidate.display());
        Ok(candidate)
    } else {
        Err(Error::Config(format!(
            "No config file given and {} does not exist",
            candidate.display()
        )))
    }
}

/// `<platform config dir>/sonar/<file_name>`, if the platform has one
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name))
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read {}: {}", path.display(), e))
    })?;
    Ok(toml::from_str(&content)?)
}

/// Logging section of a session file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. "info",
    /// "sonar_player=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_config_default_level() {
        assert_eq!(LoggingConfig::default().level, "info");
    }

    #[test]
    fn test_logging_config_from_toml() {
        let config: LoggingConfig = toml::from_str(r#"level = "debug""#).unwrap();
        assert_eq!(config.level, "debug");

        let config: LoggingConfig = toml::from_str("").unwrap();
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_default_config_path_shape() {
        if let Some(path) = default_config_path("session.toml") {
            assert!(path.ends_with("sonar/session.toml"));
        }
    }
}
