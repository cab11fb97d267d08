//! Application configuration: a TOML file plus environment overrides.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use gridsync_core::SyncConfig;

const MAX_CONFIG_FILE_BYTES: u64 = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `gridsync_core=debug`.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

pub fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridsync")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("gridsync.toml");
    Some(path)
}

/// Load the configuration from `explicit`, else from the user config dir.
///
/// Never fails: problems become warnings and the defaults are used.
pub fn load_config(explicit: Option<&Path>) -> (AppConfig, Vec<String>) {
    let mut warnings = Vec::new();
    let path = explicit.map(Path::to_path_buf).or_else(user_config_path);
    let mut config = match path.as_ref() {
        Some(path) => read_config(path, explicit.is_some(), &mut warnings),
        None => AppConfig::default(),
    };
    apply_env_overrides(&mut config, &mut warnings);
    (config, warnings)
}

fn read_config(path: &Path, required: bool, warnings: &mut Vec<String>) -> AppConfig {
    if !path.exists() {
        if required {
            warnings.push(format!("Config file not found: {}", path.display()));
        }
        return AppConfig::default();
    }
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
            warnings.push(format!(
                "Refusing to read {}: file too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            ));
            AppConfig::default()
        }
        Ok(_) => match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warnings.push(format!("Failed to parse {}: {}", path.display(), err));
                    AppConfig::default()
                }
            },
            Err(err) => {
                warnings.push(format!("Failed to read {}: {}", path.display(), err));
                AppConfig::default()
            }
        },
        Err(err) => {
            warnings.push(format!("Failed to read metadata for {}: {}", path.display(), err));
            AppConfig::default()
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig, warnings: &mut Vec<String>) {
    if let Some(value) = env_number("GRIDSYNC_GRACE_MS", warnings) {
        config.sync.grace_period_ms = value;
    }
    if let Some(value) = env_number("GRIDSYNC_MAX_ROUNDS", warnings) {
        config.sync.max_cascade_rounds = value as usize;
    }
}

fn env_number(name: &str, warnings: &mut Vec<String>) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<u64>() {
        Ok(value) => Some(value),
        Err(err) => {
            warnings.push(format!("invalid {}, ignoring: {}", name, err));
            None
        }
    }
}
