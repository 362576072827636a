use crate::features::SpotId;
use crate::pricing::PricingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8000;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub model: Option<ModelSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub spots: Vec<SpotInfo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelSection {
    /// Where the fitted regression model is read at startup and written after retraining.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8000)
    pub port: Option<u16>,
}

/// Static catalog entry for one parking spot.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SpotInfo {
    pub id: SpotId,
    pub code: String,
    pub capacity: u32,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(guard) = &self.pricing.guard {
            guard
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("[pricing.guard] {e}")))?;
        }
        Ok(())
    }

    pub fn model_path(&self) -> Option<&Path> {
        let path = self.model.as_ref()?.path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    /// Returns the server port (default: 8000)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    /// Returns the configured log level, falling back to `info` on unknown names.
    pub fn log_level(&self) -> tracing::Level {
        self.logging.level.parse().unwrap_or(tracing::Level::INFO)
    }
}
