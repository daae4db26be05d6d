//! Layered configuration with environment variable support and validation.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
    pub cors_origins: Vec<String>,
    pub max_request_size_mb: usize,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            max_request_size_mb: 2,
            static_dir: PathBuf::from("static"),
        }
    }
}

/// Message store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: crate::store::DEFAULT_CAPACITY,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "text" or "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main settings structure with all configuration sections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            // Start with the embedded defaults
            .add_source(File::from_str(
                include_str!("../config.toml"),
                FileFormat::Toml,
            ))
            // Add local config file if it exists
            .add_source(File::with_name("config").required(false))
            // Add environment variables with RELAY_ prefix
            .add_source(
                Environment::with_prefix("RELAY")
                    .separator("__")
                    .list_separator(",")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        Self::apply_env_overrides(&mut settings)?;
        settings.validate()?;

        Ok(settings)
    }

    /// Apply targeted environment variable overrides
    fn apply_env_overrides(settings: &mut Settings) -> Result<()> {
        if let Ok(host) = std::env::var("RELAY_SERVER_HOST") {
            settings.server.host = host;
        }
        if let Ok(port) = std::env::var("RELAY_SERVER_PORT") {
            settings.server.port = port.parse()?;
        }

        Ok(())
    }

    /// Validate settings for consistency
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }
        if self.store.capacity == 0 {
            return Err(anyhow!("Store capacity cannot be 0"));
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(anyhow!(
                    "Unknown logging format {other:?} (expected \"text\" or \"json\")"
                ))
            }
        }

        Ok(())
    }
}
