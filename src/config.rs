use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub http_server: HttpServerConfig,
}

/// Inventory-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Path to the SQLite inventory database.
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seed sample inventory data on startup when the database is empty.
    #[serde(default)]
    pub seed_data: bool,
    /// Path to the sample data JSON (defaults to data/sample_data.json).
    #[serde(default = "default_seed_path")]
    pub seed_data_path: PathBuf,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
    #[serde(default = "default_http_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default)]
    pub authless: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_http_port(),
            api_key_env: default_http_api_key_env(),
            allowed_origins: Vec::new(),
            authless: false,
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_http_api_key_env() -> String {
    "OTINV_API_KEY".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_seed_path() -> PathBuf {
    PathBuf::from("data/sample_data.json")
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for the config file in this order:
    /// 1. Path specified in OTINV_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional; ignore errors
        let _ = dotenv::dotenv();

        let config_path = std::env::var("OTINV_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str).context("Failed to parse config.toml")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.inventory.db_path.as_os_str().is_empty() {
            anyhow::bail!("inventory.db_path must not be empty");
        }

        if self.inventory.seed_data && !self.inventory.seed_data_path.exists() {
            anyhow::bail!(
                "seed_data is enabled but seed_data_path does not exist: {}",
                self.inventory.seed_data_path.display()
            );
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.inventory.db_path
    }
}
