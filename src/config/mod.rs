//! Application configuration.
//!
//! Aggregates the accrual, pipeline, and storage sections into a single
//! Config struct that can be loaded from YAML files or environment variables.

mod accrual;
mod pipeline;
mod storage;

pub use accrual::AccrualConfig;
pub use pipeline::{
    PipelineConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS,
};
pub use storage::StorageConfig;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "LOYALTY_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "LOYALTY";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "LOYALTY_LOG";
/// Environment variable selecting JSON log output.
pub const LOG_FORMAT_ENV_VAR: &str = "LOYALTY_LOG_FORMAT";

/// Legacy environment variable for the accrual service address.
pub const ACCRUAL_ADDRESS_ENV_VAR: &str = "ACCRUAL_SYSTEM_ADDRESS";
/// Legacy environment variable for the PostgreSQL URI.
pub const DATABASE_URI_ENV_VAR: &str = "DATABASE_URI";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Accrual service client.
    pub accrual: AccrualConfig,
    /// Reconciliation pipeline.
    pub pipeline: PipelineConfig,
    /// Order store.
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    /// 5. Legacy `ACCRUAL_SYSTEM_ADDRESS` and `DATABASE_URI`
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = config.try_deserialize()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply the environment variables the service has always honoured.
    fn apply_env_overrides(&mut self) {
        if let Ok(address) = std::env::var(ACCRUAL_ADDRESS_ENV_VAR) {
            if !address.is_empty() {
                self.accrual.address = address;
            }
        }

        if let Ok(uri) = std::env::var(DATABASE_URI_ENV_VAR) {
            if !uri.is_empty() {
                self.use_postgres(uri);
            }
        }
    }

    /// Point storage at a PostgreSQL URI.
    pub fn use_postgres(&mut self, uri: String) {
        self.storage.storage_type = "postgres".to_string();
        self.storage.uri = Some(uri);
    }

    /// Reject configurations the binary cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.accrual.address.trim().is_empty() {
            return Err(ConfigError::Invalid("accrual.address is empty".to_string()));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.workers must be at least 1".to_string(),
            ));
        }
        if self.pipeline.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.pipeline.dispatch_interval_ms == 0 || self.pipeline.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline intervals must be positive".to_string(),
            ));
        }
        if self.storage.storage_type == "postgres" && self.storage.uri.is_none() {
            return Err(ConfigError::Invalid(
                "storage.uri is required for postgres".to_string(),
            ));
        }
        Ok(())
    }
}
