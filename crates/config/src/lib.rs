//! Process configuration: typed models with layered loading — an optional
//! TOML file, baked-in defaults, and `REYESTR_`-prefixed environment
//! overrides on top.

pub mod models;

pub use models::{ApiConfig, AppConfig, CacheConfig, DatabaseConfig, DispatcherConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration loading failed: {0}")]
    Load(#[from] config::ConfigError),
    #[error("configuration parse failed: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
