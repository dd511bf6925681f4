//! Configuration module for the Courier runtime.
//!
//! Loads [`CourierConfig`] from files, environment variables and
//! programmatic defaults, then validates it.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, ENV_PREFIX, Profile, load_config, load_config_from_file};
pub use schema::{
    CourierConfig, LogFormat, LogLevel, LogOutput, LoggingConfig, PipelineConfig, SpanEventConfig,
};
pub use validation::validate_config;
