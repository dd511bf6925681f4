//! Runtime wiring for Courier.
//!
//! [`CourierRuntime`] loads configuration, installs logging and builds the
//! [`PipeManager`] and [`Dispatcher`] handlers are registered on.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! // Auto-loads courier.toml from the current directory
//! let runtime = CourierRuntime::new();
//!
//! runtime.dispatcher().register::<PlaceOrder>(HandlerInvoker::<OrderHandler, _>::with_default());
//! let result = runtime.dispatcher().dispatch(BoxedMessage::new(order), context);
//! ```
//!
//! # Custom Configuration
//!
//! ```rust,ignore
//! let runtime = CourierRuntime::builder()
//!     .config_file("config/production.toml")
//!     .profile("production")
//!     .build()?;
//!
//! // Or use pre-loaded config
//! let config = load_config_from_file("courier.toml")?;
//! let runtime = CourierRuntime::from_config(&config);
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use courier_framework::{ElapsedTimePipe, PipeManager};

use crate::config::{ConfigLoader, CourierConfig, PipelineConfig};
use crate::dispatcher::Dispatcher;
use crate::error::RuntimeResult;
use crate::logging;

/// The Courier runtime: configuration, logging and dispatch.
pub struct CourierRuntime {
    config: CourierConfig,
    pipes: Arc<PipeManager>,
    dispatcher: Arc<Dispatcher>,
}

impl CourierRuntime {
    /// Creates a runtime with automatic configuration loading.
    ///
    /// Searches the current directory for `courier.toml` (or `courier.yaml`
    /// with the `yaml-config` feature). If loading fails, default settings are
    /// used.
    pub fn new() -> Self {
        let config = ConfigLoader::new()
            .with_current_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                CourierConfig::default()
            });

        Self::from_config(&config)
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration.
    ///
    /// Initializes logging unless a subscriber is already installed.
    pub fn from_config(config: &CourierConfig) -> Self {
        logging::init_from_config(&config.logging);

        let pipes = Arc::new(build_pipe_manager(&config.pipeline));
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&pipes)));

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            "Runtime initialized from configuration"
        );

        Self {
            config: config.clone(),
            pipes,
            dispatcher,
        }
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    /// Returns the pipe manager.
    pub fn pipes(&self) -> &Arc<PipeManager> {
        &self.pipes
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }
}

impl Default for CourierRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CourierRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourierRuntime")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Builds a pipe manager from the pipeline section.
fn build_pipe_manager(config: &PipelineConfig) -> PipeManager {
    let pipes = PipeManager::new();

    if let Some(threshold_ms) = config.slow_handler_threshold_ms {
        let mut pipe = ElapsedTimePipe::new();
        if threshold_ms > 0 {
            pipe = pipe.with_warn_threshold(Duration::from_millis(threshold_ms));
        }
        debug!(threshold_ms, "Timing handlers");
        pipes.register_pipe(Arc::new(pipe));
    }

    for name in &config.enabled_pipes {
        pipes.enable_pipe(name);
    }
    for name in &config.disabled_pipes {
        pipes.disable_pipe(name);
    }

    pipes
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a `CourierRuntime` with custom configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder searching the current directory.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Builds the runtime.
    pub fn build(self) -> RuntimeResult<CourierRuntime> {
        let config = self.config_loader.load()?;
        Ok(CourierRuntime::from_config(&config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
