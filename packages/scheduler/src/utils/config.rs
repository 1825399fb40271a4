// packages/scheduler/src/utils/config.rs
//! Engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `scheduler.{yaml,toml,json}` in the working directory (optional)
//! 3. `SCHEDULER__SECTION__KEY` environment variables

use crate::events::EventsConfig;
use crate::runtime::concurrency::RuntimeConfig;
use crate::runtime::resource_limiter::ResourceLimits;
use crate::runtime::worker_pool::WorkerPoolConfig;
use crate::scheduler::SchedulerConfig;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Default config file stem looked up in the working directory
pub const DEFAULT_CONFIG_NAME: &str = "scheduler";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SCHEDULER";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Agent registered at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub id: String,

    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrency runtime (ceiling, timeouts, retries)
    pub runtime: RuntimeConfig,

    /// Worker pool capacity
    pub pool: WorkerPoolConfig,

    /// Limits applied to every isolated execution context
    pub isolate: ResourceLimits,

    /// Scheduler settings (capability table overrides)
    pub scheduler: SchedulerConfig,

    /// Engine event queue
    pub events: EventsConfig,

    /// Logging
    pub logging: LoggingConfig,

    /// Agents registered when the engine starts
    pub agents: Vec<AgentSpec>,
}

impl EngineConfig {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_NAME).required(false))
            .add_source(Self::environment())
            .build()?;

        Self::finish(settings)
    }

    /// Load configuration from an explicit file, still honouring the environment
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {:?}", path);

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(Self::environment())
            .build()?;

        Self::finish(settings)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    fn finish(settings: config::Config) -> Result<Self> {
        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.runtime.max_concurrency == 0 {
            return Err(EngineError::ConfigError(
                "runtime.max_concurrency must be at least 1".to_string(),
            ));
        }

        if self.runtime.default_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "runtime.default_timeout_ms must be at least 1".to_string(),
            ));
        }

        if self.runtime.max_wall_clock_ms < self.runtime.default_timeout_ms {
            return Err(EngineError::ConfigError(format!(
                "runtime.max_wall_clock_ms ({}) is shorter than one attempt ({})",
                self.runtime.max_wall_clock_ms, self.runtime.default_timeout_ms
            )));
        }

        if self.pool.max_workers == 0 {
            return Err(EngineError::ConfigError(
                "pool.max_workers must be at least 1".to_string(),
            ));
        }

        if self.events.queue_capacity == 0 {
            return Err(EngineError::ConfigError(
                "events.queue_capacity must be at least 1".to_string(),
            ));
        }

        self.isolate
            .validate()
            .map_err(|e| EngineError::ConfigError(format!("isolate: {}", e)))?;

        Ok(())
    }
}
