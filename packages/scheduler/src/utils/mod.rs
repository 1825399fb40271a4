// packages/scheduler/src/utils/mod.rs
//! Shared utilities: configuration loading and error types

pub mod config;
pub mod errors;

pub use config::{AgentSpec, EngineConfig, LoggingConfig};
pub use errors::{EngineError, Result};
