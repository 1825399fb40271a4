// packages/scheduler/src/lib.rs
//! Sentra Lab Multi-Agent Scheduler Library
//!
//! Assigns units of work to the best-fit agent, executes them inside
//! resource-bounded isolated contexts, and feeds outcomes back into the
//! scoring model that drives future assignments.
//!
//! # Architecture
//!
//! The scheduler is structured into several key modules:
//!
//! - **runtime**: Concurrency ceiling, isolated contexts, worker pool
//! - **comms**: Channels, point-to-point and broadcast messaging
//! - **scheduler**: Tasks, agents, fitness scoring and routing
//! - **engine**: Facade running tasks end to end
//! - **events**: Lock-free lifecycle event stream for collaborators
//! - **observability**: Tracing subscriber and metric names
//! - **utils**: Configuration and error types

// Public module exports
pub mod comms;
pub mod engine;
pub mod events;
pub mod observability;
pub mod runtime;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use comms::{AgentCommunicationManager, Message, MessageDraft, MessageKind};
pub use engine::Engine;
pub use runtime::{job, ConcurrencyRuntime, ContextJob, SpawnOptions, WorkerPool};
pub use scheduler::{AgentDescriptor, AgentMetrics, Task, TaskRouter, TaskStatus};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Scheduler build information
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}
