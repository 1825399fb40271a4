// packages/scheduler/src/scheduler/mod.rs
//! Task scheduling
//!
//! - **Task**: unit of work and its lifecycle
//! - **Agent**: descriptor plus rolling performance metrics
//! - **Capabilities**: task kind → required capability table
//! - **Fitness**: weighted capability/performance/speed/efficiency score
//! - **Router**: assigns tasks and feeds outcomes back into metrics

pub mod agent;
pub mod capabilities;
pub mod fitness;
pub mod router;
pub mod task;

pub use agent::{AgentDescriptor, AgentMetrics, OutcomeSample};
pub use capabilities::CapabilityTable;
pub use fitness::FitnessScore;
pub use router::{RouterStats, TaskRouter};
pub use task::{Task, TaskMetadata, TaskStatus};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Scheduler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Extra or replacement entries for the capability table
    pub capabilities: HashMap<String, Vec<String>>,
}

impl SchedulerConfig {
    /// Default capability table with the configured overrides applied
    pub fn capability_table(&self) -> CapabilityTable {
        CapabilityTable::default().with_overrides(&self.capabilities)
    }
}
