// packages/scheduler/src/events/mod.rs
//! Engine event stream
//!
//! Every component pushes lifecycle events (status transitions, metric
//! updates, context allocation, message delivery) into a shared bounded
//! queue. Collaborators such as dashboards or persistence layers drain it
//! at their own pace; the scheduler never blocks on a slow consumer.
//!
//! ```text
//! TaskRouter ──┐
//! WorkerPool ──┼─ push() → Lock-Free Queue → drain() → Collaborators
//! Comms      ──┘              (full: drop + count)
//! ```

pub mod event;
pub mod event_queue;

pub use event::{EngineEvent, EventKind};
pub use event_queue::{EventQueue, QueueStats};

use serde::{Deserialize, Serialize};

/// Event queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum buffered events before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65_536,
        }
    }
}
