// packages/scheduler/src/events/event.rs
//! Event payloads emitted by the scheduler components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Event emitted by a scheduler component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Unique event ID
    pub id: String,

    /// Event type
    pub kind: EventKind,

    /// Agent the event concerns, if any
    pub agent_id: Option<String>,

    /// Task the event concerns, if any
    pub task_id: Option<String>,

    /// When the event was produced
    pub timestamp: DateTime<Utc>,

    /// Event data (JSON)
    pub data: serde_json::Value,
}

/// Event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    AgentRegistered,
    AgentDeregistered,
    TaskAssigned,
    RoutingFailed,
    TaskStatusChanged,
    TaskFinished,
    MetricsUpdated,
    ContextAllocated,
    ContextFreed,
    ChannelCreated,
    ChannelRemoved,
    MessageDelivered,
}

impl EngineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Ulid::new().to_string(),
            kind,
            agent_id: None,
            task_id: None,
            timestamp: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
