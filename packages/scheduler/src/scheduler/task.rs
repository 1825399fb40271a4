// packages/scheduler/src/scheduler/task.rs
//! Tasks and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task lifecycle state
///
/// ```text
/// pending ──► assigned ──► in_progress ──► completed
///    │            │             │    ▲
///    │            │             └────┘ (progress)
///    └────────────┴─────────────┴────► failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Holds its agent's single in-flight slot
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Assigned | TaskStatus::InProgress)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        match (self, next) {
            (Pending, Assigned) | (Pending, Failed) => true,
            (Assigned, InProgress) | (Assigned, Completed) | (Assigned, Failed) => true,
            (InProgress, InProgress) | (InProgress, Completed) | (InProgress, Failed) => true,
            _ => false,
        }
    }
}

/// Execution hints carried with a task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskMetadata {
    /// Per-attempt timeout; the runtime default applies when unset
    pub timeout_ms: Option<u64>,

    /// Re-attempts the execution layer may make
    pub retries_remaining: Option<u32>,

    /// Task ids this task depends on (advisory only)
    pub dependencies: Vec<String>,

    pub expected_duration_ms: Option<u64>,
}

/// A unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: String,

    /// Capability tag used to derive required capabilities
    pub kind: String,

    /// Task priority (higher = more urgent)
    pub priority: i32,

    pub status: TaskStatus,

    /// Opaque input payload
    pub input: Value,

    /// Set iff `status == Completed`
    pub output: Option<Value>,

    /// Failure payload, only ever set on `Failed`
    pub error: Option<Value>,

    /// Set iff the task has left `Pending` through assignment
    pub assigned_agent: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// When the task was assigned
    pub assigned_at: Option<DateTime<Utc>>,

    /// First `in_progress` transition
    pub started_at: Option<DateTime<Utc>>,

    pub metadata: TaskMetadata,
}

impl Task {
    /// Create a pending task
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind: kind.into(),
            priority: 0,
            status: TaskStatus::Pending,
            input: Value::Null,
            output: None,
            error: None,
            assigned_agent: None,
            created_at: now,
            updated_at: now,
            assigned_at: None,
            started_at: None,
            metadata: TaskMetadata::default(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.metadata.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.metadata.retries_remaining = Some(retries);
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.metadata.dependencies = dependencies;
        self
    }

    pub fn with_expected_duration_ms(mut self, expected_ms: u64) -> Self {
        self.metadata.expected_duration_ms = Some(expected_ms);
        self
    }

    /// Whether the assignee and output fields agree with the status
    pub fn is_consistent(&self) -> bool {
        let assignee_ok = match self.status {
            TaskStatus::Pending => self.assigned_agent.is_none(),
            TaskStatus::Failed => true,
            _ => self.assigned_agent.is_some(),
        };
        let output_ok = self.output.is_some() == (self.status == TaskStatus::Completed);

        assignee_ok && output_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new("t1", "coding")
            .with_input(json!({ "prompt": "fizzbuzz" }))
            .with_priority(5)
            .with_timeout_ms(250)
            .with_retries(2);

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 5);
        assert_eq!(task.metadata.timeout_ms, Some(250));
        assert_eq!(task.metadata.retries_remaining, Some(2));
        assert!(task.is_consistent());
    }

    #[test]
    fn test_transitions() {
        use TaskStatus::*;

        assert!(Pending.can_transition_to(Assigned));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(InProgress));
        assert!(!Pending.can_transition_to(Completed));

        assert!(Assigned.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(InProgress));
        assert!(!InProgress.can_transition_to(Assigned));

        for next in [Pending, Assigned, InProgress, Completed, Failed] {
            assert!(!Completed.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(TaskStatus::InProgress).unwrap(), json!("in_progress"));
    }

    #[test]
    fn test_consistency_flags_stray_output() {
        let mut task = Task::new("t1", "analysis");
        task.output = Some(json!(1));
        assert!(!task.is_consistent());
    }
}
