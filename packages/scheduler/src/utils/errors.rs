// packages/scheduler/src/utils/errors.rs
//! Error types shared by every scheduler component
//!
//! A failed attempt is retried by the concurrency runtime unless the error
//! is a routing or lifecycle failure that another attempt cannot fix.

use std::time::Duration;
use thiserror::Error;

/// Scheduler error
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A single runtime attempt exceeded its deadline
    #[error("execution timed out after {0:?}")]
    Timeout(Duration),

    /// The wall-clock budget for a spawn (including retries) ran out
    #[error("wall-clock budget of {budget:?} exhausted after {attempts} attempt(s)")]
    DeadlineExceeded { budget: Duration, attempts: u32 },

    /// The work was cancelled before it completed
    #[error("execution cancelled")]
    Cancelled,

    /// The worker pool is at capacity
    #[error("worker pool exhausted ({max_workers} live contexts)")]
    PoolExhausted { max_workers: usize },

    /// An agent has no live isolated execution context
    #[error("no live execution context for agent '{0}'")]
    ContextMissing(String),

    /// The context was torn down while the caller still held a handle
    #[error("execution context '{0}' has been disposed")]
    ContextDisposed(String),

    /// A write would push a context over its memory limit
    #[error("context '{namespace}' memory limit exceeded: {requested} > {limit} bytes")]
    MemoryLimitExceeded {
        namespace: String,
        limit: u64,
        requested: u64,
    },

    /// No idle agent could take the task
    #[error("no suitable agent available for task '{0}'")]
    NoSuitableAgent(String),

    #[error("channel '{0}' not found")]
    ChannelNotFound(String),

    #[error("channel '{0}' already exists")]
    ChannelExists(String),

    #[error("agent '{0}' not found")]
    AgentNotFound(String),

    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// A task was resubmitted after it left the pending state
    #[error("task '{0}' is not pending")]
    TaskNotPending(String),

    /// A message failed structural validation in the sender's context
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The receiving agent's handler returned an error
    #[error("handler for agent '{agent}' failed: {reason}")]
    HandlerFailed { agent: String, reason: String },

    /// The work itself reported a failure
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    /// Whether the concurrency runtime may re-attempt after this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::PoolExhausted { .. }
                | EngineError::ContextMissing(_)
                | EngineError::NoSuitableAgent(_)
                | EngineError::ChannelNotFound(_)
                | EngineError::Cancelled
                | EngineError::DeadlineExceeded { .. }
                | EngineError::ContextDisposed(_)
        )
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy() {
        assert!(EngineError::Timeout(Duration::from_millis(10)).is_retryable());
        assert!(EngineError::ExecutionFailed("boom".into()).is_retryable());
        assert!(EngineError::Serialization("bad input".into()).is_retryable());
        assert!(EngineError::MemoryLimitExceeded {
            namespace: "agent:w1:x".into(),
            limit: 1024,
            requested: 2048,
        }
        .is_retryable());

        assert!(!EngineError::PoolExhausted { max_workers: 4 }.is_retryable());
        assert!(!EngineError::ContextMissing("a".into()).is_retryable());
        assert!(!EngineError::NoSuitableAgent("t".into()).is_retryable());
        assert!(!EngineError::ChannelNotFound("c".into()).is_retryable());
        assert!(!EngineError::Cancelled.is_retryable());
        assert!(!EngineError::ContextDisposed("agent:w1:x".into()).is_retryable());
        assert!(!EngineError::DeadlineExceeded {
            budget: Duration::from_secs(1),
            attempts: 3,
        }
        .is_retryable());
    }

    #[test]
    fn test_display() {
        let err = EngineError::ContextMissing("w1".into());
        assert_eq!(err.to_string(), "no live execution context for agent 'w1'");
    }
}
