// packages/scheduler/src/runtime/resource_limiter.rs
//! Resource limits for isolated execution contexts
//!
//! Provides control over:
//! - Private state size (bytes of serialized JSON held by a context)
//! - Per-evaluation wall-clock time

use serde::{Deserialize, Serialize};
use std::time::Duration;

const MIN_MEMORY_BYTES: u64 = 1024;
const MAX_MEMORY_BYTES: u64 = 16 * 1024 * 1024 * 1024;
const MAX_EVAL_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Resource limits for one isolated execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Memory limit for the context's private state, in bytes
    /// Example: 134217728 = 128MB
    pub memory_limit_bytes: Option<u64>,

    /// Upper bound for a single evaluation inside the context
    /// Independent of the concurrency runtime's per-attempt timeout
    pub eval_timeout_ms: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: Some(128 * 1024 * 1024), // 128MB
            eval_timeout_ms: None,                       // Runtime timeout applies
        }
    }
}

impl ResourceLimits {
    /// Create resource limits with no restrictions
    pub fn unlimited() -> Self {
        Self {
            memory_limit_bytes: None,
            eval_timeout_ms: None,
        }
    }

    /// Create strict resource limits (for untrusted agents)
    pub fn strict() -> Self {
        Self {
            memory_limit_bytes: Some(16 * 1024 * 1024), // 16MB
            eval_timeout_ms: Some(5_000),
        }
    }

    /// Create relaxed limits (for development)
    pub fn relaxed() -> Self {
        Self {
            memory_limit_bytes: Some(1024 * 1024 * 1024), // 1GB
            eval_timeout_ms: None,
        }
    }

    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = Some(bytes);
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Per-evaluation timeout, if one is configured
    pub fn eval_timeout(&self) -> Option<Duration> {
        self.eval_timeout_ms.map(Duration::from_millis)
    }

    /// Validate resource limits
    pub fn validate(&self) -> Result<(), String> {
        if let Some(memory) = self.memory_limit_bytes {
            if memory < MIN_MEMORY_BYTES {
                return Err(format!(
                    "Memory limit cannot be less than {} bytes",
                    MIN_MEMORY_BYTES
                ));
            }
            if memory > MAX_MEMORY_BYTES {
                return Err("Memory limit cannot exceed 16GB".to_string());
            }
        }

        if let Some(timeout) = self.eval_timeout_ms {
            if timeout == 0 {
                return Err("Evaluation timeout cannot be 0".to_string());
            }
            if timeout > MAX_EVAL_TIMEOUT_MS {
                return Err("Evaluation timeout cannot exceed 24 hours".to_string());
            }
        }

        Ok(())
    }

    /// Worst-case memory footprint of `num_contexts` live contexts
    pub fn aggregate_memory(&self, num_contexts: usize) -> Option<u64> {
        self.memory_limit_bytes
            .map(|bytes| bytes.saturating_mul(num_contexts as u64))
    }
}
