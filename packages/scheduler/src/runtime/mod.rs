// packages/scheduler/src/runtime/mod.rs
//! Agent execution runtime
//!
//! This module provides the isolated, resource-bounded execution layer:
//!
//! - **Concurrency Runtime**: Global slot ceiling, per-attempt timeout, retries
//! - **Isolated Context**: Private, memory-bounded state per agent
//! - **Worker Pool**: Bounded set of live contexts, one per agent
//! - **Resource Limiter**: Memory and evaluation-time limits
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │               Concurrency Runtime (C slots)             │
//! │      spawn(work) ── timeout ── retry ── budget          │
//! │                          │                              │
//! │  ┌───────────────────────┴─────────────────────────┐   │
//! │  │               Worker Pool (max_workers)          │   │
//! │  │  ┌──────────┐  ┌──────────┐  ┌──────────┐       │   │
//! │  │  │ Context  │  │ Context  │  │ Context  │  ...  │   │
//! │  │  │ agent w1 │  │ agent w2 │  │ agent w3 │       │   │
//! │  │  └──────────┘  └──────────┘  └──────────┘       │   │
//! │  └──────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod concurrency;
pub mod isolate;
pub mod resource_limiter;
pub mod worker_pool;

// Re-export commonly used types
pub use concurrency::{ConcurrencyRuntime, RuntimeConfig, RuntimeStats, SpawnOptions};
pub use isolate::{job, ContextHandle, ContextJob, ContextScope, IsolatedContext};
pub use resource_limiter::ResourceLimits;
pub use worker_pool::{PoolStats, WorkerPool, WorkerPoolConfig};
