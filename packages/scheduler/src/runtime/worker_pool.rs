// packages/scheduler/src/runtime/worker_pool.rs
//! Worker pool of isolated execution contexts
//!
//! Holds at most `max_workers` live contexts, one per agent. Allocation
//! never waits: at capacity it fails fast with `PoolExhausted` and the
//! caller decides whether to retry.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//! ├─ Live: { agent_id → IsolatedContext }   (≤ max_workers)
//! └─ live_count                             (read by has_capacity)
//! ```

use crate::events::{EngineEvent, EventKind, EventQueue};
use crate::observability::metric_names;
use crate::runtime::isolate::{ContextHandle, IsolatedContext};
use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{EngineError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Configuration for the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Maximum number of live contexts (default: 64)
    pub max_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 64 }
    }
}

/// Pool of isolated execution contexts keyed by agent id
pub struct WorkerPool {
    /// Configuration
    config: WorkerPoolConfig,

    /// Live contexts
    contexts: Mutex<HashMap<String, ContextHandle>>,

    /// Mirror of `contexts.len()`, updated under the same lock
    live: AtomicUsize,

    /// Lifecycle events
    events: Option<Arc<EventQueue>>,
}

impl WorkerPool {
    /// Create a new pool with the given capacity
    pub fn new(max_workers: usize) -> Self {
        Self::with_config(WorkerPoolConfig { max_workers })
    }

    /// Create a pool with custom configuration
    pub fn with_config(config: WorkerPoolConfig) -> Self {
        info!("Initializing worker pool with {} slots", config.max_workers);

        Self {
            config,
            contexts: Mutex::new(HashMap::new()),
            live: AtomicUsize::new(0),
            events: None,
        }
    }

    /// Publish lifecycle events into a shared queue
    pub fn with_event_queue(mut self, events: Arc<EventQueue>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.push(event);
        }
    }

    /// Allocate a context for `agent_id`.
    ///
    /// Returns the existing context if the agent already has one.
    pub fn allocate(&self, agent_id: &str, limits: ResourceLimits) -> Result<ContextHandle> {
        let mut contexts = self.contexts.lock();

        if let Some(existing) = contexts.get(agent_id) {
            debug!("Agent {} already has context {}", agent_id, existing.namespace());
            return Ok(Arc::clone(existing));
        }

        if contexts.len() >= self.config.max_workers {
            warn!(
                "Worker pool exhausted ({} live), refusing agent {}",
                contexts.len(),
                agent_id
            );
            return Err(EngineError::PoolExhausted {
                max_workers: self.config.max_workers,
            });
        }

        let context = Arc::new(IsolatedContext::new(agent_id, limits));
        contexts.insert(agent_id.to_string(), Arc::clone(&context));
        let live = contexts.len();
        self.live.store(live, Ordering::Release);
        drop(contexts);

        debug!("Allocated context {} ({} live)", context.namespace(), live);
        metrics::gauge!(metric_names::POOL_LIVE_CONTEXTS).set(live as f64);
        self.emit(
            EngineEvent::new(EventKind::ContextAllocated)
                .with_agent(agent_id)
                .with_data(serde_json::json!({ "namespace": context.namespace(), "live": live })),
        );

        Ok(context)
    }

    /// Live context for `agent_id`, if any
    pub fn get(&self, agent_id: &str) -> Option<ContextHandle> {
        self.contexts.lock().get(agent_id).cloned()
    }

    /// Tear down the context of `agent_id`. Freeing an unknown id is a no-op.
    pub async fn free(&self, agent_id: &str) {
        let removed = {
            let mut contexts = self.contexts.lock();
            let removed = contexts.remove(agent_id);
            self.live.store(contexts.len(), Ordering::Release);
            removed
        };

        let Some(context) = removed else {
            debug!("Agent {} has no live context, nothing to free", agent_id);
            return;
        };

        context.dispose().await;

        let live = self.live_count();
        debug!("Freed context {} ({} live)", context.namespace(), live);
        metrics::gauge!(metric_names::POOL_LIVE_CONTEXTS).set(live as f64);
        self.emit(
            EngineEvent::new(EventKind::ContextFreed)
                .with_agent(agent_id)
                .with_data(serde_json::json!({ "namespace": context.namespace(), "live": live })),
        );
    }

    /// Whether another context can be allocated
    pub fn has_capacity(&self) -> bool {
        self.live_count() < self.config.max_workers
    }

    /// Number of live contexts
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Agent ids with a live context
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.contexts.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tear down every live context concurrently and wait for all of them
    pub async fn cleanup(&self) {
        let drained: Vec<(String, ContextHandle)> = {
            let mut contexts = self.contexts.lock();
            let drained = contexts.drain().collect();
            self.live.store(0, Ordering::Release);
            drained
        };

        if drained.is_empty() {
            return;
        }

        info!("Tearing down {} live contexts", drained.len());
        futures::future::join_all(drained.iter().map(|(_, context)| context.dispose())).await;

        metrics::gauge!(metric_names::POOL_LIVE_CONTEXTS).set(0.0);
        for (agent_id, context) in &drained {
            self.emit(
                EngineEvent::new(EventKind::ContextFreed)
                    .with_agent(agent_id.as_str())
                    .with_data(serde_json::json!({ "namespace": context.namespace(), "live": 0 })),
            );
        }
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStats {
        let live = self.live_count();

        PoolStats {
            max_workers: self.config.max_workers,
            live_contexts: live,
            available_slots: self.config.max_workers.saturating_sub(live),
        }
    }
}

/// Pool statistics
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub max_workers: usize,
    pub live_contexts: usize,
    pub available_slots: usize,
}
