// packages/scheduler/src/engine.rs
//! Engine facade
//!
//! Wires the runtime, pool, communication manager and router together and
//! runs a task end to end:
//!
//! ```text
//! execute_task(task, job)
//!   route_task ──► ensure_context ──► in_progress
//!        │                                │
//!        ▼                                ▼
//!  NoSuitableAgent            dispatch (timeout / retries)
//!                                         │
//!                         completed(output) | failed(error)
//! ```

use crate::comms::AgentCommunicationManager;
use crate::events::EventQueue;
use crate::runtime::concurrency::ConcurrencyRuntime;
use crate::runtime::isolate::ContextJob;
use crate::runtime::worker_pool::WorkerPool;
use crate::scheduler::{AgentDescriptor, Task, TaskRouter, TaskStatus};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scheduler engine
pub struct Engine {
    config: EngineConfig,
    runtime: Arc<ConcurrencyRuntime>,
    pool: Arc<WorkerPool>,
    comms: AgentCommunicationManager,
    router: TaskRouter,
    events: Arc<EventQueue>,
}

impl Engine {
    /// Build an engine from validated configuration
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let events = Arc::new(EventQueue::new(config.events.queue_capacity));
        let runtime = Arc::new(ConcurrencyRuntime::new(config.runtime.clone()));
        let pool = Arc::new(WorkerPool::with_config(config.pool.clone()).with_event_queue(Arc::clone(&events)));
        let comms = AgentCommunicationManager::new(Arc::clone(&pool), Arc::clone(&runtime), config.isolate.clone())
            .with_event_queue(Arc::clone(&events));
        let router = TaskRouter::new(config.scheduler.capability_table()).with_event_queue(Arc::clone(&events));

        info!(
            "Engine ready: {} concurrency slots, {} workers",
            config.runtime.max_concurrency, config.pool.max_workers
        );

        Ok(Self {
            config,
            runtime,
            pool,
            comms,
            router,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<ConcurrencyRuntime> {
        &self.runtime
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn comms(&self) -> &AgentCommunicationManager {
        &self.comms
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    /// Shared event queue
    pub fn events(&self) -> &Arc<EventQueue> {
        &self.events
    }

    pub fn register_agent(&self, descriptor: AgentDescriptor) -> Result<()> {
        self.router.register_agent(descriptor)
    }

    /// Remove an agent, fail its in-flight task and tear down its context
    pub async fn deregister_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        let failed = self.router.deregister_agent(agent_id)?;
        self.comms.unregister_handler(agent_id);
        self.comms.destroy_context(agent_id).await;
        Ok(failed)
    }

    /// Route `task` and run `job` in the assignee's context.
    ///
    /// The task's `timeout_ms` and `retries_remaining` override the runtime
    /// defaults. Execution errors mark the task failed and are returned.
    pub async fn execute_task(&self, task: Task, job: ContextJob) -> Result<Value> {
        let mut options = self.runtime.default_options().with_priority(task.priority);
        if let Some(timeout_ms) = task.metadata.timeout_ms {
            options = options.with_timeout(Duration::from_millis(timeout_ms));
        }
        if let Some(retries) = task.metadata.retries_remaining {
            options = options.with_retries(retries);
        }

        let task_id = task.id.clone();
        let input = task.input.clone();
        let agent_id = self.router.route_task(task)?;

        if let Err(e) = self.comms.ensure_context(&agent_id) {
            warn!("Task {} could not get a context on {}: {}", task_id, agent_id, e);
            self.fail(&task_id, &e);
            return Err(e);
        }

        self.router
            .update_task_status(&task_id, TaskStatus::InProgress, None);
        debug!("Dispatching task {} to {}", task_id, agent_id);

        match self.comms.dispatch(&agent_id, job, input, options).await {
            Ok(output) => {
                self.router
                    .update_task_status(&task_id, TaskStatus::Completed, Some(output.clone()));
                Ok(output)
            }
            Err(e) => {
                warn!("Task {} failed on {}: {}", task_id, agent_id, e);
                self.fail(&task_id, &e);
                Err(e)
            }
        }
    }

    fn fail(&self, task_id: &str, error: &EngineError) {
        self.router.update_task_status(
            task_id,
            TaskStatus::Failed,
            Some(serde_json::json!({ "error": error.to_string() })),
        );
    }

    /// Cancel in-flight work and tear down every context
    pub async fn shutdown(&self) {
        info!("Shutting down engine");
        self.runtime.shutdown();
        self.pool.cleanup().await;
    }
}
