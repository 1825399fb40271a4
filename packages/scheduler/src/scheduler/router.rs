// packages/scheduler/src/scheduler/router.rs
//! Task router
//!
//! Assigns pending tasks to the best-fit idle agent and folds terminal
//! outcomes back into that agent's metrics.
//!
//! # Architecture
//!
//! ```text
//! route_task(task)
//!   ├─ idle agents  = registered − { agent of any assigned/in_progress task }
//!   ├─ score each   (fitness::score)
//!   └─ winner       = max fitness, ties → smallest agent id
//!
//! update_task_status(id, status, output?)
//!   └─ terminal → EMA update of assignee metrics → history
//! ```
//!
//! All state sits behind one mutex so concurrent `route_task` calls can
//! never put two tasks in flight on the same agent.

use crate::events::{EngineEvent, EventKind, EventQueue};
use crate::observability::metric_names;
use crate::scheduler::agent::{AgentDescriptor, AgentMetrics, OutcomeSample};
use crate::scheduler::capabilities::CapabilityTable;
use crate::scheduler::fitness::{self, FitnessScore};
use crate::scheduler::task::{Task, TaskStatus};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct AgentEntry {
    descriptor: AgentDescriptor,
    metrics: AgentMetrics,
}

#[derive(Default)]
struct RouterState {
    /// Ordered by id so iteration gives the tie-break order
    agents: BTreeMap<String, AgentEntry>,

    /// Every submitted task, terminal ones included
    tasks: HashMap<String, Task>,

    /// agent id → task id holding its single in-flight slot
    in_flight: HashMap<String, String>,

    /// Immutable copies of terminal tasks, in completion order
    history: Vec<Task>,
}

/// Result of applying one status update
struct Applied {
    task: Task,
    metrics: Option<AgentMetrics>,

    /// In-flight count after the update
    in_flight: usize,
}

/// Capability- and performance-aware task router
pub struct TaskRouter {
    capabilities: CapabilityTable,
    state: Mutex<RouterState>,
    events: Option<Arc<EventQueue>>,
}

impl TaskRouter {
    /// Create a router using the given capability table
    pub fn new(capabilities: CapabilityTable) -> Self {
        Self {
            capabilities,
            state: Mutex::new(RouterState::default()),
            events: None,
        }
    }

    /// Publish routing events into a shared queue
    pub fn with_event_queue(mut self, events: Arc<EventQueue>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(events) = &self.events {
            events.push(event);
        }
    }

    pub fn capabilities(&self) -> &CapabilityTable {
        &self.capabilities
    }

    /// Add an agent with fresh metrics
    pub fn register_agent(&self, descriptor: AgentDescriptor) -> Result<()> {
        let mut state = self.state.lock();
        if state.agents.contains_key(&descriptor.id) {
            return Err(EngineError::DuplicateAgent(descriptor.id));
        }

        info!(
            "Registered agent {} with capabilities {:?}",
            descriptor.id, descriptor.capabilities
        );
        self.emit(
            EngineEvent::new(EventKind::AgentRegistered)
                .with_agent(descriptor.id.as_str())
                .with_data(serde_json::json!({ "capabilities": descriptor.capabilities })),
        );
        state.agents.insert(
            descriptor.id.clone(),
            AgentEntry {
                descriptor,
                metrics: AgentMetrics::default(),
            },
        );
        Ok(())
    }

    /// Replace an agent's metrics, e.g. when restoring from persisted history
    pub fn restore_agent_metrics(&self, agent_id: &str, metrics: AgentMetrics) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| EngineError::AgentNotFound(agent_id.to_string()))?;
        entry.metrics = metrics;
        Ok(())
    }

    /// Remove an agent, failing its in-flight task first.
    ///
    /// Returns the tasks that were failed on its behalf.
    pub fn deregister_agent(&self, agent_id: &str) -> Result<Vec<Task>> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.agents.contains_key(agent_id) {
            return Err(EngineError::AgentNotFound(agent_id.to_string()));
        }

        let applied = state.in_flight.get(agent_id).cloned().and_then(|task_id| {
            let reason = serde_json::json!({ "error": format!("agent '{}' deregistered", agent_id) });
            Self::apply(state, &task_id, TaskStatus::Failed, Some(reason), Utc::now())
        });

        state.agents.remove(agent_id);
        drop(guard);

        let mut failed = Vec::new();
        if let Some(applied) = applied {
            self.publish(&applied);
            failed.push(applied.task);
        }

        info!("Deregistered agent {} ({} task(s) failed)", agent_id, failed.len());
        self.emit(EngineEvent::new(EventKind::AgentDeregistered).with_agent(agent_id));
        Ok(failed)
    }

    /// Assign `task` to the best-fit idle agent and return its id.
    ///
    /// The task is recorded as pending first, so after `NoSuitableAgent`
    /// it can be resubmitted or marked failed by the caller.
    pub fn route_task(&self, mut task: Task) -> Result<String> {
        if task.status != TaskStatus::Pending {
            return Err(EngineError::TaskNotPending(task.id));
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(existing) = state.tasks.get(&task.id) {
            if existing.status != TaskStatus::Pending {
                return Err(EngineError::TaskNotPending(task.id));
            }
        }

        let required = self.capabilities.required(&task.kind);
        let mut best: Option<FitnessScore> = None;
        for (id, entry) in &state.agents {
            if state.in_flight.contains_key(id) {
                continue;
            }
            let candidate = fitness::score(&required, &entry.descriptor, &entry.metrics);
            // Strict comparison keeps the smallest id on ties
            if best.as_ref().map_or(true, |b| candidate.total > b.total) {
                best = Some(candidate);
            }
        }

        let Some(winner) = best else {
            debug!("No idle agent for task {} (kind {})", task.id, task.kind);
            metrics::counter!(metric_names::ROUTING_FAILURES).increment(1);
            self.emit(
                EngineEvent::new(EventKind::RoutingFailed)
                    .with_task(task.id.as_str())
                    .with_data(serde_json::json!({ "kind": task.kind })),
            );
            let task_id = task.id.clone();
            state.tasks.insert(task.id.clone(), task);
            return Err(EngineError::NoSuitableAgent(task_id));
        };

        let now = Utc::now();
        task.status = TaskStatus::Assigned;
        task.assigned_agent = Some(winner.agent_id.clone());
        task.assigned_at = Some(now);
        task.updated_at = now;

        state.in_flight.insert(winner.agent_id.clone(), task.id.clone());
        let in_flight = state.in_flight.len();

        info!(
            "Assigned task {} (kind {}, priority {}) to {} with fitness {:.4}",
            task.id, task.kind, task.priority, winner.agent_id, winner.total
        );
        metrics::counter!(metric_names::TASKS_ROUTED).increment(1);
        metrics::gauge!(metric_names::TASKS_IN_FLIGHT).set(in_flight as f64);
        self.emit(
            EngineEvent::new(EventKind::TaskAssigned)
                .with_agent(winner.agent_id.as_str())
                .with_task(task.id.as_str())
                .with_data(serde_json::to_value(&winner).unwrap_or(Value::Null)),
        );

        state.tasks.insert(task.id.clone(), task);
        Ok(winner.agent_id)
    }

    /// Apply a status update reported by the execution layer.
    ///
    /// Unknown ids, terminal tasks and illegal transitions are ignored and
    /// return `None`; otherwise the updated task is returned.
    pub fn update_task_status(&self, task_id: &str, status: TaskStatus, output: Option<Value>) -> Option<Task> {
        if status == TaskStatus::Assigned {
            warn!("Ignoring external assignment of task {}", task_id);
            return None;
        }

        let applied = {
            let mut guard = self.state.lock();
            Self::apply(&mut guard, task_id, status, output, Utc::now())?
        };

        self.publish(&applied);
        Some(applied.task)
    }

    fn apply(
        state: &mut RouterState,
        task_id: &str,
        status: TaskStatus,
        output: Option<Value>,
        now: DateTime<Utc>,
    ) -> Option<Applied> {
        let Some(task) = state.tasks.get_mut(task_id) else {
            debug!("Status update for unknown task {}", task_id);
            return None;
        };

        if task.status.is_terminal() {
            debug!("Task {} is already {:?}, ignoring {:?}", task_id, task.status, status);
            return None;
        }
        if !task.status.can_transition_to(status) {
            warn!("Ignoring invalid transition {:?} -> {:?} for task {}", task.status, status, task_id);
            return None;
        }

        task.status = status;
        task.updated_at = now;

        match status {
            TaskStatus::InProgress => {
                task.started_at.get_or_insert(now);
                let task = task.clone();
                return Some(Applied {
                    task,
                    metrics: None,
                    in_flight: state.in_flight.len(),
                });
            }
            TaskStatus::Completed => task.output = Some(output.unwrap_or(Value::Null)),
            TaskStatus::Failed => task.error = output,
            TaskStatus::Pending | TaskStatus::Assigned => {}
        }

        let finished = task.clone();
        state.history.push(finished.clone());

        let Some(agent_id) = finished.assigned_agent.as_deref() else {
            // Failed straight from pending: no agent to credit
            return Some(Applied {
                task: finished,
                metrics: None,
                in_flight: state.in_flight.len(),
            });
        };

        if state.in_flight.get(agent_id).map(String::as_str) == Some(task_id) {
            state.in_flight.remove(agent_id);
        }

        let metrics = state.agents.get_mut(agent_id).map(|entry| {
            entry.metrics.record(&outcome_sample(&finished));
            entry.metrics.clone()
        });

        Some(Applied {
            task: finished,
            metrics,
            in_flight: state.in_flight.len(),
        })
    }

    fn publish(&self, applied: &Applied) {
        let task = &applied.task;
        let mut event = EngineEvent::new(if task.status.is_terminal() {
            EventKind::TaskFinished
        } else {
            EventKind::TaskStatusChanged
        })
        .with_task(task.id.as_str())
        .with_data(serde_json::json!({ "status": task.status }));
        if let Some(agent) = &task.assigned_agent {
            event = event.with_agent(agent.as_str());
        }
        self.emit(event);

        if !task.status.is_terminal() {
            debug!("Task {} is now {:?}", task.id, task.status);
            return;
        }

        let elapsed_ms = (task.updated_at - task.created_at).num_milliseconds().max(0);
        info!("Task {} finished as {:?} after {}ms", task.id, task.status, elapsed_ms);
        metrics::histogram!(metric_names::TASK_COMPLETION_MS).record(elapsed_ms as f64);
        match task.status {
            TaskStatus::Completed => metrics::counter!(metric_names::TASKS_COMPLETED).increment(1),
            _ => metrics::counter!(metric_names::TASKS_FAILED).increment(1),
        }
        metrics::gauge!(metric_names::TASKS_IN_FLIGHT).set(applied.in_flight as f64);

        if let (Some(agent), Some(metrics)) = (&task.assigned_agent, &applied.metrics) {
            self.emit(
                EngineEvent::new(EventKind::MetricsUpdated)
                    .with_agent(agent.as_str())
                    .with_data(serde_json::to_value(metrics).unwrap_or(Value::Null)),
            );
        }
    }

    /// Current metrics of an agent
    pub fn get_agent_metrics(&self, agent_id: &str) -> Option<AgentMetrics> {
        self.state
            .lock()
            .agents
            .get(agent_id)
            .map(|entry| entry.metrics.clone())
    }

    /// Terminal tasks, optionally only those assigned to `agent_id`
    pub fn get_task_history(&self, agent_id: Option<&str>) -> Vec<Task> {
        let state = self.state.lock();
        state
            .history
            .iter()
            .filter(|task| agent_id.map_or(true, |id| task.assigned_agent.as_deref() == Some(id)))
            .cloned()
            .collect()
    }

    pub fn task(&self, task_id: &str) -> Option<Task> {
        self.state.lock().tasks.get(task_id).cloned()
    }

    /// Registered agents in id order
    pub fn agents(&self) -> Vec<AgentDescriptor> {
        self.state
            .lock()
            .agents
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Id of the task currently holding `agent_id`, if any
    pub fn in_flight(&self, agent_id: &str) -> Option<String> {
        self.state.lock().in_flight.get(agent_id).cloned()
    }

    /// Fitness of every idle agent for `task`, best first
    pub fn score_agents(&self, task: &Task) -> Vec<FitnessScore> {
        let required = self.capabilities.required(&task.kind);
        let state = self.state.lock();

        let mut scores: Vec<FitnessScore> = state
            .agents
            .iter()
            .filter(|(id, _)| !state.in_flight.contains_key(*id))
            .map(|(_, entry)| fitness::score(&required, &entry.descriptor, &entry.metrics))
            .collect();
        scores.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.agent_id.cmp(&b.agent_id)));
        scores
    }

    /// Get router statistics
    pub fn stats(&self) -> RouterStats {
        let state = self.state.lock();
        RouterStats {
            agents: state.agents.len(),
            in_flight: state.in_flight.len(),
            pending: state
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Pending)
                .count(),
            finished: state.history.len(),
        }
    }
}

impl Default for TaskRouter {
    fn default() -> Self {
        Self::new(CapabilityTable::default())
    }
}

/// Router statistics
#[derive(Debug, Clone)]
pub struct RouterStats {
    pub agents: usize,
    pub in_flight: usize,
    pub pending: usize,
    pub finished: usize,
}

fn outcome_sample(task: &Task) -> OutcomeSample {
    let completion_time_ms = millis_between(task.created_at, task.updated_at);
    let latency_ms = task
        .assigned_at
        .map(|assigned| millis_between(assigned, task.started_at.unwrap_or(task.updated_at)))
        .unwrap_or(0.0);

    let payload = task.output.as_ref().or(task.error.as_ref());

    OutcomeSample {
        completion_time_ms,
        work_units: payload.map(work_units).unwrap_or(0.0),
        latency_ms,
        succeeded: task.status == TaskStatus::Completed,
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().map_or(0.0, |us| us.max(0) as f64 / 1000.0)
}

/// Work units reported in an output object
fn work_units(payload: &Value) -> f64 {
    ["work_units", "tokens_used"]
        .iter()
        .find_map(|key| payload.get(*key).and_then(Value::as_f64))
        .map_or(0.0, |units| units.max(0.0))
}
