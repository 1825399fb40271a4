// packages/scheduler/src/observability/mod.rs
//! Logging and metrics setup
//!
//! The library only records through the `tracing` and `metrics` facades.
//! Installing a subscriber is left to the binary (or the embedding
//! application); no metrics exporter is installed here.

use crate::utils::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Metric names recorded by the scheduler
pub mod metric_names {
    pub const RUNTIME_ATTEMPTS: &str = "scheduler_runtime_attempts_total";
    pub const RUNTIME_ACTIVE: &str = "scheduler_runtime_active";
    pub const RUNTIME_TIMEOUTS: &str = "scheduler_runtime_timeouts_total";
    pub const RUNTIME_RETRIES: &str = "scheduler_runtime_retries_total";

    pub const POOL_LIVE_CONTEXTS: &str = "scheduler_pool_live_contexts";

    pub const MESSAGES_DELIVERED: &str = "scheduler_messages_delivered_total";

    pub const TASKS_ROUTED: &str = "scheduler_tasks_routed_total";
    pub const ROUTING_FAILURES: &str = "scheduler_routing_failures_total";
    pub const TASKS_IN_FLIGHT: &str = "scheduler_tasks_in_flight";
    pub const TASKS_COMPLETED: &str = "scheduler_tasks_completed_total";
    pub const TASKS_FAILED: &str = "scheduler_tasks_failed_total";
    pub const TASK_COMPLETION_MS: &str = "scheduler_task_completion_ms";
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set. Safe to call more than
/// once; later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .try_init()
            .ok();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_level(true)
            .try_init()
            .ok();
    }
}

/// Register descriptions for every scheduler metric with the installed recorder
pub fn describe_metrics() {
    use metric_names::*;

    metrics::describe_counter!(RUNTIME_ATTEMPTS, "Execution attempts started by the concurrency runtime");
    metrics::describe_gauge!(RUNTIME_ACTIVE, "Attempts currently holding a concurrency slot");
    metrics::describe_counter!(RUNTIME_TIMEOUTS, "Attempts that exceeded their per-attempt timeout");
    metrics::describe_counter!(RUNTIME_RETRIES, "Immediate re-attempts after a retryable failure");

    metrics::describe_gauge!(POOL_LIVE_CONTEXTS, "Live isolated execution contexts");

    metrics::describe_counter!(MESSAGES_DELIVERED, "Messages validated, dispatched and logged");

    metrics::describe_counter!(TASKS_ROUTED, "Tasks assigned to an agent");
    metrics::describe_counter!(ROUTING_FAILURES, "Routing attempts with no available agent");
    metrics::describe_gauge!(TASKS_IN_FLIGHT, "Tasks assigned or in progress");
    metrics::describe_counter!(TASKS_COMPLETED, "Tasks that reached completed");
    metrics::describe_counter!(TASKS_FAILED, "Tasks that reached failed");
    metrics::describe_histogram!(
        TASK_COMPLETION_MS,
        metrics::Unit::Milliseconds,
        "Time from task creation to its terminal status"
    );
}
