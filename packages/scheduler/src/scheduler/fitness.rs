// packages/scheduler/src/scheduler/fitness.rs
//! Agent fitness scoring
//!
//! ```text
//! fitness = 0.3 · capability   (required ∩ offered) / required, 1 if none required
//!         + 0.3 · performance  (1 − error_rate) · success_rate
//!         + 0.3 · speed        1 / (1 + completion_time_ms + latency_ms)
//!         + 0.1 · efficiency   1 / (1 + work_units_used)
//! ```

use crate::scheduler::agent::{AgentDescriptor, AgentMetrics};
use serde::Serialize;
use std::collections::BTreeSet;

pub const CAPABILITY_WEIGHT: f64 = 0.3;
pub const PERFORMANCE_WEIGHT: f64 = 0.3;
pub const SPEED_WEIGHT: f64 = 0.3;
pub const EFFICIENCY_WEIGHT: f64 = 0.1;

/// Per-agent score breakdown
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitnessScore {
    pub agent_id: String,
    pub capability: f64,
    pub performance: f64,
    pub speed: f64,
    pub efficiency: f64,
    pub total: f64,
}

/// Score `agent` for a task requiring `required`
pub fn score(required: &BTreeSet<String>, agent: &AgentDescriptor, metrics: &AgentMetrics) -> FitnessScore {
    let capability = if required.is_empty() {
        1.0
    } else {
        let matched = required.iter().filter(|c| agent.has_capability(c)).count();
        matched as f64 / required.len() as f64
    };
    let performance = (1.0 - metrics.error_rate) * metrics.success_rate;
    let speed = 1.0 / (1.0 + metrics.completion_time_ms + metrics.latency_ms);
    let efficiency = 1.0 / (1.0 + metrics.work_units_used);

    let total = capability * CAPABILITY_WEIGHT
        + performance * PERFORMANCE_WEIGHT
        + speed * SPEED_WEIGHT
        + efficiency * EFFICIENCY_WEIGHT;

    FitnessScore {
        agent_id: agent.id.clone(),
        capability,
        performance,
        speed,
        efficiency,
        total,
    }
}
