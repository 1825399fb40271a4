// packages/scheduler/src/scheduler/agent.rs
//! Agent descriptors and rolling performance metrics

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Smoothing factor of the metric moving average
pub const EMA_SMOOTHING: f64 = 0.5;

/// Static description of a worker agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,

    /// Capability tags
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl AgentDescriptor {
    pub fn new<I, S>(id: impl Into<String>, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}

impl From<crate::utils::config::AgentSpec> for AgentDescriptor {
    fn from(spec: crate::utils::config::AgentSpec) -> Self {
        Self::new(spec.id, spec.capabilities)
    }
}

/// Measurements taken from one terminal task outcome
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutcomeSample {
    pub completion_time_ms: f64,
    pub work_units: f64,
    pub latency_ms: f64,
    pub succeeded: bool,
}

/// Rolling performance summary of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub completion_time_ms: f64,
    pub work_units_used: f64,

    /// In [0, 1]
    pub error_rate: f64,

    /// In [0, 1]
    pub success_rate: f64,

    pub latency_ms: f64,

    /// Terminal outcomes folded in so far
    pub samples: u64,
}

impl Default for AgentMetrics {
    fn default() -> Self {
        // Unproven agents start with a clean record
        Self {
            completion_time_ms: 0.0,
            work_units_used: 0.0,
            error_rate: 0.0,
            success_rate: 1.0,
            latency_ms: 0.0,
            samples: 0,
        }
    }
}

fn ema(old: f64, sample: f64) -> f64 {
    old + EMA_SMOOTHING * (sample - old)
}

impl AgentMetrics {
    /// Fold one terminal outcome into the averages
    pub fn record(&mut self, sample: &OutcomeSample) {
        let (success, error) = if sample.succeeded { (1.0, 0.0) } else { (0.0, 1.0) };

        self.completion_time_ms = ema(self.completion_time_ms, sample.completion_time_ms);
        self.work_units_used = ema(self.work_units_used, sample.work_units);
        self.latency_ms = ema(self.latency_ms, sample.latency_ms);
        self.success_rate = ema(self.success_rate, success);
        self.error_rate = ema(self.error_rate, error);
        self.samples += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(succeeded: bool) -> OutcomeSample {
        OutcomeSample {
            completion_time_ms: 100.0,
            work_units: 10.0,
            latency_ms: 20.0,
            succeeded,
        }
    }

    #[test]
    fn test_fresh_metrics() {
        let metrics = AgentMetrics::default();
        assert_eq!(metrics.success_rate, 1.0);
        assert_eq!(metrics.error_rate, 0.0);
        assert_eq!(metrics.samples, 0);
    }

    #[test]
    fn test_record_halves_toward_sample() {
        let mut metrics = AgentMetrics::default();
        metrics.record(&sample(false));

        assert_eq!(metrics.completion_time_ms, 50.0);
        assert_eq!(metrics.work_units_used, 5.0);
        assert_eq!(metrics.latency_ms, 10.0);
        assert_eq!(metrics.success_rate, 0.5);
        assert_eq!(metrics.error_rate, 0.5);

        metrics.record(&sample(true));
        assert_eq!(metrics.completion_time_ms, 75.0);
        assert_eq!(metrics.success_rate, 0.75);
        assert_eq!(metrics.error_rate, 0.25);
        assert_eq!(metrics.samples, 2);
    }

    #[test]
    fn test_descriptor_from_agent_spec() {
        let spec = crate::utils::config::AgentSpec {
            id: "w1".to_string(),
            capabilities: vec!["code_generation".to_string()],
        };
        let descriptor = AgentDescriptor::from(spec);
        assert!(descriptor.has_capability("code_generation"));
        assert!(!descriptor.has_capability("data_analysis"));
    }

    proptest! {
        #[test]
        fn prop_rates_stay_in_unit_interval(outcomes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut metrics = AgentMetrics::default();
            for succeeded in outcomes {
                metrics.record(&sample(succeeded));
                prop_assert!((0.0..=1.0).contains(&metrics.success_rate));
                prop_assert!((0.0..=1.0).contains(&metrics.error_rate));
                prop_assert!((metrics.success_rate + metrics.error_rate - 1.0).abs() < 1e-9);
            }
        }

        #[test]
        fn prop_successes_converge_monotonically(
            failures in 0usize..16,
            successes in 1usize..64,
        ) {
            let mut metrics = AgentMetrics::default();
            for _ in 0..failures {
                metrics.record(&sample(false));
            }

            let mut previous = metrics.success_rate;
            for _ in 0..successes {
                metrics.record(&sample(true));
                prop_assert!(metrics.success_rate >= previous);
                prop_assert!(metrics.success_rate <= 1.0);
                previous = metrics.success_rate;
            }
        }
    }
}
