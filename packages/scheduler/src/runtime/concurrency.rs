// packages/scheduler/src/runtime/concurrency.rs
//! Bounded concurrency runtime
//!
//! Every unit of work in the scheduler runs through [`ConcurrencyRuntime::spawn`]:
//!
//! ```text
//! spawn(work, options)
//!   └─ loop (attempt 1..=retries+1, inside wall-clock budget)
//!        ├─ acquire one of C slots        (suspends, FIFO wakeup)
//!        ├─ select! { work(token), sleep(timeout) }
//!        │     timeout → cancel token, drop future, Timeout
//!        └─ release slot; retry immediately if retryable
//! ```
//!
//! A timed-out attempt is cancelled, not abandoned: its future is dropped
//! and its [`CancellationToken`] fires, so it stops holding the slot.

use crate::observability::metric_names;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Concurrency runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Global ceiling on concurrently executing attempts
    pub max_concurrency: usize,

    /// Per-attempt timeout when the caller gives none
    pub default_timeout_ms: u64,

    /// Retries when the caller gives none
    pub default_retries: u32,

    /// Total wall-clock budget for one spawn, waiting and retries included
    pub max_wall_clock_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 32,
            default_timeout_ms: 30_000,
            default_retries: 0,
            max_wall_clock_ms: 120_000,
        }
    }
}

/// Options for a single spawn
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Carried into traces; slots are granted in FIFO order
    pub priority: i32,

    /// Per-attempt timeout
    pub timeout: Duration,

    /// Re-attempts after the first failure
    pub retries: u32,

    /// Total wall-clock budget
    pub budget: Duration,
}

impl SpawnOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }
}

impl Default for SpawnOptions {
    fn default() -> Self {
        RuntimeConfig::default().spawn_options()
    }
}

impl RuntimeConfig {
    /// Spawn options built from these defaults
    pub fn spawn_options(&self) -> SpawnOptions {
        SpawnOptions {
            priority: 0,
            timeout: Duration::from_millis(self.default_timeout_ms),
            retries: self.default_retries,
            budget: Duration::from_millis(self.max_wall_clock_ms),
        }
    }
}

/// Runtime counters
#[derive(Debug, Default)]
struct Counters {
    attempts: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

/// Bounded execution substrate shared by the pool, comms and engine
pub struct ConcurrencyRuntime {
    config: RuntimeConfig,

    /// One permit per concurrently executing attempt
    slots: Arc<Semaphore>,

    /// Parent of every attempt token; cancelled on shutdown
    shutdown: CancellationToken,

    counters: Counters,
}

impl ConcurrencyRuntime {
    /// Create a new runtime
    pub fn new(config: RuntimeConfig) -> Self {
        let ceiling = config.max_concurrency.max(1);
        debug!("Concurrency runtime initialized with {} slots", ceiling);

        Self {
            config,
            slots: Arc::new(Semaphore::new(ceiling)),
            shutdown: CancellationToken::new(),
            counters: Counters::default(),
        }
    }

    /// Create a runtime with the given ceiling and default timeouts
    pub fn with_ceiling(max_concurrency: usize) -> Self {
        Self::new(RuntimeConfig {
            max_concurrency,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Spawn options seeded from the runtime defaults
    pub fn default_options(&self) -> SpawnOptions {
        self.config.spawn_options()
    }

    /// Run `work` under the slot ceiling, timeout and retry policy.
    ///
    /// `work` is invoked once per attempt with a fresh cancellation token
    /// that fires when the attempt times out or the runtime shuts down.
    pub async fn spawn<F, Fut, T>(&self, work: F, options: SpawnOptions) -> Result<T>
    where
        F: Fn(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + options.budget;
        let max_attempts = options.retries.saturating_add(1);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.budget_exhausted(&options, attempt - 1));
            }

            let permit = match tokio::time::timeout(remaining, self.slots.acquire()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(EngineError::Cancelled),
                Err(_) => return Err(self.budget_exhausted(&options, attempt - 1)),
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt_timeout = options.timeout.min(remaining);
            let token = self.shutdown.child_token();

            self.counters.attempts.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(metric_names::RUNTIME_ATTEMPTS).increment(1);
            metrics::gauge!(metric_names::RUNTIME_ACTIVE).increment(1.0);
            trace!(
                "Attempt {}/{} (priority {}, timeout {:?})",
                attempt,
                max_attempts,
                options.priority,
                attempt_timeout
            );

            let outcome = tokio::select! {
                result = work(token.clone()) => result,
                _ = tokio::time::sleep(attempt_timeout) => {
                    token.cancel();
                    if attempt_timeout < options.timeout {
                        // The budget, not the attempt timeout, ran out
                        Err(EngineError::DeadlineExceeded {
                            budget: options.budget,
                            attempts: attempt,
                        })
                    } else {
                        self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(metric_names::RUNTIME_TIMEOUTS).increment(1);
                        Err(EngineError::Timeout(options.timeout))
                    }
                }
                _ = self.shutdown.cancelled() => Err(EngineError::Cancelled),
            };

            drop(permit);
            metrics::gauge!(metric_names::RUNTIME_ACTIVE).decrement(1.0);

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        "Attempt {}/{} failed: {}; retrying immediately",
                        attempt, max_attempts, err
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(metric_names::RUNTIME_RETRIES).increment(1);
                }
                Err(err) => {
                    debug!("Giving up after {} attempt(s): {}", attempt, err);
                    self.counters.failures.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    fn budget_exhausted(&self, options: &SpawnOptions, attempts: u32) -> EngineError {
        self.counters.failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Wall-clock budget of {:?} exhausted after {} attempt(s)",
            options.budget, attempts
        );
        EngineError::DeadlineExceeded {
            budget: options.budget,
            attempts,
        }
    }

    /// Slots not currently held by an attempt
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Cancel every in-flight attempt and refuse new ones
    pub fn shutdown(&self) {
        debug!("Shutting down concurrency runtime");
        self.shutdown.cancel();
        self.slots.close();
    }

    /// Get runtime statistics
    pub fn stats(&self) -> RuntimeStats {
        let ceiling = self.config.max_concurrency.max(1);
        RuntimeStats {
            max_concurrency: ceiling,
            active: ceiling.saturating_sub(self.slots.available_permits()),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for ConcurrencyRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

/// Runtime statistics
#[derive(Debug, Clone)]
pub struct RuntimeStats {
    pub max_concurrency: usize,
    pub active: usize,
    pub attempts: u64,
    pub timeouts: u64,
    pub retries: u64,
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_spawn_returns_result() {
        let runtime = ConcurrencyRuntime::with_ceiling(2);
        let value = runtime
            .spawn(|_| async { Ok(42) }, SpawnOptions::default())
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(runtime.stats().attempts, 1);
        assert_eq!(runtime.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_timeout_retries_once_then_fails() {
        let runtime = ConcurrencyRuntime::with_ceiling(2);
        let attempts = Arc::new(AtomicUsize::new(0));

        let options = SpawnOptions::default()
            .with_timeout(Duration::from_millis(10))
            .with_retries(1);

        let counter = Arc::clone(&attempts);
        let result: Result<()> = runtime
            .spawn(
                move |_| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1000)).await;
                        Ok(())
                    }
                },
                options,
            )
            .await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let stats = runtime.stats();
        assert_eq!(stats.timeouts, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.active, 0);
    }

    #[tokio::test]
    async fn test_failure_then_success() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let value = runtime
            .spawn(
                move |_| {
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n == 0 {
                            Err(EngineError::ExecutionFailed("flaky".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
                SpawnOptions::default().with_retries(3),
            )
            .await
            .unwrap();

        assert_eq!(value, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_not_retried() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<()> = runtime
            .spawn(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(EngineError::ContextMissing("w1".into())) }
                },
                SpawnOptions::default().with_retries(5),
            )
            .await;

        assert!(matches!(result, Err(EngineError::ContextMissing(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_work_errors_are_retried() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        let failures = [
            EngineError::Serialization("bad input".into()),
            EngineError::MemoryLimitExceeded {
                namespace: "agent:w1:x".into(),
                limit: 1024,
                requested: 4096,
            },
            EngineError::ExecutionFailed("flaky".into()),
        ];

        for failure in failures {
            let attempts = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&attempts);
            let error = failure.clone();

            let result: Result<()> = runtime
                .spawn(
                    move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let error = error.clone();
                        async move { Err(error) }
                    },
                    SpawnOptions::default().with_retries(2),
                )
                .await;

            assert!(result.is_err());
            assert_eq!(attempts.load(Ordering::SeqCst), 3, "{:?}", failure);
        }
    }

    #[tokio::test]
    async fn test_ceiling_is_enforced() {
        let runtime = Arc::new(ConcurrencyRuntime::with_ceiling(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runtime = Arc::clone(&runtime);
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    runtime
                        .spawn(
                            move |_| {
                                let running = Arc::clone(&running);
                                let peak = Arc::clone(&peak);
                                async move {
                                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                                    peak.fetch_max(now, Ordering::SeqCst);
                                    tokio::time::sleep(Duration::from_millis(20)).await;
                                    running.fetch_sub(1, Ordering::SeqCst);
                                    Ok(())
                                }
                            },
                            SpawnOptions::default(),
                        )
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(runtime.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_timeout_cancels_token() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        let observed = Arc::new(CancellationToken::new());

        let slot = Arc::clone(&observed);
        let result: Result<()> = runtime
            .spawn(
                move |token| {
                    let slot = Arc::clone(&slot);
                    async move {
                        // Propagate the attempt token to a watcher outliving the attempt
                        let watcher = token.clone();
                        tokio::spawn(async move {
                            watcher.cancelled().await;
                            slot.cancel();
                        });
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    }
                },
                SpawnOptions::default().with_timeout(Duration::from_millis(10)),
            )
            .await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
        tokio::time::timeout(Duration::from_secs(1), observed.cancelled())
            .await
            .expect("attempt token was not cancelled");
    }

    #[tokio::test]
    async fn test_wall_clock_budget() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let result: Result<()> = runtime
            .spawn(
                move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(())
                    }
                },
                SpawnOptions::default()
                    .with_timeout(Duration::from_millis(20))
                    .with_retries(1000)
                    .with_budget(Duration::from_millis(100)),
            )
            .await;

        assert!(matches!(result, Err(EngineError::DeadlineExceeded { .. })));
        assert!(attempts.load(Ordering::SeqCst) < 1000);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let runtime = ConcurrencyRuntime::with_ceiling(1);
        runtime.shutdown();

        let result = runtime
            .spawn(|_| async { Ok(()) }, SpawnOptions::default())
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
