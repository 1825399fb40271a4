// packages/scheduler/src/runtime/isolate.rs
//! Isolated execution context bound to one agent
//!
//! Provides:
//! - A private key/value state that no other context can reach
//! - Memory accounting against `ResourceLimits::memory_limit_bytes`
//! - Per-evaluation timeout and cooperative cancellation
//! - Orderly disposal that waits for in-flight evaluations

use crate::comms::channel::Message;
use crate::runtime::resource_limiter::ResourceLimits;
use crate::utils::errors::{EngineError, Result};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use ulid::Ulid;

/// Grace period `dispose` waits for in-flight evaluations
const DISPOSE_GRACE: Duration = Duration::from_secs(5);

/// Work evaluated inside a context.
///
/// Receives the context's private scope, the input payload and a token that
/// fires when the evaluation is cancelled or times out.
pub type ContextJob =
    Arc<dyn Fn(ContextScope, Value, CancellationToken) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap an async closure as a [`ContextJob`]
pub fn job<F, Fut>(f: F) -> ContextJob
where
    F: Fn(ContextScope, Value, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |scope, input, cancel| Box::pin(f(scope, input, cancel)))
}

/// Private state of a context
#[derive(Debug, Default)]
struct ContextState {
    values: Map<String, Value>,
    used_bytes: u64,
}

fn entry_size(key: &str, value: &Value) -> u64 {
    // Serialized size is the accounting unit; serialization of a Value cannot fail
    let value_len = serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0);
    (key.len() + value_len) as u64
}

struct ContextInner {
    namespace: String,
    agent_id: String,
    limits: ResourceLimits,
    state: Mutex<ContextState>,
    cancel: CancellationToken,
    disposed: AtomicBool,
    inflight: AtomicUsize,
    idle: Notify,
    evaluations: AtomicU64,
}

/// Handle to a context's private state, passed into jobs
#[derive(Clone)]
pub struct ContextScope {
    inner: Arc<ContextInner>,
}

impl ContextScope {
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    /// Read a value from the private state
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().values.get(key).cloned()
    }

    /// Write a value, enforcing the memory limit
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        let mut state = self.inner.state.lock();
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::ContextDisposed(self.inner.namespace.clone()));
        }

        let freed = state
            .values
            .get(&key)
            .map(|old| entry_size(&key, old))
            .unwrap_or(0);
        let requested = state.used_bytes - freed + entry_size(&key, &value);

        if let Some(limit) = self.inner.limits.memory_limit_bytes {
            if requested > limit {
                return Err(EngineError::MemoryLimitExceeded {
                    namespace: self.inner.namespace.clone(),
                    limit,
                    requested,
                });
            }
        }

        state.used_bytes = requested;
        state.values.insert(key, value);
        Ok(())
    }

    /// Remove a value, returning it
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.inner.state.lock();
        let old = state.values.remove(key)?;
        state.used_bytes -= entry_size(key, &old);
        Some(old)
    }

    /// Bytes currently accounted to this context
    pub fn used_bytes(&self) -> u64 {
        self.inner.state.lock().used_bytes
    }
}

/// Sandboxed, memory- and time-bounded evaluation environment
pub struct IsolatedContext {
    inner: Arc<ContextInner>,
}

/// Shared handle returned by the worker pool
pub type ContextHandle = Arc<IsolatedContext>;

/// Decrements the in-flight counter even if the evaluation is dropped
struct InflightGuard<'a>(&'a ContextInner);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.0.inflight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

impl IsolatedContext {
    /// Create a new context for `agent_id`
    pub fn new(agent_id: impl Into<String>, limits: ResourceLimits) -> Self {
        let agent_id = agent_id.into();
        let namespace = format!("agent:{}:{}", agent_id, Ulid::new());
        debug!("Creating isolated context {}", namespace);

        Self {
            inner: Arc::new(ContextInner {
                namespace,
                agent_id,
                limits,
                state: Mutex::new(ContextState::default()),
                cancel: CancellationToken::new(),
                disposed: AtomicBool::new(false),
                inflight: AtomicUsize::new(0),
                idle: Notify::new(),
                evaluations: AtomicU64::new(0),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn agent_id(&self) -> &str {
        &self.inner.agent_id
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.inner.limits
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of evaluations started in this context
    pub fn evaluations(&self) -> u64 {
        self.inner.evaluations.load(Ordering::Relaxed)
    }

    /// Scope over this context's private state
    pub fn scope(&self) -> ContextScope {
        ContextScope {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Copy of the private state
    pub fn snapshot(&self) -> Value {
        Value::Object(self.inner.state.lock().values.clone())
    }

    /// Evaluations currently running in this context
    pub fn in_flight(&self) -> usize {
        self.inner.inflight.load(Ordering::Acquire)
    }

    fn enter(&self) -> Result<InflightGuard<'_>> {
        // Count first so a concurrent dispose either sees us or we see it
        self.inner.inflight.fetch_add(1, Ordering::SeqCst);
        let guard = InflightGuard(&self.inner);
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(EngineError::ContextDisposed(self.inner.namespace.clone()));
        }
        self.inner.evaluations.fetch_add(1, Ordering::Relaxed);
        Ok(guard)
    }

    /// Evaluate `job` against this context.
    ///
    /// Stops when `cancel` fires, the context is disposed, or the
    /// context's evaluation timeout elapses.
    pub async fn evaluate(&self, job: &ContextJob, input: Value, cancel: CancellationToken) -> Result<Value> {
        let _guard = self.enter()?;
        let token = self.inner.cancel.child_token();
        trace!("Evaluating in {}", self.inner.namespace);

        let eval_limit = self.inner.limits.eval_timeout();
        let limit_timer = async {
            match eval_limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        let result = tokio::select! {
            result = job(self.scope(), input, token.clone()) => result,
            _ = token.cancelled() => Err(EngineError::Cancelled),
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = limit_timer => {
                warn!("Evaluation in {} exceeded {:?}", self.inner.namespace, eval_limit);
                Err(EngineError::Timeout(eval_limit.unwrap_or_default()))
            }
        };

        // Reaches anything the job handed the token to
        token.cancel();
        result
    }

    /// Structural message check run on behalf of the sender
    pub fn validate_message(&self, message: &Message) -> Result<()> {
        let _guard = self.enter()?;

        if message.from.trim().is_empty() {
            return Err(EngineError::InvalidMessage("missing sender".to_string()));
        }
        if message.to.trim().is_empty() {
            return Err(EngineError::InvalidMessage("missing recipient".to_string()));
        }
        if message.from != self.inner.agent_id {
            return Err(EngineError::InvalidMessage(format!(
                "sender '{}' validated in context of '{}'",
                message.from, self.inner.agent_id
            )));
        }

        let empty = match &message.content {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(fields) => fields.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        if empty {
            return Err(EngineError::InvalidMessage("empty content".to_string()));
        }

        Ok(())
    }

    /// Tear the context down: cancel evaluations, wait for them, release state
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Disposing isolated context {}", self.inner.namespace);
        self.inner.cancel.cancel();

        let drained = tokio::time::timeout(DISPOSE_GRACE, async {
            loop {
                let idle = self.inner.idle.notified();
                if self.inner.inflight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                idle.await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Context {} still had evaluations running after {:?}",
                self.inner.namespace, DISPOSE_GRACE
            );
        }

        let mut state = self.inner.state.lock();
        state.values.clear();
        state.used_bytes = 0;
    }
}

impl Drop for IsolatedContext {
    fn drop(&mut self) {
        // Stop anything still running against this context
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::channel::{MessageDraft, MessageKind};
    use serde_json::json;

    fn message(from: &str, to: &str, content: Value) -> Message {
        MessageDraft {
            from: from.to_string(),
            to: to.to_string(),
            content,
            kind: MessageKind::Request,
        }
        .into_message()
    }

    #[test]
    fn test_namespace_is_unique() {
        let a = IsolatedContext::new("w1", ResourceLimits::default());
        let b = IsolatedContext::new("w1", ResourceLimits::default());
        assert_ne!(a.namespace(), b.namespace());
        assert!(a.namespace().starts_with("agent:w1:"));
    }

    #[test]
    fn test_memory_limit() {
        let ctx = IsolatedContext::new("w1", ResourceLimits::unlimited().with_memory_limit(1024));
        let scope = ctx.scope();

        scope.set("small", json!("x")).unwrap();
        let used = scope.used_bytes();
        assert!(used > 0);

        let big = json!("y".repeat(2048));
        let err = scope.set("big", big).unwrap_err();
        assert!(matches!(err, EngineError::MemoryLimitExceeded { limit: 1024, .. }));

        // Failed write leaves state untouched
        assert_eq!(scope.used_bytes(), used);
        assert!(scope.get("big").is_none());

        scope.remove("small");
        assert_eq!(scope.used_bytes(), 0);
    }

    #[test]
    fn test_overwrite_reuses_budget() {
        let ctx = IsolatedContext::new("w1", ResourceLimits::unlimited().with_memory_limit(1024));
        let scope = ctx.scope();

        let value = json!("z".repeat(600));
        scope.set("k", value.clone()).unwrap();
        scope.set("k", value).unwrap();
    }

    #[test]
    fn test_contexts_do_not_share_state() {
        let a = IsolatedContext::new("a", ResourceLimits::default());
        let b = IsolatedContext::new("b", ResourceLimits::default());

        a.scope().set("secret", json!(1)).unwrap();
        assert!(b.scope().get("secret").is_none());
        assert_eq!(b.snapshot(), json!({}));
    }

    #[tokio::test]
    async fn test_evaluate_uses_private_scope() {
        let ctx = IsolatedContext::new("w1", ResourceLimits::default());
        let counter = job(|scope, input, _| async move {
            let n = scope.get("count").and_then(|v| v.as_i64()).unwrap_or(0) + 1;
            scope.set("count", json!(n))?;
            Ok(json!({ "count": n, "echo": input }))
        });

        ctx.evaluate(&counter, json!("a"), CancellationToken::new()).await.unwrap();
        let out = ctx.evaluate(&counter, json!("b"), CancellationToken::new()).await.unwrap();

        assert_eq!(out["count"], 2);
        assert_eq!(out["echo"], "b");
        assert_eq!(ctx.snapshot()["count"], 2);
        assert_eq!(ctx.evaluations(), 2);
    }

    #[tokio::test]
    async fn test_eval_timeout() {
        let limits = ResourceLimits::unlimited().with_eval_timeout(Duration::from_millis(10));
        let ctx = IsolatedContext::new("w1", limits);
        let slow = job(|_, _, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });

        let result = ctx.evaluate(&slow, Value::Null, CancellationToken::new()).await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_caller_cancellation() {
        let ctx = IsolatedContext::new("w1", ResourceLimits::default());
        let slow = job(|_, _, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        });

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = ctx.evaluate(&slow, Value::Null, cancel).await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_dispose_cancels_and_rejects() {
        let ctx = Arc::new(IsolatedContext::new("w1", ResourceLimits::default()));
        ctx.scope().set("k", json!(1)).unwrap();

        let slow = job(|_, _, cancel| async move {
            cancel.cancelled().await;
            Err(EngineError::Cancelled)
        });

        let running = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.evaluate(&slow, Value::Null, CancellationToken::new()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        ctx.dispose().await;
        assert!(ctx.is_disposed());
        assert!(matches!(running.await.unwrap(), Err(EngineError::Cancelled)));
        assert_eq!(ctx.snapshot(), json!({}));

        let noop = job(|_, _, _| async { Ok(Value::Null) });
        let result = ctx.evaluate(&noop, Value::Null, CancellationToken::new()).await;
        assert!(matches!(result, Err(EngineError::ContextDisposed(_))));

        // Second dispose is a no-op
        ctx.dispose().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_dispose_racing_evaluations_leaves_no_state() {
        let ctx = Arc::new(IsolatedContext::new("w1", ResourceLimits::default()));
        let writer = job(|scope, input, _| async move {
            tokio::task::yield_now().await;
            let key = format!("k{}", input);
            scope.set(key, input)?;
            Ok(Value::Null)
        });

        let evaluations: Vec<_> = (0..64)
            .map(|i| {
                let ctx = Arc::clone(&ctx);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move { ctx.evaluate(&writer, json!(i), CancellationToken::new()).await })
            })
            .collect();
        ctx.dispose().await;

        for evaluation in evaluations {
            let _ = evaluation.await.unwrap();
        }
        assert_eq!(ctx.snapshot(), json!({}));
        assert_eq!(ctx.scope().used_bytes(), 0);
        assert_eq!(ctx.in_flight(), 0);

        let rejected = ctx.evaluate(&writer, json!(99), CancellationToken::new()).await;
        assert!(matches!(rejected, Err(EngineError::ContextDisposed(_))));
        assert_eq!(ctx.in_flight(), 0);
        assert!(matches!(
            ctx.scope().set("late", json!(1)),
            Err(EngineError::ContextDisposed(_))
        ));
    }

    #[test]
    fn test_validate_message() {
        let ctx = IsolatedContext::new("a", ResourceLimits::default());

        assert!(ctx.validate_message(&message("a", "b", json!("hi"))).is_ok());
        assert!(ctx.validate_message(&message("a", "b", json!(0))).is_ok());

        for content in [Value::Null, json!(""), json!([]), json!({})] {
            let err = ctx.validate_message(&message("a", "b", content)).unwrap_err();
            assert!(matches!(err, EngineError::InvalidMessage(_)));
        }

        assert!(ctx.validate_message(&message("a", "", json!("hi"))).is_err());
        assert!(ctx.validate_message(&message("c", "b", json!("hi"))).is_err());
    }
}
