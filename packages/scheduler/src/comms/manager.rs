// packages/scheduler/src/comms/manager.rs
//! Agent communication manager
//!
//! Routes point-to-point and broadcast messages between agents and owns the
//! channel table. Contexts are created when an agent first joins a channel
//! and destroyed when the last channel referencing it is cleaned up.

use crate::comms::channel::{Channel, Message, MessageDraft, MessageKind};
use crate::events::{EngineEvent, EventKind, EventQueue};
use crate::observability::metric_names;
use crate::runtime::concurrency::{ConcurrencyRuntime, SpawnOptions};
use crate::runtime::isolate::{ContextHandle, ContextJob};
use crate::runtime::resource_limiter::ResourceLimits;
use crate::runtime::worker_pool::WorkerPool;
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-agent message handler
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Outcome of a broadcast fan-out
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Messages delivered, one per reached member
    pub delivered: Vec<Message>,

    /// Members the message could not be delivered to
    pub failed: Vec<(String, EngineError)>,
}

impl BroadcastReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Routes messages between agents through named channels
pub struct AgentCommunicationManager {
    pool: Arc<WorkerPool>,
    runtime: Arc<ConcurrencyRuntime>,

    /// Limits for contexts allocated on channel membership
    limits: ResourceLimits,

    channels: Arc<RwLock<HashMap<String, Channel>>>,
    handlers: Arc<DashMap<String, MessageHandler>>,

    /// Runtime envelope for message sends
    message_options: SpawnOptions,

    events: Option<Arc<EventQueue>>,
}

impl AgentCommunicationManager {
    /// Create a manager over an existing pool and runtime
    pub fn new(pool: Arc<WorkerPool>, runtime: Arc<ConcurrencyRuntime>, limits: ResourceLimits) -> Self {
        // A handler must see a message at most once, so sends are never retried
        let message_options = runtime.default_options().with_retries(0);

        Self {
            pool,
            runtime,
            limits,
            channels: Arc::new(RwLock::new(HashMap::new())),
            handlers: Arc::new(DashMap::new()),
            message_options,
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

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Create a channel and allocate a context for every member lacking one.
    ///
    /// All-or-nothing: if any allocation fails, contexts allocated by this
    /// call are freed again and the channel is not created.
    pub async fn create_channel<I, S>(&self, channel_id: &str, member_ids: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.channels.read().contains_key(channel_id) {
            return Err(EngineError::ChannelExists(channel_id.to_string()));
        }

        let channel = Channel::new(channel_id, member_ids.into_iter().map(Into::into));
        let mut allocated = Vec::new();

        for member in &channel.members {
            if self.pool.get(member).is_some() {
                continue;
            }
            match self.pool.allocate(member, self.limits.clone()) {
                Ok(_) => allocated.push(member.clone()),
                Err(e) => {
                    warn!("Channel {} not created: {}", channel_id, e);
                    self.release(&allocated).await;
                    return Err(e);
                }
            }
        }

        {
            let mut channels = self.channels.write();
            if !channels.contains_key(channel_id) {
                info!(
                    "Created channel {} with {} members",
                    channel_id,
                    channel.members.len()
                );
                self.emit(
                    EngineEvent::new(EventKind::ChannelCreated).with_data(serde_json::json!({
                        "channel": channel_id,
                        "members": channel.members,
                    })),
                );
                channels.insert(channel_id.to_string(), channel);
                return Ok(());
            }
        }

        // Lost a race with a concurrent create of the same id
        self.release(&allocated).await;
        Err(EngineError::ChannelExists(channel_id.to_string()))
    }

    async fn release(&self, agent_ids: &[String]) {
        join_all(agent_ids.iter().map(|id| self.pool.free(id))).await;
    }

    /// Send a message from one agent to another.
    ///
    /// Validation runs in the sender's context, then the receiver's handler
    /// (if registered) is awaited, and only then is the message appended to
    /// every channel containing both agents.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<Message> {
        let message = draft.into_message();

        let sender = self
            .pool
            .get(&message.from)
            .ok_or_else(|| EngineError::ContextMissing(message.from.clone()))?;
        if self.pool.get(&message.to).is_none() {
            return Err(EngineError::ContextMissing(message.to.clone()));
        }

        self.runtime
            .spawn(
                |_cancel| {
                    let message = message.clone();
                    let sender = Arc::clone(&sender);
                    let channels = Arc::clone(&self.channels);
                    let handlers = Arc::clone(&self.handlers);

                    async move {
                        sender.validate_message(&message)?;

                        let receiver = handlers.get(&message.to).map(|h| Arc::clone(h.value()));
                        if let Some(receiver) = receiver {
                            receiver(message.clone()).await.map_err(|e| EngineError::HandlerFailed {
                                agent: message.to.clone(),
                                reason: e.to_string(),
                            })?;
                        }

                        {
                            let mut channels = channels.write();
                            for channel in channels
                                .values_mut()
                                .filter(|c| c.routes(&message.from, &message.to))
                            {
                                channel.append(message.clone());
                            }
                        }
                        Ok(())
                    }
                },
                self.message_options.clone(),
            )
            .await?;

        debug!("Delivered message {} {} -> {}", message.id, message.from, message.to);
        metrics::counter!(metric_names::MESSAGES_DELIVERED).increment(1);
        self.emit(
            EngineEvent::new(EventKind::MessageDelivered)
                .with_agent(message.to.as_str())
                .with_data(serde_json::json!({
                    "message_id": message.id,
                    "from": message.from,
                    "kind": message.kind,
                })),
        );

        Ok(message)
    }

    /// Send `content` to every member of `channel_id` except `from`, concurrently.
    ///
    /// Fails only if the channel does not exist; per-member failures are
    /// reported without rolling back deliveries to other members.
    pub async fn broadcast(&self, from: &str, channel_id: &str, content: Value) -> Result<BroadcastReport> {
        let recipients: Vec<String> = {
            let channels = self.channels.read();
            let channel = channels
                .get(channel_id)
                .ok_or_else(|| EngineError::ChannelNotFound(channel_id.to_string()))?;
            channel
                .members
                .iter()
                .filter(|member| member.as_str() != from)
                .cloned()
                .collect()
        };

        let sends = recipients.iter().map(|to| {
            self.send_message(MessageDraft::new(from, to.as_str(), content.clone(), MessageKind::Broadcast))
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (to, result) in recipients.into_iter().zip(results) {
            match result {
                Ok(message) => report.delivered.push(message),
                Err(e) => {
                    warn!("Broadcast from {} to {} failed: {}", from, to, e);
                    report.failed.push((to, e));
                }
            }
        }

        debug!(
            "Broadcast on {}: {} delivered, {} failed",
            channel_id,
            report.delivered.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Register the message handler for `agent_id`, replacing any earlier one
    pub fn register_handler(&self, agent_id: impl Into<String>, handler: MessageHandler) {
        let agent_id = agent_id.into();
        if self.handlers.insert(agent_id.clone(), handler).is_some() {
            debug!("Replaced message handler for {}", agent_id);
        }
    }

    pub fn unregister_handler(&self, agent_id: &str) -> bool {
        self.handlers.remove(agent_id).is_some()
    }

    /// Context for `agent_id`, allocating one if it has none
    pub fn ensure_context(&self, agent_id: &str) -> Result<ContextHandle> {
        self.pool.allocate(agent_id, self.limits.clone())
    }

    /// Tear down the context of `agent_id`
    pub async fn destroy_context(&self, agent_id: &str) {
        self.pool.free(agent_id).await;
    }

    /// Run `job` inside the context of `agent_id` under the concurrency runtime
    pub async fn dispatch(
        &self,
        agent_id: &str,
        job: ContextJob,
        input: Value,
        options: SpawnOptions,
    ) -> Result<Value> {
        let context = self
            .pool
            .get(agent_id)
            .ok_or_else(|| EngineError::ContextMissing(agent_id.to_string()))?;

        self.runtime
            .spawn(
                |cancel| {
                    let context = Arc::clone(&context);
                    let job = Arc::clone(&job);
                    let input = input.clone();
                    async move { context.evaluate(&job, input, cancel).await }
                },
                options,
            )
            .await
    }

    /// Delete a channel and destroy contexts no other channel references
    pub async fn cleanup_channel(&self, channel_id: &str) -> Result<()> {
        let removed = self
            .channels
            .write()
            .remove(channel_id)
            .ok_or_else(|| EngineError::ChannelNotFound(channel_id.to_string()))?;

        let orphaned: Vec<String> = {
            let channels = self.channels.read();
            removed
                .members
                .iter()
                .filter(|member| !channels.values().any(|c| c.contains(member)))
                .cloned()
                .collect()
        };

        info!(
            "Removed channel {} ({} messages), destroying {} orphaned contexts",
            channel_id,
            removed.messages().len(),
            orphaned.len()
        );
        self.release(&orphaned).await;
        self.emit(
            EngineEvent::new(EventKind::ChannelRemoved)
                .with_data(serde_json::json!({ "channel": channel_id, "orphaned": orphaned })),
        );

        Ok(())
    }

    /// Snapshot of a channel
    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.channels.read().get(channel_id).cloned()
    }

    pub fn channel_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.channels.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Message log of a channel
    pub fn messages(&self, channel_id: &str) -> Result<Vec<Message>> {
        self.channels
            .read()
            .get(channel_id)
            .map(|c| c.messages().to_vec())
            .ok_or_else(|| EngineError::ChannelNotFound(channel_id.to_string()))
    }
}
