// packages/scheduler/src/comms/channel.rs
//! Channels and messages
//!
//! A channel is a named membership set with an append-only message log.
//! Messages are immutable once created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use ulid::Ulid;

/// Message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Broadcast,
}

/// Routed message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Sending agent
    pub from: String,

    /// Receiving agent
    pub to: String,

    /// Opaque payload
    pub content: serde_json::Value,

    pub kind: MessageKind,

    /// Assigned when the message is sent
    pub timestamp: DateTime<Utc>,
}

/// Message as submitted by a caller, before id and timestamp are assigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDraft {
    pub from: String,
    pub to: String,
    pub content: serde_json::Value,
    pub kind: MessageKind,
}

impl MessageDraft {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        content: serde_json::Value,
        kind: MessageKind,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            content,
            kind,
        }
    }

    pub fn request(from: impl Into<String>, to: impl Into<String>, content: serde_json::Value) -> Self {
        Self::new(from, to, content, MessageKind::Request)
    }

    /// Stamp the draft with a fresh id and the current time
    pub fn into_message(self) -> Message {
        Message {
            id: Ulid::new().to_string(),
            from: self.from,
            to: self.to,
            content: self.content,
            kind: self.kind,
            timestamp: Utc::now(),
        }
    }
}

/// Message routing group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,

    /// Member agent ids (ordered for deterministic fan-out)
    pub members: BTreeSet<String>,

    /// Append-only message log
    messages: Vec<Message>,

    pub created_at: DateTime<Utc>,
}

impl Channel {
    pub fn new(id: impl Into<String>, members: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.into(),
            members: members.into_iter().collect(),
            messages: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.members.contains(agent_id)
    }

    /// Whether a message between `from` and `to` belongs in this channel
    pub fn routes(&self, from: &str, to: &str) -> bool {
        self.contains(from) && self.contains(to)
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}
