// packages/scheduler/src/comms/mod.rs
//! Agent communication
//!
//! Messages travel between agents' isolated contexts and are logged in
//! every channel whose membership contains both endpoints.
//!
//! ```text
//! send_message(from → to)
//!   ├─ validate in sender's context
//!   ├─ await receiver handler
//!   └─ append to channels ⊇ {from, to}
//!
//! broadcast(from, channel) ── send_message × (members − from), concurrently
//! ```

pub mod channel;
pub mod manager;

pub use channel::{Channel, Message, MessageDraft, MessageKind};
pub use manager::{handler, AgentCommunicationManager, BroadcastReport, MessageHandler};
