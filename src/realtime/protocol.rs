//! Event vocabulary of the duplex channel
//!
//! Every frame is a JSON text frame: `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

use crate::models::{Conversation, ConversationId, Message, MessageId, ParticipantId};

/// Events this client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Routes future events to this session.
    Identify(ParticipantId),
    JoinConversation(ConversationId),
    LeaveConversation(ConversationId),
    Heartbeat,
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    OnlineSnapshot(Vec<ParticipantId>),
    ParticipantOnline(ParticipantId),
    ParticipantOffline(ParticipantId),
    MessageCreated(Message),
    MessageRead {
        message_id: MessageId,
        conversation_id: ConversationId,
    },
    ConversationCreated(Conversation),
}

/// Everything a listener can observe: pushed events plus local lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected { reconnected: bool },
    /// An established session ended.
    Disconnected { reason: String },
    /// A connect attempt failed before the socket opened.
    ConnectFailed { reason: String },
    Inbound(InboundEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    ConnectFailed,
    OnlineSnapshot,
    ParticipantOnline,
    ParticipantOffline,
    MessageCreated,
    MessageRead,
    ConversationCreated,
}

impl ChannelEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ChannelEvent::Connected { .. } => EventKind::Connected,
            ChannelEvent::Disconnected { .. } => EventKind::Disconnected,
            ChannelEvent::ConnectFailed { .. } => EventKind::ConnectFailed,
            ChannelEvent::Inbound(event) => match event {
                InboundEvent::OnlineSnapshot(_) => EventKind::OnlineSnapshot,
                InboundEvent::ParticipantOnline(_) => EventKind::ParticipantOnline,
                InboundEvent::ParticipantOffline(_) => EventKind::ParticipantOffline,
                InboundEvent::MessageCreated(_) => EventKind::MessageCreated,
                InboundEvent::MessageRead { .. } => EventKind::MessageRead,
                InboundEvent::ConversationCreated(_) => EventKind::ConversationCreated,
            },
        }
    }
}

/// Parse an inbound text frame. Unknown or malformed frames yield `None`.
pub fn parse_frame(text: &str) -> Option<InboundEvent> {
    match serde_json::from_str::<InboundEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            let name = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("event").and_then(|n| n.as_str()).map(String::from));
            match name {
                Some(name) => tracing::debug!("Ignoring event {}: {}", name, e),
                None => tracing::warn!("Malformed frame ignored: {}", e),
            }
            None
        }
    }
}
