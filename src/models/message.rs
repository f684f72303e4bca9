//! Message-related models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ConversationId, Participant, ParticipantId, Role};

/// Durable message identifier (assigned by the authoritative store)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session-local identifier for an optimistic message.
///
/// Lives in its own type so it can never be confused with a [`MessageId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TempId(u64);

impl TempId {
    pub fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn seq(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tmp-{}", self.0)
    }
}

/// Identity of an entry in a conversation log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageRef {
    /// Optimistic entry, durable id not yet known
    Provisional(TempId),
    /// Entry confirmed by the authoritative store
    Durable(MessageId),
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRef::Provisional(t) => t.fmt(f),
            MessageRef::Durable(id) => id.fmt(f),
        }
    }
}

/// Message payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
        }
    }

    pub fn is_binary(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "file" => Ok(MessageKind::File),
            other => Err(format!("Unknown message kind: {}. Use: text, image, file", other)),
        }
    }
}

/// Delivery lifecycle: `sent -> delivered -> read`.
///
/// Variants are declared in lifecycle order so the derived `Ord` is the
/// transition order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    #[default]
    Sent,
    Delivered,
    Read,
}

/// Result of merging a delivery state into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advanced,
    Unchanged,
    /// The update would have lowered the state; nothing was written.
    Rejected,
}

impl DeliveryState {
    /// Merge `next` into `self`, only ever moving forward.
    pub fn advance(&mut self, next: DeliveryState) -> Transition {
        if next > *self {
            *self = next;
            Transition::Advanced
        } else if next == *self {
            Transition::Unchanged
        } else {
            Transition::Rejected
        }
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeliveryState::Sent => "sent",
            DeliveryState::Delivered => "delivered",
            DeliveryState::Read => "read",
        };
        f.write_str(s)
    }
}

/// A durable message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: ParticipantId,
    pub sender_role: Role,
    /// Text body, or an opaque reference for image/file payloads
    pub content: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_from(&self, participant: &ParticipantId) -> bool {
        &self.sender_id == participant
    }
}

/// Client-local shadow of a message whose durable id is not known yet
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticMessage {
    pub temp_id: TempId,
    pub conversation_id: ConversationId,
    pub sender_id: ParticipantId,
    pub sender_role: Role,
    pub content: String,
    pub kind: MessageKind,
    pub state: DeliveryState,
    pub created_at: DateTime<Utc>,
}

impl OptimisticMessage {
    pub fn new(
        temp_id: TempId,
        conversation_id: ConversationId,
        sender: &Participant,
        content: String,
        kind: MessageKind,
    ) -> Self {
        Self {
            temp_id,
            conversation_id,
            sender_id: sender.id.clone(),
            sender_role: sender.role,
            content,
            kind,
            state: DeliveryState::Sent,
            created_at: Utc::now(),
        }
    }

    /// Whether a pushed durable message is the echo of this optimistic send.
    pub fn matches_echo(&self, message: &Message) -> bool {
        self.conversation_id == message.conversation_id
            && self.sender_id == message.sender_id
            && self.kind == message.kind
            && self.content == message.content
    }
}
