//! Request/response fallback for the messaging service
//!
//! The sync engine talks to the authoritative store only through [`ChatApi`],
//! so the live transport and the REST path can be swapped or faked.

pub mod client;
mod conversations;
mod messages;

#[cfg(test)]
pub(crate) mod fake;

use std::path::Path;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::models::{Conversation, ConversationId, Message, MessageId, MessageKind, Participant};

pub use client::ChatClient;

/// Body of an outbound message.
#[derive(Debug, Clone)]
pub enum OutgoingBody {
    Text(String),
    /// Binary payload uploaded as multipart; the stored message carries an
    /// opaque reference to it.
    Attachment {
        kind: MessageKind,
        file_name: String,
        bytes: Vec<u8>,
    },
}

impl OutgoingBody {
    pub fn kind(&self) -> MessageKind {
        match self {
            OutgoingBody::Text(_) => MessageKind::Text,
            OutgoingBody::Attachment { kind, .. } => *kind,
        }
    }

    /// Read `path` into an attachment body.
    pub async fn attachment(path: &Path, kind: MessageKind) -> Result<Self, TransportError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no usable file name", path.display()),
                )
            })?
            .to_string();
        let bytes = tokio::fs::read(path).await?;
        Ok(OutgoingBody::Attachment {
            kind,
            file_name,
            bytes,
        })
    }
}

/// A message about to be written to the authoritative store.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub sender: Participant,
    pub body: OutgoingBody,
}

/// Contract of the authoritative store.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// `GET conversations`
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError>;

    /// `GET conversation/{id}/messages`, oldest first
    async fn fetch_messages(&self, conversation: &ConversationId)
        -> Result<Vec<Message>, TransportError>;

    /// `GET conversation/{id}/unread-messages`
    async fn fetch_unread(&self, conversation: &ConversationId)
        -> Result<Vec<Message>, TransportError>;

    /// `POST conversation/{id}/messages`
    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> Result<Message, TransportError>;

    /// `POST conversation/{id}/mark-read`; `None` marks every message read.
    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message: Option<&MessageId>,
    ) -> Result<(), TransportError>;
}
