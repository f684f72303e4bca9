//! In-memory `ChatApi` that records every call.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::{ChatApi, OutgoingBody, OutgoingMessage};
use crate::error::TransportError;
use crate::models::{
    Conversation, ConversationId, DeliveryState, Message, MessageId, MessageKind, ParticipantId,
    Role,
};

#[derive(Default)]
pub(crate) struct FakeChatApi {
    pub conversations: Mutex<Vec<Conversation>>,
    pub messages: Mutex<HashMap<ConversationId, Vec<Message>>>,
    pub unread: Mutex<HashMap<ConversationId, Vec<Message>>>,
    pub sent: Mutex<Vec<(ConversationId, OutgoingMessage)>>,
    pub mark_reads: Mutex<Vec<(ConversationId, Option<MessageId>)>>,
    pub fail_sends: AtomicBool,
    pub fail_mark_read: AtomicBool,
    next_id: AtomicU64,
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, conversation: &ConversationId, all: Vec<Message>, unread: Vec<Message>) {
        self.messages
            .lock()
            .unwrap()
            .insert(conversation.clone(), all);
        self.unread
            .lock()
            .unwrap()
            .insert(conversation.clone(), unread);
    }

    pub fn mark_read_calls(&self) -> Vec<(ConversationId, Option<MessageId>)> {
        self.mark_reads.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

/// Durable message fixture.
pub(crate) fn message(id: &str, conversation: &str, sender: &str, content: &str) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation),
        sender_id: ParticipantId::new(sender),
        sender_role: if sender.starts_with("rec") {
            Role::Recruiter
        } else {
            Role::Candidate
        },
        content: content.to_string(),
        kind: MessageKind::Text,
        state: DeliveryState::Delivered,
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        Ok(self.conversations.lock().unwrap().clone())
    }

    async fn fetch_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, TransportError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_unread(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, TransportError> {
        Ok(self
            .unread
            .lock()
            .unwrap()
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> Result<Message, TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((conversation.clone(), message.clone()));

        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 503,
                url: "fake".to_string(),
                body: "unavailable".to_string(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let content = match message.body {
            OutgoingBody::Text(ref text) => text.clone(),
            OutgoingBody::Attachment { ref file_name, .. } => format!("files/{}", file_name),
        };
        Ok(Message {
            id: MessageId::new(format!("srv-{}", n)),
            conversation_id: conversation.clone(),
            sender_id: message.sender.id.clone(),
            sender_role: message.sender.role,
            content,
            kind: message.body.kind(),
            state: DeliveryState::Sent,
            created_at: Utc::now(),
        })
    }

    async fn mark_read(
        &self,
        conversation: &ConversationId,
        message: Option<&MessageId>,
    ) -> Result<(), TransportError> {
        self.mark_reads
            .lock()
            .unwrap()
            .push((conversation.clone(), message.cloned()));

        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(TransportError::Channel("mark-read rejected".to_string()));
        }
        Ok(())
    }
}
