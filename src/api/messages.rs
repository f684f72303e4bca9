//! Message endpoints: fetch, send, mark-read

use reqwest::multipart::{Form, Part};
use serde_json::json;

use super::client::{decode, ChatClient};
use super::{OutgoingBody, OutgoingMessage};
use crate::error::TransportError;
use crate::models::{ConversationId, Message, MessageId};

impl ChatClient {
    /// `GET conversation/{id}/messages`
    pub async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, TransportError> {
        self.get_json(&["conversation", conversation.as_str(), "messages"])
            .await
    }

    /// `GET conversation/{id}/unread-messages`
    pub async fn unread_messages(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Message>, TransportError> {
        self.get_json(&["conversation", conversation.as_str(), "unread-messages"])
            .await
    }

    /// `POST conversation/{id}/messages`
    ///
    /// Text goes out as JSON, attachments as `multipart/form-data` with a
    /// `file` part.
    pub async fn post_message(
        &self,
        conversation: &ConversationId,
        message: &OutgoingMessage,
    ) -> Result<Message, TransportError> {
        let path = ["conversation", conversation.as_str(), "messages"];

        let resp = match message.body {
            OutgoingBody::Text(ref content) => {
                let body = json!({
                    "content": content,
                    "kind": "text",
                    "sender_id": message.sender.id,
                    "sender_role": message.sender.role,
                });
                self.post_json(&path, &body).await?
            }
            OutgoingBody::Attachment {
                kind,
                ref file_name,
                ref bytes,
            } => {
                let part = Part::bytes(bytes.clone()).file_name(file_name.clone());
                let form = Form::new()
                    .text("kind", kind.as_str())
                    .text("sender_id", message.sender.id.to_string())
                    .text("sender_role", message.sender.role.as_str())
                    .part("file", part);
                self.post_multipart(&path, form).await?
            }
        };

        let stored: Message = decode(resp).await?;
        tracing::debug!("Message {} stored in {}", stored.id, conversation);
        Ok(stored)
    }

    /// `POST conversation/{id}/mark-read`
    pub async fn post_mark_read(
        &self,
        conversation: &ConversationId,
        message: Option<&MessageId>,
    ) -> Result<(), TransportError> {
        let path = ["conversation", conversation.as_str(), "mark-read"];
        let body = match message {
            Some(id) => json!({ "message_id": id }),
            None => json!({}),
        };
        self.post_json(&path, &body).await?;
        Ok(())
    }
}
