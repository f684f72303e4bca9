//! Conversation directory endpoint

use super::client::ChatClient;
use crate::error::TransportError;
use crate::models::Conversation;

impl ChatClient {
    /// `GET conversations`
    pub async fn conversations(&self) -> Result<Vec<Conversation>, TransportError> {
        let conversations: Vec<Conversation> = self.get_json(&["conversations"]).await?;
        tracing::debug!("Fetched {} conversations", conversations.len());
        Ok(conversations)
    }
}
