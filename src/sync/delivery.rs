//! Outbound sends: optimistic entry, durable write, reconcile or roll back.
//!
//! The durable write runs on its own task, so a send keeps going after the
//! caller stops waiting or leaves the conversation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use super::store::MessageStore;
use crate::api::{ChatApi, OutgoingBody, OutgoingMessage};
use crate::error::{Result, SyncError};
use crate::models::{ConversationId, Message, OptimisticMessage, Participant, TempId};

/// Content shown for an image/file send until the upload is stored.
pub const UPLOAD_PLACEHOLDER: &str = "uploading";

/// A send in flight. The optimistic entry is already visible in the store.
pub struct PendingSend {
    pub optimistic: OptimisticMessage,
    task: JoinHandle<Result<Message>>,
}

impl PendingSend {
    pub fn temp_id(&self) -> TempId {
        self.optimistic.temp_id
    }

    /// Wait for the durable write. On error the optimistic entry is gone.
    pub async fn outcome(self) -> Result<Message> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Send task for {} did not finish: {}", self.optimistic.temp_id, e);
                Err(SyncError::SendAborted)
            }
        }
    }
}

pub struct DeliveryCoordinator {
    api: Arc<dyn ChatApi>,
    store: Arc<MessageStore>,
    sender: Participant,
    next_temp: AtomicU64,
}

impl DeliveryCoordinator {
    pub fn new(api: Arc<dyn ChatApi>, store: Arc<MessageStore>, sender: Participant) -> Self {
        Self {
            api,
            store,
            sender,
            next_temp: AtomicU64::new(0),
        }
    }

    fn next_temp_id(&self) -> TempId {
        TempId::new(self.next_temp.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Start a send. Returns once the optimistic entry is in the log.
    pub fn send(&self, conversation: &ConversationId, body: OutgoingBody) -> Result<PendingSend> {
        let temp_id = self.next_temp_id();
        let content = match body {
            OutgoingBody::Text(ref text) => text.clone(),
            OutgoingBody::Attachment { .. } => UPLOAD_PLACEHOLDER.to_string(),
        };
        let optimistic = OptimisticMessage::new(
            temp_id,
            conversation.clone(),
            &self.sender,
            content,
            body.kind(),
        );
        self.store.ingest_optimistic(optimistic.clone())?;
        tracing::debug!("Optimistic {} visible in {}", temp_id, conversation);

        let outgoing = OutgoingMessage {
            sender: self.sender.clone(),
            body,
        };
        let task = tokio::spawn(deliver(
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            conversation.clone(),
            temp_id,
            outgoing,
        ));

        Ok(PendingSend { optimistic, task })
    }
}

async fn deliver(
    api: Arc<dyn ChatApi>,
    store: Arc<MessageStore>,
    conversation: ConversationId,
    temp_id: TempId,
    outgoing: OutgoingMessage,
) -> Result<Message> {
    match api.send_message(&conversation, &outgoing).await {
        Ok(message) => {
            match store.reconcile(temp_id, message.clone()) {
                Ok(outcome) => {
                    tracing::debug!("{} reconciled as {} ({:?})", temp_id, message.id, outcome);
                }
                Err(SyncError::ReconciliationConflict { .. }) => {
                    tracing::debug!("{} no longer in the log, {} discarded", temp_id, message.id);
                }
                Err(e) => {
                    tracing::warn!("Reconciling {} failed: {}", temp_id, e);
                }
            }
            Ok(message)
        }
        Err(e) => {
            tracing::warn!("Send to {} failed: {}", conversation, e);
            if let Err(rollback) = store.rollback(temp_id) {
                tracing::debug!("Rollback of {}: {}", temp_id, rollback);
            }
            Err(e.into())
        }
    }
}
