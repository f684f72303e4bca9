//! Read-receipt tracking
//!
//! Opening a conversation schedules one batch mark-as-read write after a
//! debounce window. Leaving cancels it. Messages pushed while the viewer is
//! already present skip the window and are marked read one by one.
//!
//! Local read flips are never rolled back. A failed write is logged, not
//! retried; if the next load still lists flipped messages as unread, the
//! next batch re-issues the write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

use super::lock;
use super::store::MessageStore;
use crate::api::ChatApi;
use crate::error::Result;
use crate::models::{ConversationId, DeliveryState, MessageId, Transition};

struct PendingBatch {
    generation: u64,
    handle: AbortHandle,
}

pub struct ReadReceiptTracker {
    api: Arc<dyn ChatApi>,
    store: Arc<MessageStore>,
    debounce: Duration,
    pending: Arc<Mutex<HashMap<ConversationId, PendingBatch>>>,
    generation: AtomicU64,
}

impl ReadReceiptTracker {
    pub fn new(api: Arc<dyn ChatApi>, store: Arc<MessageStore>, debounce: Duration) -> Self {
        Self {
            api,
            store,
            debounce,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Schedule the batch write for `conversation` after the debounce window.
    ///
    /// Replaces any batch already pending for it, so repeated opens coalesce.
    pub fn schedule(&self, conversation: &ConversationId) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let api = Arc::clone(&self.api);
        let store = Arc::clone(&self.store);
        let pending = Arc::clone(&self.pending);
        let debounce = self.debounce;
        let conv = conversation.clone();

        // Hold the map lock across spawn so the task cannot observe the map
        // before its own entry is in it.
        let mut map = lock(&self.pending);
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            {
                let mut map = lock(&pending);
                // Replaced or cancelled while waking up.
                if map.get(&conv).map(|p| p.generation) != Some(generation) {
                    return;
                }
                map.remove(&conv);
            }
            flush(api.as_ref(), &store, &conv, false).await;
        });

        if let Some(old) = map.insert(
            conversation.clone(),
            PendingBatch {
                generation,
                handle: task.abort_handle(),
            },
        ) {
            old.handle.abort();
        }
        tracing::debug!(
            "Mark-as-read for {} scheduled in {:?}",
            conversation,
            self.debounce
        );
    }

    /// Cancel a pending batch. Returns true if one was pending.
    pub fn cancel(&self, conversation: &ConversationId) -> bool {
        match lock(&self.pending).remove(conversation) {
            Some(batch) => {
                batch.handle.abort();
                tracing::debug!("Mark-as-read for {} cancelled", conversation);
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, conversation: &ConversationId) -> bool {
        lock(&self.pending).contains_key(conversation)
    }

    /// Mark every unread message in `conversation` read right now.
    pub async fn mark_read(&self, conversation: &ConversationId) -> Vec<MessageId> {
        self.cancel(conversation);
        flush(self.api.as_ref(), &self.store, conversation, false).await
    }

    /// Like [`mark_read`](Self::mark_read), but always writes. For
    /// conversations whose log was never loaded, where the local view cannot
    /// tell what the server still counts as unread.
    pub async fn force_mark_read(&self, conversation: &ConversationId) -> Vec<MessageId> {
        self.cancel(conversation);
        flush(self.api.as_ref(), &self.store, conversation, true).await
    }

    /// Fast path for a message pushed into a conversation the viewer has open.
    pub fn mark_arrived(&self, conversation: &ConversationId, message: &MessageId) {
        match self
            .store
            .apply_state(conversation, message, DeliveryState::Read)
        {
            Ok(Transition::Advanced) => {}
            Ok(_) => return,
            Err(e) => {
                tracing::debug!("Skipping read mark for {}: {}", message, e);
                return;
            }
        }

        let api = Arc::clone(&self.api);
        let conv = conversation.clone();
        let id = message.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(&conv, Some(&id)).await {
                tracing::warn!("Failed to mark {} read in {}: {}", id, conv, e);
            }
        });
    }

    /// The counterpart read one of our messages.
    pub fn on_read_confirmed(
        &self,
        message: &MessageId,
        conversation: &ConversationId,
    ) -> Result<Transition> {
        let transition = self
            .store
            .apply_state(conversation, message, DeliveryState::Read)?;
        if transition == Transition::Advanced {
            tracing::debug!("{} read by counterpart", message);
        }
        Ok(transition)
    }
}

impl Drop for ReadReceiptTracker {
    fn drop(&mut self) {
        for (_, batch) in lock(&self.pending).drain() {
            batch.handle.abort();
        }
    }
}

/// Flip all unread messages locally, then issue one batch write.
///
/// The write is skipped only when nothing flipped and the last fetch showed
/// no earlier flip still unconfirmed by the server.
async fn flush(
    api: &dyn ChatApi,
    store: &MessageStore,
    conversation: &ConversationId,
    force: bool,
) -> Vec<MessageId> {
    let flipped = store.mark_all_read(conversation);
    let owed = store.take_read_owed(conversation);
    if flipped.is_empty() && !owed && !force {
        tracing::debug!("Nothing unread in {}", conversation);
        return flipped;
    }

    tracing::info!("Marking {} messages read in {}", flipped.len(), conversation);
    if let Err(e) = api.mark_read(conversation, None).await {
        tracing::warn!("Mark-as-read write for {} failed: {}", conversation, e);
    }
    flipped
}
