//! Routes channel events to presence, store and receipts, and drives
//! conversation open/close and resync after reconnects.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use super::delivery::{DeliveryCoordinator, PendingSend};
use super::lock;
use super::presence::{PresenceStatus, PresenceTracker};
use super::receipts::ReadReceiptTracker;
use super::store::{IngestOutcome, LogEntry, MessageStore, Partition};
use crate::api::{ChatApi, OutgoingBody};
use crate::config::SyncSettings;
use crate::error::{Result, SyncError};
use crate::models::{
    Conversation, ConversationId, Message, MessageId, Participant, ParticipantId,
};
use crate::realtime::{ChannelEvent, InboundEvent};

/// Live-delivery scoping on the duplex channel.
pub trait ConversationScope: Send + Sync {
    fn join(&self, conversation: &ConversationId);
    fn leave(&self, conversation: &ConversationId);
}

pub struct SyncEngine {
    me: Participant,
    api: Arc<dyn ChatApi>,
    scope: Arc<dyn ConversationScope>,
    presence: Mutex<PresenceTracker>,
    store: Arc<MessageStore>,
    receipts: ReadReceiptTracker,
    delivery: DeliveryCoordinator,
    directory: Mutex<HashMap<ConversationId, Conversation>>,
    /// Conversations whose log came from a bulk fetch; their unread count is
    /// derived from the log rather than the directory badge.
    loaded: Mutex<HashSet<ConversationId>>,
    active: Mutex<Option<ConversationId>>,
}

impl SyncEngine {
    pub fn new(
        me: Participant,
        api: Arc<dyn ChatApi>,
        scope: Arc<dyn ConversationScope>,
        settings: &SyncSettings,
    ) -> Self {
        let store = Arc::new(MessageStore::new(me.id.clone()));
        let receipts = ReadReceiptTracker::new(
            Arc::clone(&api),
            Arc::clone(&store),
            settings.mark_read_debounce(),
        );
        let delivery = DeliveryCoordinator::new(Arc::clone(&api), Arc::clone(&store), me.clone());

        Self {
            me,
            api,
            scope,
            presence: Mutex::new(PresenceTracker::new()),
            store,
            receipts,
            delivery,
            directory: Mutex::new(HashMap::new()),
            loaded: Mutex::new(HashSet::new()),
            active: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &Participant {
        &self.me
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    pub fn active_conversation(&self) -> Option<ConversationId> {
        lock(&self.active).clone()
    }

    fn is_active(&self, conversation: &ConversationId) -> bool {
        lock(&self.active).as_ref() == Some(conversation)
    }

    // -- Presence --

    pub fn is_online(&self, id: &ParticipantId) -> bool {
        lock(&self.presence).is_online(id)
    }

    pub fn presence(&self, id: &ParticipantId) -> PresenceStatus {
        lock(&self.presence).status(id)
    }

    // -- Conversation directory --

    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>> {
        let fetched = self.api.list_conversations().await?;
        {
            let mut directory = lock(&self.directory);
            directory.clear();
            for conversation in &fetched {
                directory.insert(conversation.id.clone(), conversation.clone());
            }
        }
        Ok(self.conversations())
    }

    /// Known conversations, most recent activity first.
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut list: Vec<Conversation> = lock(&self.directory).values().cloned().collect();
        for conversation in list.iter_mut() {
            conversation.unread_count = self.unread_count(&conversation.id);
        }
        list.sort_by(|a, b| {
            let at = a.last_message.as_ref().map(|m| m.created_at);
            let bt = b.last_message.as_ref().map(|m| m.created_at);
            bt.cmp(&at)
        });
        list
    }

    pub fn unread_count(&self, conversation: &ConversationId) -> u32 {
        if lock(&self.loaded).contains(conversation) {
            return self.store.unread(conversation).len() as u32;
        }
        lock(&self.directory)
            .get(conversation)
            .map_or(0, |c| c.unread_count)
    }

    // -- Conversation lifecycle --

    /// Open `conversation`: join live delivery, load both partitions, and
    /// schedule the debounced mark-as-read.
    pub async fn open_conversation(&self, conversation: &ConversationId) -> Result<Partition> {
        let previous = lock(&self.active).replace(conversation.clone());
        if let Some(previous) = previous.filter(|p| p != conversation) {
            self.receipts.cancel(&previous);
            self.scope.leave(&previous);
        }
        self.scope.join(conversation);

        let partition = self.store.load(self.api.as_ref(), conversation).await?;
        lock(&self.loaded).insert(conversation.clone());

        // The viewer may have left while the fetch was in flight.
        if self.is_active(conversation) {
            self.receipts.schedule(conversation);
        }
        Ok(partition)
    }

    /// Leave `conversation`. Pending mark-as-read is cancelled, in-flight
    /// sends are not.
    pub fn close_conversation(&self, conversation: &ConversationId) {
        {
            let mut active = lock(&self.active);
            if active.as_ref() == Some(conversation) {
                *active = None;
            }
        }
        self.receipts.cancel(conversation);
        self.scope.leave(conversation);
    }

    pub fn messages(&self, conversation: &ConversationId) -> Vec<LogEntry> {
        self.store.entries(conversation)
    }

    pub fn send(&self, conversation: &ConversationId, body: OutgoingBody) -> Result<PendingSend> {
        self.delivery.send(conversation, body)
    }

    /// Mark everything read now, skipping the debounce window, and clear the
    /// conversation's badge.
    pub async fn mark_read(&self, conversation: &ConversationId) -> Vec<MessageId> {
        let loaded = lock(&self.loaded).contains(conversation);
        let flipped = if loaded {
            self.receipts.mark_read(conversation).await
        } else {
            self.receipts.force_mark_read(conversation).await
        };
        if let Some(entry) = lock(&self.directory).get_mut(conversation) {
            entry.unread_count = 0;
        }
        flipped
    }

    // -- Event routing --

    /// Consume channel events until the channel is gone.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<ChannelEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(&event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} channel events, resyncing", missed);
                    self.resync().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub async fn handle_event(&self, event: &ChannelEvent) {
        match event {
            ChannelEvent::Connected { reconnected } => {
                if *reconnected {
                    self.resync().await;
                }
            }
            ChannelEvent::Disconnected { reason } => {
                tracing::debug!("Presence unknown until next snapshot ({})", reason);
                lock(&self.presence).invalidate();
            }
            ChannelEvent::ConnectFailed { reason } => {
                tracing::debug!("Channel still down: {}", reason);
            }
            ChannelEvent::Inbound(inbound) => self.handle_inbound(inbound),
        }
    }

    fn handle_inbound(&self, event: &InboundEvent) {
        match event {
            InboundEvent::OnlineSnapshot(ids) => {
                lock(&self.presence).snapshot(ids.iter().cloned());
            }
            InboundEvent::ParticipantOnline(id) => {
                lock(&self.presence).mark_online(id.clone());
            }
            InboundEvent::ParticipantOffline(id) => {
                lock(&self.presence).mark_offline(id);
            }
            InboundEvent::MessageCreated(message) => self.on_message(message.clone()),
            InboundEvent::MessageRead {
                message_id,
                conversation_id,
            } => match self.receipts.on_read_confirmed(message_id, conversation_id) {
                Ok(_) => {}
                Err(e @ SyncError::StateRegressionRejected { .. }) => {
                    tracing::warn!("Dropped read receipt: {}", e);
                }
                Err(e) => tracing::debug!("Read receipt for unknown message: {}", e),
            },
            InboundEvent::ConversationCreated(conversation) => {
                tracing::info!("New conversation {}", conversation.id);
                lock(&self.directory).insert(conversation.id.clone(), conversation.clone());
            }
        }
    }

    fn on_message(&self, message: Message) {
        let conversation = message.conversation_id.clone();
        let id = message.id.clone();
        let from_counterpart = !message.is_from(&self.me.id);

        match lock(&self.directory).get_mut(&conversation) {
            Some(entry) => entry.last_message = Some(message.clone()),
            None => tracing::debug!("Message {} for unlisted conversation {}", id, conversation),
        }

        let outcome = self.store.ingest(message);
        if outcome != IngestOutcome::Appended || !from_counterpart {
            return;
        }

        if self.is_active(&conversation) {
            self.receipts.mark_arrived(&conversation, &id);
        } else if !lock(&self.loaded).contains(&conversation) {
            if let Some(entry) = lock(&self.directory).get_mut(&conversation) {
                entry.unread_count += 1;
            }
        }
    }

    /// Re-fetch everything the disconnect gap may have invalidated.
    pub async fn resync(&self) {
        match self.refresh_conversations().await {
            Ok(_) => {
                // Only the open conversation is reloaded below; the others go
                // back to the fresh server badge until they are opened again.
                let active = self.active_conversation();
                lock(&self.loaded).retain(|id| Some(id) == active.as_ref());
            }
            Err(e) => tracing::warn!("Conversation refresh failed: {}", e),
        }

        let Some(active) = self.active_conversation() else {
            return;
        };
        match self.store.load(self.api.as_ref(), &active).await {
            Ok(partition) => {
                tracing::info!(
                    "Resynced {} ({} unread)",
                    active,
                    partition.unread.len()
                );
                if self.is_active(&active) {
                    self.receipts.schedule(&active);
                }
            }
            Err(e) => tracing::warn!("Reload of {} failed: {}", active, e),
        }
    }
}
