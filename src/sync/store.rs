//! Ordered, deduplicated per-conversation message log
//!
//! Three sources feed a log: the bulk fetch on open, live pushes, and local
//! optimistic sends. Entries are never re-sorted; position is fixed when an
//! entry is first inserted and reconciliation swaps in place.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::api::ChatApi;
use crate::error::{Result, SyncError};
use crate::models::{
    ConversationId, DeliveryState, Message, MessageId, MessageRef, OptimisticMessage,
    ParticipantId, TempId, Transition,
};

use super::lock;

/// One visible entry of a conversation log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Durable(Message),
    Provisional(OptimisticMessage),
}

impl LogEntry {
    pub fn reference(&self) -> MessageRef {
        match self {
            LogEntry::Durable(m) => MessageRef::Durable(m.id.clone()),
            LogEntry::Provisional(p) => MessageRef::Provisional(p.temp_id),
        }
    }

    pub fn sender_id(&self) -> &ParticipantId {
        match self {
            LogEntry::Durable(m) => &m.sender_id,
            LogEntry::Provisional(p) => &p.sender_id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            LogEntry::Durable(m) => &m.content,
            LogEntry::Provisional(p) => &p.content,
        }
    }

    pub fn state(&self) -> DeliveryState {
        match self {
            LogEntry::Durable(m) => m.state,
            LogEntry::Provisional(p) => p.state,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            LogEntry::Durable(m) => Some(m),
            LogEntry::Provisional(_) => None,
        }
    }

    fn is_durable(&self, id: &MessageId) -> bool {
        matches!(self, LogEntry::Durable(m) if &m.id == id)
    }

    fn is_provisional(&self, temp_id: TempId) -> bool {
        matches!(self, LogEntry::Provisional(p) if p.temp_id == temp_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New message appended at the end of the log.
    Appended,
    /// Already present; delivery state merged.
    Duplicate,
    /// Push echo of our own pending send; swapped into the optimistic slot.
    EchoReconciled(TempId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Optimistic entry replaced in place.
    Replaced,
    /// The durable message was already in the log (push echo won the race).
    AlreadyPresent,
    /// The optimistic slot was taken by an identical send's echo; appended.
    Appended,
}

/// Read/unread split of a fetched conversation.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub read: Vec<Message>,
    pub unread: Vec<Message>,
}

/// Ordered log of a single conversation.
#[derive(Debug, Default)]
pub struct ConversationLog {
    entries: Vec<LogEntry>,
    /// Optimistic entries already swapped by a push echo, and the durable id
    /// that took their slot.
    claimed: HashMap<TempId, MessageId>,
    /// The last fetch listed as unread messages we already flipped read
    /// locally; the server still needs a mark-as-read write.
    read_owed: bool,
}

impl ConversationLog {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Whether a mark-as-read write is owed to the server; clears the flag.
    pub fn take_read_owed(&mut self) -> bool {
        std::mem::take(&mut self.read_owed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().filter_map(LogEntry::as_message)
    }

    pub fn position(&self, reference: &MessageRef) -> Option<usize> {
        match reference {
            MessageRef::Durable(id) => self.durable_position(id),
            MessageRef::Provisional(t) => self.provisional_position(*t),
        }
    }

    fn durable_position(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.is_durable(id))
    }

    fn provisional_position(&self, temp_id: TempId) -> Option<usize> {
        self.entries.iter().position(|e| e.is_provisional(temp_id))
    }

    /// Oldest optimistic entry that `message` is the echo of.
    fn pending_echo(&self, message: &Message) -> Option<(usize, TempId)> {
        self.entries.iter().enumerate().find_map(|(i, e)| match e {
            LogEntry::Provisional(p) if p.matches_echo(message) => Some((i, p.temp_id)),
            _ => None,
        })
    }

    fn merge_state_at(&mut self, pos: usize, state: DeliveryState) -> Transition {
        match self.entries[pos] {
            LogEntry::Durable(ref mut m) => m.state.advance(state),
            LogEntry::Provisional(ref mut p) => p.state.advance(state),
        }
    }

    /// Merge a live-pushed durable message.
    pub fn ingest(&mut self, message: Message, viewer: &ParticipantId) -> IngestOutcome {
        if let Some(pos) = self.durable_position(&message.id) {
            if self.merge_state_at(pos, message.state) == Transition::Rejected {
                tracing::debug!(
                    "Duplicate push of {} carried older state {}, ignored",
                    message.id,
                    message.state
                );
            }
            return IngestOutcome::Duplicate;
        }

        if message.is_from(viewer) {
            if let Some((pos, temp_id)) = self.pending_echo(&message) {
                let mut message = message;
                message.state.advance(self.entries[pos].state());
                self.claimed.insert(temp_id, message.id.clone());
                self.entries[pos] = LogEntry::Durable(message);
                return IngestOutcome::EchoReconciled(temp_id);
            }
        }

        self.entries.push(LogEntry::Durable(message));
        IngestOutcome::Appended
    }

    /// Append an optimistic entry. Insertion order is its ordering key.
    pub fn push_provisional(&mut self, message: OptimisticMessage) -> Result<()> {
        if self.provisional_position(message.temp_id).is_some()
            || self.claimed.contains_key(&message.temp_id)
        {
            return Err(SyncError::DuplicateProvisional(message.temp_id));
        }
        self.entries.push(LogEntry::Provisional(message));
        Ok(())
    }

    /// Swap the optimistic entry `temp_id` for its durable message.
    pub fn reconcile(&mut self, temp_id: TempId, mut message: Message) -> Result<ReconcileOutcome> {
        let provisional = self.provisional_position(temp_id);
        let durable = self.durable_position(&message.id);

        match (provisional, durable) {
            (Some(pos), None) => {
                message.state.advance(self.entries[pos].state());
                self.entries[pos] = LogEntry::Durable(message);
                Ok(ReconcileOutcome::Replaced)
            }
            (Some(mut pos), Some(dup)) => {
                // The echo was appended before we could match it; pull it back
                // into the slot fixed at send time.
                let existing = self.entries.remove(dup);
                if dup < pos {
                    pos -= 1;
                }
                message.state.advance(existing.state());
                message.state.advance(self.entries[pos].state());
                self.entries[pos] = LogEntry::Durable(message);
                Ok(ReconcileOutcome::AlreadyPresent)
            }
            (None, Some(pos)) => {
                self.claimed.remove(&temp_id);
                self.merge_state_at(pos, message.state);
                Ok(ReconcileOutcome::AlreadyPresent)
            }
            (None, None) => {
                if self.claimed.remove(&temp_id).is_none() {
                    return Err(SyncError::ReconciliationConflict { temp_id });
                }
                // An identical send's echo took our slot; that send's own
                // optimistic entry, if still pending, becomes ours.
                match self.pending_echo(&message) {
                    Some((pos, sibling)) => {
                        self.claimed.insert(sibling, message.id.clone());
                        self.entries[pos] = LogEntry::Durable(message);
                        Ok(ReconcileOutcome::Replaced)
                    }
                    None => {
                        self.entries.push(LogEntry::Durable(message));
                        Ok(ReconcileOutcome::Appended)
                    }
                }
            }
        }
    }

    /// Remove an optimistic entry entirely.
    pub fn rollback(&mut self, temp_id: TempId) -> Result<OptimisticMessage> {
        let pos = self
            .provisional_position(temp_id)
            .ok_or(SyncError::UnknownProvisional(temp_id))?;
        match self.entries.remove(pos) {
            LogEntry::Provisional(p) => Ok(p),
            LogEntry::Durable(_) => Err(SyncError::UnknownProvisional(temp_id)),
        }
    }

    /// Monotonic delivery-state update for a durable message.
    pub fn apply_state(&mut self, id: &MessageId, state: DeliveryState) -> Result<Transition> {
        let pos = self
            .durable_position(id)
            .ok_or_else(|| SyncError::UnknownMessage(id.clone()))?;
        let current = self.entries[pos].state();
        match self.merge_state_at(pos, state) {
            Transition::Rejected => Err(SyncError::StateRegressionRejected {
                message_id: id.clone(),
                current,
                attempted: state,
            }),
            other => Ok(other),
        }
    }

    /// Counterpart messages not yet flagged read.
    pub fn unread(&self, viewer: &ParticipantId) -> Vec<&Message> {
        self.messages()
            .filter(|m| !m.is_from(viewer) && m.state < DeliveryState::Read)
            .collect()
    }

    /// Flip every unread counterpart message to read; returns the ids flipped.
    pub fn mark_all_read(&mut self, viewer: &ParticipantId) -> Vec<MessageId> {
        let mut flipped = Vec::new();
        for entry in self.entries.iter_mut() {
            if let LogEntry::Durable(ref mut m) = entry {
                if !m.is_from(viewer) && m.state.advance(DeliveryState::Read) == Transition::Advanced
                {
                    flipped.push(m.id.clone());
                }
            }
        }
        flipped
    }

    /// Merge a bulk fetch into the live log.
    ///
    /// Fetched messages come first in server order, then messages only seen
    /// live (arrival order), then pending optimistic entries. The returned
    /// partition covers exactly the fetched set.
    pub fn merge_fetched(
        &mut self,
        all: Vec<Message>,
        unread: Vec<Message>,
        viewer: &ParticipantId,
    ) -> Partition {
        let fetched: HashSet<MessageId> = all.iter().map(|m| m.id.clone()).collect();
        let unread_ids: HashSet<MessageId> = unread
            .into_iter()
            .filter_map(|m| {
                if fetched.contains(&m.id) {
                    Some(m.id)
                } else {
                    tracing::warn!("Unread message {} missing from full fetch, ignored", m.id);
                    None
                }
            })
            .collect();

        let previous = std::mem::take(&mut self.entries);
        let known: HashMap<&MessageId, DeliveryState> = previous
            .iter()
            .filter_map(LogEntry::as_message)
            .map(|m| (&m.id, m.state))
            .collect();

        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(all.len() + previous.len());
        let mut partition = Partition::default();
        let mut read_owed = false;

        for mut message in all {
            if !seen.insert(message.id.clone()) {
                continue;
            }
            let is_unread = unread_ids.contains(&message.id);
            if !is_unread && !message.is_from(viewer) {
                message.state.advance(DeliveryState::Read);
            }
            if let Some(local) = known.get(&message.id) {
                if message.state.advance(*local) == Transition::Advanced {
                    tracing::debug!("Kept newer local state {} for {}", local, message.id);
                }
            }
            if is_unread {
                read_owed |= message.state == DeliveryState::Read && !message.is_from(viewer);
                partition.unread.push(message.clone());
            } else {
                partition.read.push(message.clone());
            }
            entries.push(LogEntry::Durable(message));
        }

        let mut live_only = Vec::new();
        let mut pending = Vec::new();
        for entry in previous {
            match entry {
                LogEntry::Durable(ref m) if fetched.contains(&m.id) => {}
                LogEntry::Durable(_) => live_only.push(entry),
                LogEntry::Provisional(_) => pending.push(entry),
            }
        }
        entries.extend(live_only);
        entries.extend(pending);
        self.entries = entries;
        self.read_owed = read_owed;

        partition
    }
}

/// Registry of conversation logs, one lock per conversation.
pub struct MessageStore {
    viewer: ParticipantId,
    logs: Mutex<HashMap<ConversationId, Arc<Mutex<ConversationLog>>>>,
    /// Which conversation each pending optimistic entry lives in.
    provisional: Mutex<HashMap<TempId, ConversationId>>,
}

impl MessageStore {
    pub fn new(viewer: ParticipantId) -> Self {
        Self {
            viewer,
            logs: Mutex::new(HashMap::new()),
            provisional: Mutex::new(HashMap::new()),
        }
    }

    pub fn viewer(&self) -> &ParticipantId {
        &self.viewer
    }

    /// The log for `conversation`, created empty on first use.
    pub fn log(&self, conversation: &ConversationId) -> Arc<Mutex<ConversationLog>> {
        let mut logs = lock(&self.logs);
        Arc::clone(logs.entry(conversation.clone()).or_default())
    }

    /// Fetch "all" and "unread" concurrently, merge, and split read/unread.
    pub async fn load(&self, api: &dyn ChatApi, conversation: &ConversationId) -> Result<Partition> {
        let (all, unread) = tokio::try_join!(
            api.fetch_messages(conversation),
            api.fetch_unread(conversation)
        )?;
        tracing::debug!(
            "Loaded {}: {} messages, {} unread",
            conversation,
            all.len(),
            unread.len()
        );

        let log = self.log(conversation);
        let mut log = lock(&log);
        Ok(log.merge_fetched(all, unread, &self.viewer))
    }

    pub fn ingest(&self, message: Message) -> IngestOutcome {
        let log = self.log(&message.conversation_id);
        let mut log = lock(&log);
        log.ingest(message, &self.viewer)
    }

    pub fn ingest_optimistic(&self, message: OptimisticMessage) -> Result<()> {
        let temp_id = message.temp_id;
        let conversation = message.conversation_id.clone();
        {
            let log = self.log(&conversation);
            let mut log = lock(&log);
            log.push_provisional(message)?;
        }
        lock(&self.provisional).insert(temp_id, conversation);
        Ok(())
    }

    pub fn reconcile(&self, temp_id: TempId, message: Message) -> Result<ReconcileOutcome> {
        let conversation = lock(&self.provisional)
            .remove(&temp_id)
            .ok_or(SyncError::ReconciliationConflict { temp_id })?;
        if conversation != message.conversation_id {
            tracing::warn!(
                "Durable message {} belongs to {}, optimistic entry {} to {}",
                message.id,
                message.conversation_id,
                temp_id,
                conversation
            );
        }
        let log = self.log(&conversation);
        let mut log = lock(&log);
        log.reconcile(temp_id, message)
    }

    pub fn rollback(&self, temp_id: TempId) -> Result<OptimisticMessage> {
        let conversation = lock(&self.provisional)
            .remove(&temp_id)
            .ok_or(SyncError::UnknownProvisional(temp_id))?;
        let log = self.log(&conversation);
        let mut log = lock(&log);
        log.rollback(temp_id)
    }

    pub fn apply_state(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        state: DeliveryState,
    ) -> Result<Transition> {
        let log = self.log(conversation);
        let mut log = lock(&log);
        log.apply_state(id, state)
    }

    pub fn unread(&self, conversation: &ConversationId) -> Vec<Message> {
        let log = self.log(conversation);
        let log = lock(&log);
        log.unread(&self.viewer).into_iter().cloned().collect()
    }

    pub fn mark_all_read(&self, conversation: &ConversationId) -> Vec<MessageId> {
        let log = self.log(conversation);
        let mut log = lock(&log);
        log.mark_all_read(&self.viewer)
    }

    pub fn take_read_owed(&self, conversation: &ConversationId) -> bool {
        let log = self.log(conversation);
        let mut log = lock(&log);
        log.take_read_owed()
    }

    /// Copy of the visible sequence.
    pub fn entries(&self, conversation: &ConversationId) -> Vec<LogEntry> {
        let log = self.log(conversation);
        let log = lock(&log);
        log.entries().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fake::{message, FakeChatApi};
    use crate::models::{MessageKind, Participant, Role};

    fn me() -> ParticipantId {
        ParticipantId::new("rec-1")
    }

    fn optimistic(seq: u64, content: &str) -> OptimisticMessage {
        OptimisticMessage::new(
            TempId::new(seq),
            ConversationId::new("c1"),
            &Participant::new("rec-1", Role::Recruiter),
            content.to_string(),
            MessageKind::Text,
        )
    }

    fn refs(log: &ConversationLog) -> Vec<String> {
        log.entries().iter().map(|e| e.reference().to_string()).collect()
    }

    #[test]
    fn test_duplicate_push_is_idempotent() {
        let mut log = ConversationLog::default();
        let m = message("m1", "c1", "cand-1", "hi");
        assert_eq!(log.ingest(m.clone(), &me()), IngestOutcome::Appended);
        assert_eq!(log.ingest(m, &me()), IngestOutcome::Duplicate);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_out_of_order_states_never_regress() {
        let mut log = ConversationLog::default();
        let m = message("m1", "c1", "cand-1", "hi");
        let id = m.id.clone();
        log.ingest(m, &me());

        assert_eq!(
            log.apply_state(&id, DeliveryState::Read).unwrap(),
            Transition::Advanced
        );
        let err = log.apply_state(&id, DeliveryState::Delivered).unwrap_err();
        assert!(matches!(err, SyncError::StateRegressionRejected { .. }));
        assert_eq!(log.messages().next().unwrap().state, DeliveryState::Read);
    }

    #[test]
    fn test_duplicate_push_with_older_state_keeps_newer() {
        let mut log = ConversationLog::default();
        let mut m = message("m1", "c1", "cand-1", "hi");
        m.state = DeliveryState::Read;
        log.ingest(m.clone(), &me());
        m.state = DeliveryState::Sent;
        log.ingest(m, &me());
        assert_eq!(log.messages().next().unwrap().state, DeliveryState::Read);
    }

    #[test]
    fn test_reconcile_preserves_position() {
        let mut log = ConversationLog::default();
        log.push_provisional(optimistic(1, "A")).unwrap();
        log.push_provisional(optimistic(2, "B")).unwrap();
        log.push_provisional(optimistic(3, "C")).unwrap();

        log.reconcile(TempId::new(2), message("b", "c1", "rec-1", "B"))
            .unwrap();
        log.reconcile(TempId::new(1), message("a", "c1", "rec-1", "A"))
            .unwrap();
        log.reconcile(TempId::new(3), message("c", "c1", "rec-1", "C"))
            .unwrap();

        assert_eq!(refs(&log), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_rollback_leaves_no_residue() {
        let mut log = ConversationLog::default();
        log.push_provisional(optimistic(1, "A")).unwrap();
        log.push_provisional(optimistic(2, "B")).unwrap();

        let removed = log.rollback(TempId::new(1)).unwrap();
        assert_eq!(removed.content, "A");
        assert_eq!(refs(&log), vec!["tmp-2"]);

        assert!(matches!(
            log.rollback(TempId::new(1)),
            Err(SyncError::UnknownProvisional(_))
        ));
        assert!(matches!(
            log.reconcile(TempId::new(1), message("a", "c1", "rec-1", "A")),
            Err(SyncError::ReconciliationConflict { .. })
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_duplicate_provisional_rejected() {
        let mut log = ConversationLog::default();
        log.push_provisional(optimistic(1, "A")).unwrap();
        assert!(matches!(
            log.push_provisional(optimistic(1, "A")),
            Err(SyncError::DuplicateProvisional(_))
        ));
    }

    #[test]
    fn test_echo_before_response_reconciles_once() {
        let mut log = ConversationLog::default();
        log.push_provisional(optimistic(1, "hello")).unwrap();
        log.ingest(message("x", "c1", "cand-1", "yo"), &me());

        let echo = message("m9", "c1", "rec-1", "hello");
        assert_eq!(
            log.ingest(echo.clone(), &me()),
            IngestOutcome::EchoReconciled(TempId::new(1))
        );
        assert_eq!(refs(&log), vec!["m9", "x"]);

        assert_eq!(
            log.reconcile(TempId::new(1), echo).unwrap(),
            ReconcileOutcome::AlreadyPresent
        );
        assert_eq!(refs(&log), vec!["m9", "x"]);
    }

    #[test]
    fn test_unmatched_echo_pulled_back_on_reconcile() {
        let mut log = ConversationLog::default();
        let mut pending = optimistic(1, "uploading");
        pending.kind = MessageKind::File;
        log.push_provisional(pending).unwrap();
        log.ingest(message("x", "c1", "cand-1", "yo"), &me());

        let mut stored = message("f1", "c1", "rec-1", "files/cv.pdf");
        stored.kind = MessageKind::File;
        assert_eq!(log.ingest(stored.clone(), &me()), IngestOutcome::Appended);
        assert_eq!(refs(&log), vec!["tmp-1", "x", "f1"]);

        assert_eq!(
            log.reconcile(TempId::new(1), stored).unwrap(),
            ReconcileOutcome::AlreadyPresent
        );
        assert_eq!(refs(&log), vec!["f1", "x"]);
    }

    #[test]
    fn test_own_message_from_other_device_appended() {
        let mut log = ConversationLog::default();
        let outcome = log.ingest(message("m1", "c1", "rec-1", "from phone"), &me());
        assert_eq!(outcome, IngestOutcome::Appended);
    }

    #[test]
    fn test_identical_sends_swap_without_loss() {
        let mut log = ConversationLog::default();
        log.push_provisional(optimistic(1, "ok")).unwrap();
        log.push_provisional(optimistic(2, "ok")).unwrap();

        // Echo of the second send claims the first optimistic slot.
        log.ingest(message("s2", "c1", "rec-1", "ok"), &me());
        log.reconcile(TempId::new(1), message("s1", "c1", "rec-1", "ok"))
            .unwrap();
        log.reconcile(TempId::new(2), message("s2", "c1", "rec-1", "ok"))
            .unwrap();

        let ids: HashSet<String> = log.messages().map(|m| m.id.to_string()).collect();
        assert_eq!(log.len(), 2);
        assert!(ids.contains("s1") && ids.contains("s2"));
    }

    #[test]
    fn test_partition_disjoint_and_complete() {
        let mut log = ConversationLog::default();
        let all = vec![
            message("m1", "c1", "cand-1", "a"),
            message("m2", "c1", "rec-1", "b"),
            message("m3", "c1", "cand-1", "c"),
            message("m4", "c1", "cand-1", "d"),
        ];
        // Server partition overlaps nothing we did not fetch except "ghost".
        let unread = vec![
            message("m3", "c1", "cand-1", "c"),
            message("m4", "c1", "cand-1", "d"),
            message("ghost", "c1", "cand-1", "?"),
        ];
        let partition = log.merge_fetched(all, unread, &me());

        let read: HashSet<_> = partition.read.iter().map(|m| m.id.clone()).collect();
        let unread: HashSet<_> = partition.unread.iter().map(|m| m.id.clone()).collect();
        assert!(read.is_disjoint(&unread));
        let union: HashSet<String> = read.union(&unread).map(|id| id.to_string()).collect();
        let expected: HashSet<String> = ["m1", "m2", "m3", "m4"].iter().map(|s| s.to_string()).collect();
        assert_eq!(union, expected);

        let unread_now: Vec<_> = log.unread(&me()).iter().map(|m| m.id.to_string()).collect();
        assert_eq!(unread_now, vec!["m3", "m4"]);
        assert!(!log.take_read_owed());
    }

    #[test]
    fn test_reload_keeps_live_and_pending_entries() {
        let mut log = ConversationLog::default();
        log.ingest(message("m1", "c1", "cand-1", "a"), &me());
        log.ingest(message("live", "c1", "cand-1", "pushed"), &me());
        log.push_provisional(optimistic(1, "sending")).unwrap();
        log.apply_state(&MessageId::new("m1"), DeliveryState::Read)
            .unwrap();

        log.merge_fetched(
            vec![message("m0", "c1", "cand-1", "z"), message("m1", "c1", "cand-1", "a")],
            vec![message("m1", "c1", "cand-1", "a")],
            &me(),
        );

        assert_eq!(refs(&log), vec!["m0", "m1", "live", "tmp-1"]);
        let m1 = log.messages().find(|m| m.id.as_str() == "m1").unwrap();
        assert_eq!(m1.state, DeliveryState::Read);
        // Server still lists m1 unread: a write is owed, once.
        assert!(log.take_read_owed());
        assert!(!log.take_read_owed());
    }

    #[tokio::test]
    async fn test_store_load_fetches_both_partitions() {
        let api = FakeChatApi::new();
        let conv = ConversationId::new("c1");
        api.seed(
            &conv,
            vec![message("m1", "c1", "cand-1", "a"), message("m2", "c1", "cand-1", "b")],
            vec![message("m2", "c1", "cand-1", "b")],
        );

        let store = MessageStore::new(me());
        let partition = store.load(&api, &conv).await.unwrap();
        assert_eq!(partition.read.len(), 1);
        assert_eq!(partition.unread.len(), 1);
        assert_eq!(partition.read[0].state, DeliveryState::Read);
        assert_eq!(store.unread(&conv).len(), 1);
    }

    #[test]
    fn test_store_rollback_then_reconcile_is_conflict() {
        let store = MessageStore::new(me());
        store.ingest_optimistic(optimistic(5, "x")).unwrap();
        store.rollback(TempId::new(5)).unwrap();

        assert!(store.entries(&ConversationId::new("c1")).is_empty());
        assert!(matches!(
            store.rollback(TempId::new(5)),
            Err(SyncError::UnknownProvisional(_))
        ));
        assert!(matches!(
            store.reconcile(TempId::new(5), message("m", "c1", "rec-1", "x")),
            Err(SyncError::ReconciliationConflict { .. })
        ));
    }
}
