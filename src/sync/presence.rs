//! Presence tracking for counterpart participants
//!
//! Offline is only ever inferred from an explicit event, never from silence.
//! Until the first snapshot after a (re)connect every identity is `Unknown`.

use std::collections::HashSet;

use crate::models::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Unknown,
    Online,
    Offline,
}

/// Owner of the live online set.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: HashSet<ParticipantId>,
    /// Set once a snapshot has been applied for the current connection.
    synced: bool,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole online set (received once per connect).
    pub fn snapshot(&mut self, ids: impl IntoIterator<Item = ParticipantId>) {
        self.online = ids.into_iter().collect();
        self.synced = true;
        tracing::debug!("Presence snapshot: {} online", self.online.len());
    }

    /// Returns true if the identity was not already online.
    pub fn mark_online(&mut self, id: ParticipantId) -> bool {
        self.online.insert(id)
    }

    /// Returns true if the identity was online.
    pub fn mark_offline(&mut self, id: &ParticipantId) -> bool {
        self.online.remove(id)
    }

    pub fn is_online(&self, id: &ParticipantId) -> bool {
        self.online.contains(id)
    }

    pub fn status(&self, id: &ParticipantId) -> PresenceStatus {
        if self.online.contains(id) {
            PresenceStatus::Online
        } else if self.synced {
            PresenceStatus::Offline
        } else {
            PresenceStatus::Unknown
        }
    }

    /// Forget everything; called when the channel drops.
    pub fn invalidate(&mut self) {
        self.online.clear();
        self.synced = false;
    }

    pub fn online(&self) -> impl Iterator<Item = &ParticipantId> {
        self.online.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ParticipantId {
        ParticipantId::new(s)
    }

    #[test]
    fn test_unknown_until_snapshot() {
        let tracker = PresenceTracker::new();
        assert_eq!(tracker.status(&id("a")), PresenceStatus::Unknown);
        assert!(!tracker.is_online(&id("a")));
    }

    #[test]
    fn test_snapshot_replaces_set() {
        let mut tracker = PresenceTracker::new();
        tracker.mark_online(id("stale"));
        tracker.snapshot(vec![id("a"), id("b")]);
        assert!(tracker.is_online(&id("a")));
        assert!(tracker.is_online(&id("b")));
        assert_eq!(tracker.status(&id("stale")), PresenceStatus::Offline);
    }

    #[test]
    fn test_join_leave_idempotent() {
        let mut tracker = PresenceTracker::new();
        tracker.snapshot(Vec::new());
        assert!(tracker.mark_online(id("a")));
        assert!(!tracker.mark_online(id("a")));
        assert!(tracker.is_online(&id("a")));
        assert!(tracker.mark_offline(&id("a")));
        assert!(!tracker.mark_offline(&id("a")));
        assert_eq!(tracker.status(&id("a")), PresenceStatus::Offline);
    }

    #[test]
    fn test_invalidate_goes_unknown() {
        let mut tracker = PresenceTracker::new();
        tracker.snapshot(vec![id("a")]);
        tracker.invalidate();
        assert_eq!(tracker.status(&id("a")), PresenceStatus::Unknown);
        assert_eq!(tracker.online().count(), 0);
    }
}
