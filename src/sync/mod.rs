//! Conversation synchronization engine
//!
//! Reconciles the bulk fetch, live pushes and optimistic local writes into one
//! ordered log per conversation, and keeps read state and presence current.

pub mod delivery;
pub mod engine;
pub mod presence;
pub mod receipts;
pub mod store;

use std::sync::{Mutex, MutexGuard};

pub use delivery::{DeliveryCoordinator, PendingSend, UPLOAD_PLACEHOLDER};
pub use engine::{ConversationScope, SyncEngine};
pub use presence::{PresenceStatus, PresenceTracker};
pub use receipts::ReadReceiptTracker;
pub use store::{IngestOutcome, LogEntry, MessageStore, Partition, ReconcileOutcome};

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it. Sync state must stay usable after a listener panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
