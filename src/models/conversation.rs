//! Conversation-related models

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Message, Participant, ParticipantId};

/// Conversation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Two-party conversation scoped to a job application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participant_a: Participant,
    pub participant_b: Participant,
    /// Job application this conversation belongs to
    pub context_id: String,
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Unread count for the viewing participant
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The other participant, if `me` takes part in this conversation.
    pub fn counterpart(&self, me: &ParticipantId) -> Option<&Participant> {
        if &self.participant_a.id == me {
            Some(&self.participant_b)
        } else if &self.participant_b.id == me {
            Some(&self.participant_a)
        } else {
            None
        }
    }
}
