//! Error types for the sync engine and its transports

use thiserror::Error;

use crate::models::{DeliveryState, MessageId, TempId};

/// Failure talking to the authoritative store or the duplex channel.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("401 Unauthorized for {url}. Token may be invalid -- run 'recruit-chat configure --token'.")]
    Unauthorized { url: String },

    #[error("HTTP {status} for {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid base URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the message store, read-receipt tracker and delivery
/// coordinator.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Delivery state for {message_id} would regress from {current} to {attempted}")]
    StateRegressionRejected {
        message_id: MessageId,
        current: DeliveryState,
        attempted: DeliveryState,
    },

    #[error("No optimistic entry {temp_id} left to reconcile")]
    ReconciliationConflict { temp_id: TempId },

    #[error("Unknown optimistic entry {0}")]
    UnknownProvisional(TempId),

    #[error("Optimistic entry {0} already exists")]
    DuplicateProvisional(TempId),

    #[error("Unknown message {0}")]
    UnknownMessage(MessageId),

    #[error("Send task aborted before completion")]
    SendAborted,
}

pub type Result<T> = std::result::Result<T, SyncError>;
