//! Recruit Chat - real-time conversation sync between recruiters and candidates
//!
//! Keeps a local view of conversations consistent with the authoritative
//! store: presence, ordered message logs, optimistic sends and read receipts.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod realtime;
pub mod sync;
