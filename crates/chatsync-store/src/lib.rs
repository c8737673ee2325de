//! # chatsync-store
//!
//! In-memory conversation state for a realtime chat client.
//!
//! The crate exposes a synchronous [`ConversationStore`] that holds server
//! truth plus local optimistic state: conversations and members, message
//! timelines, read receipts, reply targets, typing indicators, history
//! cursors and pending settings writes. Each concern lives in its own module
//! as an `impl ConversationStore` block. The store performs no I/O; the
//! client crate drives it from network results.

pub mod coalesce;
pub mod config;
pub mod events;
pub mod members;
pub mod messages;
pub mod models;
pub mod observers;
pub mod pagination;
pub mod permissions;
pub mod reactions;
pub mod receipts;
pub mod replies;
pub mod settings;
pub mod store;
pub mod timeline;
pub mod typing;

mod error;

pub use coalesce::{IntentLedger, IntentToken};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use messages::{ConfirmOutcome, IngestOutcome};
pub use models::*;
pub use observers::{StoreChange, SubscriptionToken};
pub use pagination::{BeginLoad, CursorState, PageRequest, PrependOutcome};
pub use permissions::{derive, MembershipStatus, PermissionSet};
pub use settings::SettleOutcome;
pub use store::{ConversationStore, SnapshotOutcome};
