use thiserror::Error;

use chatsync_shared::{ConversationId, MessageRef, ProtocolError};

/// Errors produced by the store layer.
///
/// Expected absence on read paths is expressed with `Option`, not with
/// these variants; they are returned by operations that cannot proceed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The referenced conversation is not held locally.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// The referenced message is not held locally.
    #[error("Message not found: {0}")]
    MessageNotFound(MessageRef),

    /// Caller passed something that can never succeed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The viewer's derived capabilities do not allow the action.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The backend rejected a change that was applied optimistically.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A newer local intent for the same field superseded this one.
    #[error("Superseded by a newer local change")]
    StaleWrite,
}

impl From<ProtocolError> for StoreError {
    fn from(e: ProtocolError) -> Self {
        StoreError::InvalidArgument(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
