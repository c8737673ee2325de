use thiserror::Error;

use chatsync_store::StoreError;

/// Failures reported by a [`Transport`](crate::transport::Transport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    /// The backend understood the request and refused it.
    #[error("Rejected ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Transport closed")]
    Closed,

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// Errors surfaced by [`Session`](crate::session::Session) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The request never reached the backend or its answer was lost.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The backend rejected a change that was shown optimistically; it has
    /// been rolled back.
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Rejected { message, .. } => ClientError::Conflict(message),
            other => ClientError::TransportFailure(other.to_string()),
        }
    }
}

impl ClientError {
    /// Whether the local state was not found, the non-fatal case callers
    /// usually ignore.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::Store(StoreError::ConversationNotFound(_))
                | ClientError::Store(StoreError::MessageNotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
