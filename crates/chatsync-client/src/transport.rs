//! The seam between the session and whatever carries requests to the
//! backend (REST, a socket, an in-process channel).

use async_trait::async_trait;

use chatsync_shared::{
    ConversationId, ConversationSnapshot, HistoryFilter, HistoryPage, MessageId, Role,
    SendMessageRequest, ServerMessage, SettingValue, UserId,
};

use crate::error::TransportError;

/// Outbound intents, each resolving to success or a typed failure.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message; resolves to the server's authoritative record.
    async fn send_message(&self, request: SendMessageRequest) -> Result<ServerMessage, TransportError>;

    async fn set_typing(&self, conversation_id: &ConversationId, is_typing: bool) -> Result<(), TransportError>;

    async fn mark_read(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<(), TransportError>;

    async fn update_group_settings(
        &self,
        conversation_id: &ConversationId,
        changes: Vec<SettingValue>,
    ) -> Result<(), TransportError>;

    async fn kick_member(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<(), TransportError>;

    async fn change_role(&self, conversation_id: &ConversationId, uid: &UserId, role: Role) -> Result<(), TransportError>;

    async fn leave_group(&self, conversation_id: &ConversationId) -> Result<(), TransportError>;

    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        filter: HistoryFilter,
        before: Option<MessageId>,
        limit: u16,
    ) -> Result<HistoryPage, TransportError>;

    /// Authoritative state of one conversation, used on open and on resync.
    async fn fetch_conversation(&self, conversation_id: &ConversationId) -> Result<ConversationSnapshot, TransportError>;
}
