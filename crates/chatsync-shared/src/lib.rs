//! # chatsync-shared
//!
//! Identifiers, wire payloads and the inbound/outbound event contracts shared
//! by the conversation store and the client session.

pub mod constants;
pub mod conversation;
pub mod error;
pub mod protocol;
pub mod types;

pub use conversation::{
    Conversation, ConversationPatch, Member, SettingField, SettingValue,
};
pub use error::ProtocolError;
pub use protocol::{
    Attachment, ConversationSnapshot, HistoryPage, InboundEvent, OutboundIntent, ReplyPreview,
    SendMessageRequest, SenderInfo, ServerMessage,
};
pub use types::{
    ConversationId, ConversationKind, HistoryFilter, JoinMode, LocalId, MediaKind, MessageId,
    MessagePermission, MessageRef, Role, UserId,
};
