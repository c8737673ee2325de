use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::conversation::{Conversation, ConversationPatch, SettingValue};
use crate::error::ProtocolError;
use crate::types::{
    ConversationId, HistoryFilter, LocalId, MediaKind, MessageId, Role, UserId,
};

/// Sender identity plus the display fields denormalized onto each message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    pub uid: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl SenderInfo {
    pub fn new(uid: UserId) -> Self {
        Self {
            uid,
            display_name: None,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub kind: MediaKind,
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Denormalized preview of the message being replied to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPreview {
    pub message_id: MessageId,
    pub sender: SenderInfo,
    /// Snapshot of the content at reply time; empty once the original is recalled.
    pub content: String,
    #[serde(default)]
    pub is_recalled: bool,
}

/// Authoritative message record as delivered by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: SenderInfo,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub reply_to: Option<ReplyPreview>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_recalled: bool,
    #[serde(default)]
    pub recalled_at: Option<DateTime<Utc>>,
    /// Emoji -> users who reacted with it
    #[serde(default)]
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

/// One page of backward history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub messages: Vec<ServerMessage>,
    pub has_more: bool,
}

/// Full conversation state fetched on open or after a reconnect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    #[serde(default)]
    pub recent_messages: Vec<ServerMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecalled {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub recalled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub content: String,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReactionUpdated {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceiptEvent {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub user_uid: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub conversation_id: ConversationId,
    pub user_uid: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdated {
    pub conversation_id: ConversationId,
    #[serde(flatten)]
    pub patch: ConversationPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberKicked {
    pub conversation_id: ConversationId,
    pub uid: UserId,
    #[serde(default)]
    pub kicked_by: Option<UserId>,
    pub kicked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberLeft {
    pub conversation_id: ConversationId,
    pub uid: UserId,
    pub left_at: DateTime<Utc>,
}

/// Events pushed by the realtime transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum InboundEvent {
    #[serde(rename = "message:new")]
    MessageNew(ServerMessage),

    #[serde(rename = "message:recalled")]
    MessageRecalled(MessageRecalled),

    #[serde(rename = "message:edited")]
    MessageEdited(MessageEdited),

    #[serde(rename = "reaction:updated")]
    ReactionUpdated(ReactionUpdated),

    #[serde(rename = "read:receipt")]
    ReadReceipt(ReadReceiptEvent),

    #[serde(rename = "typing:update")]
    TypingUpdate(TypingUpdate),

    #[serde(rename = "group:updated")]
    GroupUpdated(GroupUpdated),

    #[serde(rename = "member:kicked")]
    MemberKicked(MemberKicked),

    #[serde(rename = "member:left")]
    MemberLeft(MemberLeft),
}

impl InboundEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::MessageNew(m) => &m.conversation_id,
            Self::MessageRecalled(e) => &e.conversation_id,
            Self::MessageEdited(e) => &e.conversation_id,
            Self::ReactionUpdated(e) => &e.conversation_id,
            Self::ReadReceipt(e) => &e.conversation_id,
            Self::TypingUpdate(e) => &e.conversation_id,
            Self::GroupUpdated(e) => &e.conversation_id,
            Self::MemberKicked(e) => &e.conversation_id,
            Self::MemberLeft(e) => &e.conversation_id,
        }
    }

    /// Wire tag of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MessageNew(_) => EVENT_MESSAGE_NEW,
            Self::MessageRecalled(_) => EVENT_MESSAGE_RECALLED,
            Self::MessageEdited(_) => EVENT_MESSAGE_EDITED,
            Self::ReactionUpdated(_) => EVENT_REACTION_UPDATED,
            Self::ReadReceipt(_) => EVENT_READ_RECEIPT,
            Self::TypingUpdate(_) => EVENT_TYPING_UPDATE,
            Self::GroupUpdated(_) => EVENT_GROUP_UPDATED,
            Self::MemberKicked(_) => EVENT_MEMBER_KICKED,
            Self::MemberLeft(_) => EVENT_MEMBER_LEFT,
        }
    }

    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Payload of a `sendMessage` intent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    /// Echoed back so acks can be matched to the optimistic entry.
    pub client_ref: LocalId,
    pub content: String,
    #[serde(default)]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub reply_to_id: Option<MessageId>,
}

/// Requests sent to the backend over REST or the realtime transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "intent", rename_all = "camelCase")]
pub enum OutboundIntent {
    SendMessage(SendMessageRequest),
    #[serde(rename_all = "camelCase")]
    SetTyping {
        conversation_id: ConversationId,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    MarkRead {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    #[serde(rename_all = "camelCase")]
    UpdateGroupSettings {
        conversation_id: ConversationId,
        changes: Vec<SettingValue>,
    },
    #[serde(rename_all = "camelCase")]
    KickMember {
        conversation_id: ConversationId,
        uid: UserId,
    },
    #[serde(rename_all = "camelCase")]
    ChangeRole {
        conversation_id: ConversationId,
        uid: UserId,
        role: Role,
    },
    #[serde(rename_all = "camelCase")]
    LeaveGroup { conversation_id: ConversationId },
    #[serde(rename_all = "camelCase")]
    FetchHistory {
        conversation_id: ConversationId,
        filter: HistoryFilter,
        #[serde(default)]
        before: Option<MessageId>,
        limit: u16,
    },
    #[serde(rename_all = "camelCase")]
    FetchConversation { conversation_id: ConversationId },
}

impl OutboundIntent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::SendMessage(request) => &request.conversation_id,
            Self::SetTyping {
                conversation_id, ..
            }
            | Self::MarkRead {
                conversation_id, ..
            }
            | Self::UpdateGroupSettings {
                conversation_id, ..
            }
            | Self::KickMember {
                conversation_id, ..
            }
            | Self::ChangeRole {
                conversation_id, ..
            }
            | Self::LeaveGroup { conversation_id }
            | Self::FetchHistory {
                conversation_id, ..
            }
            | Self::FetchConversation { conversation_id } => conversation_id,
        }
    }
}

/// Clamp a requested page size to `1..=MAX_PAGE_SIZE`.
pub fn bounded_page_size(requested: u16) -> u16 {
    requested.clamp(1, MAX_PAGE_SIZE)
}
