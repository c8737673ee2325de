//! Local domain models held by the [`ConversationStore`](crate::ConversationStore).
//!
//! Every struct derives `Serialize` so read-only snapshots can be handed
//! directly to a UI layer.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chatsync_shared::{
    Attachment, Conversation, ConversationId, LocalId, MessageId, MessageRef, ReplyPreview,
    SenderInfo, ServerMessage, UserId,
};

use crate::permissions::PermissionSet;

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Optimistically inserted, waiting for the server ack.
    Pending,
    /// Confirmed by the server.
    Sent,
    /// Transport error or timeout; kept visible for a manual retry.
    Failed,
}

/// A message as displayed in a conversation timeline.
///
/// `reference` is `Local` exactly while the message is `Pending` or
/// `Failed`, and `Remote` once the server has assigned a `messageId`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub reference: MessageRef,
    pub conversation_id: ConversationId,
    pub sender: SenderInfo,
    /// Empty once the message is recalled.
    pub content: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub failure_reason: Option<String>,
    pub is_recalled: bool,
    pub recalled_at: Option<DateTime<Utc>>,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to: Option<ReplyPreview>,
    pub reactions: BTreeMap<String, Vec<UserId>>,
}

impl Message {
    pub(crate) fn pending(
        local_id: LocalId,
        conversation_id: ConversationId,
        sender: SenderInfo,
        draft: Draft,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference: MessageRef::Local(local_id),
            conversation_id,
            sender,
            content: draft.content,
            attachment: draft.attachment,
            created_at,
            status: DeliveryStatus::Pending,
            failure_reason: None,
            is_recalled: false,
            recalled_at: None,
            edited_at: None,
            reply_to: draft.reply_to,
            reactions: BTreeMap::new(),
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        self.reference.message_id()
    }

    pub fn local_id(&self) -> Option<LocalId> {
        self.reference.local_id()
    }

    /// Text a UI may render. `None` for recalled messages.
    pub fn display_content(&self) -> Option<&str> {
        if self.is_recalled {
            None
        } else {
            Some(&self.content)
        }
    }

    pub fn is_from(&self, uid: &UserId) -> bool {
        &self.sender.uid == uid
    }

    pub(crate) fn tombstone(&mut self, recalled_at: DateTime<Utc>) {
        self.is_recalled = true;
        self.recalled_at = Some(recalled_at);
        self.content.clear();
        self.attachment = None;
        self.reactions.clear();
    }

    /// Rebuild the draft this message was sent from.
    pub(crate) fn to_draft(&self) -> Draft {
        Draft {
            content: self.content.clone(),
            attachment: self.attachment.clone(),
            reply_to: self.reply_to.clone(),
        }
    }
}

impl From<ServerMessage> for Message {
    fn from(m: ServerMessage) -> Self {
        let mut message = Self {
            reference: MessageRef::Remote(m.message_id),
            conversation_id: m.conversation_id,
            sender: m.sender,
            content: m.content,
            attachment: m.attachment,
            created_at: m.created_at,
            status: DeliveryStatus::Sent,
            failure_reason: None,
            is_recalled: false,
            recalled_at: None,
            edited_at: m.edited_at,
            reply_to: m.reply_to,
            reactions: m.reactions,
        };
        if m.is_recalled {
            message.tombstone(m.recalled_at.unwrap_or(m.created_at));
        }
        message
    }
}

// ---------------------------------------------------------------------------
// Draft
// ---------------------------------------------------------------------------

/// What the user typed, before it becomes a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub content: String,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<ReplyPreview>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
            reply_to: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.attachment.is_none()
    }
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_uid: UserId,
    pub message_id: MessageId,
    pub read_at: DateTime<Utc>,
}

/// How far a user has read, by send time of the message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadMarker {
    pub message_id: MessageId,
    pub message_created_at: DateTime<Utc>,
    pub read_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reply target
// ---------------------------------------------------------------------------

/// The message the user is currently composing a reply to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTarget {
    pub message_id: MessageId,
    pub sender: SenderInfo,
    /// Content at the time the reply was selected.
    pub content: String,
}

impl ReplyTarget {
    pub fn to_preview(&self) -> ReplyPreview {
        ReplyPreview {
            message_id: self.message_id.clone(),
            sender: self.sender.clone(),
            content: self.content.clone(),
            is_recalled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only view
// ---------------------------------------------------------------------------

/// Everything a UI needs to render one conversation, detached from the store.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub conversation: Conversation,
    /// Metadata was never fetched or predates the last reconnect.
    pub stale: bool,
    pub unread_count: u64,
    pub active_members_count: usize,
    pub messages: Vec<Message>,
    pub reply_target: Option<ReplyTarget>,
    pub typing: Vec<UserId>,
    pub permissions: PermissionSet,
}
