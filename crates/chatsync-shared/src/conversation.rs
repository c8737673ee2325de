//! Conversation and membership models as delivered by the backend.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DIRECT_MEMBER_COUNT;
use crate::error::ProtocolError;
use crate::types::{ConversationId, ConversationKind, JoinMode, MessagePermission, Role, UserId};

/// A participant of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub uid: UserId,
    /// Group role. Always `None` in direct conversations.
    #[serde(default)]
    pub role: Option<Role>,
    pub joined_at: DateTime<Utc>,
    #[serde(default)]
    pub kicked_by: Option<UserId>,
    #[serde(default)]
    pub kicked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub left_at: Option<DateTime<Utc>>,
}

impl Member {
    pub fn new(uid: UserId, role: Option<Role>, joined_at: DateTime<Utc>) -> Self {
        Self {
            uid,
            role,
            joined_at,
            kicked_by: None,
            kicked_at: None,
            left_at: None,
        }
    }

    /// A kicked or departed member is inactive.
    pub fn is_active(&self) -> bool {
        self.kicked_at.is_none() && self.left_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    #[serde(default)]
    pub name: Option<String>,
    /// Ordered by join, unique by `uid`.
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub message_permission: MessagePermission,
    #[serde(default)]
    pub join_mode: JoinMode,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
    /// Direct conversations only: the peer is blocked.
    #[serde(default)]
    pub blocked: bool,
}

impl Conversation {
    pub fn direct(id: ConversationId, a: Member, b: Member) -> Self {
        Self {
            id,
            kind: ConversationKind::Direct,
            name: None,
            members: vec![a, b],
            message_permission: MessagePermission::All,
            join_mode: JoinMode::Approval,
            counters: BTreeMap::new(),
            blocked: false,
        }
    }

    pub fn group(id: ConversationId, name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            id,
            kind: ConversationKind::Group,
            name: Some(name.into()),
            members,
            message_permission: MessagePermission::All,
            join_mode: JoinMode::Approval,
            counters: BTreeMap::new(),
            blocked: false,
        }
    }

    /// Conversation whose metadata has not been fetched yet.
    pub fn placeholder(id: ConversationId) -> Self {
        Self {
            id,
            kind: ConversationKind::Unknown,
            name: None,
            members: Vec::new(),
            message_permission: MessagePermission::All,
            join_mode: JoinMode::Approval,
            counters: BTreeMap::new(),
            blocked: false,
        }
    }

    pub fn is_group(&self) -> bool {
        self.kind == ConversationKind::Group
    }

    pub fn member(&self, uid: &UserId) -> Option<&Member> {
        self.members.iter().find(|m| &m.uid == uid)
    }

    pub fn member_mut(&mut self, uid: &UserId) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| &m.uid == uid)
    }

    pub fn active_members_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_active()).count()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn bump_counter(&mut self, name: &str) {
        *self.counters.entry(name.to_string()).or_insert(0) += 1;
    }

    /// Check the structural invariants of an authoritative snapshot.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let mut seen = std::collections::HashSet::new();
        for m in &self.members {
            if !seen.insert(&m.uid) {
                return Err(ProtocolError::InvalidConversation(format!(
                    "duplicate member {} in {}",
                    m.uid, self.id
                )));
            }
        }

        match self.kind {
            ConversationKind::Direct => {
                if self.members.len() != DIRECT_MEMBER_COUNT {
                    return Err(ProtocolError::InvalidConversation(format!(
                        "direct conversation {} must have exactly {DIRECT_MEMBER_COUNT} members, got {}",
                        self.id,
                        self.members.len()
                    )));
                }
                if self.members.iter().any(|m| m.role.is_some()) {
                    return Err(ProtocolError::InvalidConversation(format!(
                        "direct conversation {} cannot carry member roles",
                        self.id
                    )));
                }
            }
            ConversationKind::Unknown => {}
            ConversationKind::Group => {
                let owners = self
                    .members
                    .iter()
                    .filter(|m| m.is_active() && m.role == Some(Role::Owner))
                    .count();
                if owners > 1 {
                    return Err(ProtocolError::InvalidConversation(format!(
                        "group {} has {owners} owners",
                        self.id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Shallow patch merged into a stored conversation. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ConversationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Member>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_permission: Option<MessagePermission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_mode: Option<JoinMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counters: Option<BTreeMap<String, u64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
}

impl ConversationPatch {
    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(kind) = self.kind {
            conversation.kind = kind;
        }
        if let Some(ref name) = self.name {
            conversation.name = Some(name.clone());
        }
        if let Some(ref members) = self.members {
            conversation.members = members.clone();
        }
        if let Some(p) = self.message_permission {
            conversation.message_permission = p;
        }
        if let Some(j) = self.join_mode {
            conversation.join_mode = j;
        }
        if let Some(ref counters) = self.counters {
            conversation.counters = counters.clone();
        }
        if let Some(b) = self.blocked {
            conversation.blocked = b;
        }
    }
}

/// Group settings a privileged member can change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SettingField {
    Name,
    MessagePermission,
    JoinMode,
}

/// A single group setting value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Name(Option<String>),
    MessagePermission(MessagePermission),
    JoinMode(JoinMode),
}

impl SettingValue {
    pub fn field(&self) -> SettingField {
        match self {
            Self::Name(_) => SettingField::Name,
            Self::MessagePermission(_) => SettingField::MessagePermission,
            Self::JoinMode(_) => SettingField::JoinMode,
        }
    }

    /// Read the current value of `field` from a conversation.
    pub fn read(conversation: &Conversation, field: SettingField) -> Self {
        match field {
            SettingField::Name => Self::Name(conversation.name.clone()),
            SettingField::MessagePermission => {
                Self::MessagePermission(conversation.message_permission)
            }
            SettingField::JoinMode => Self::JoinMode(conversation.join_mode),
        }
    }

    pub fn write(&self, conversation: &mut Conversation) {
        match self {
            Self::Name(name) => conversation.name = name.clone(),
            Self::MessagePermission(p) => conversation.message_permission = *p,
            Self::JoinMode(j) => conversation.join_mode = *j,
        }
    }
}
