use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = opaque backend uid, stable across sessions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(uid: impl Into<String>) -> Self {
        Self(uid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-assigned identifier of a message the server has not confirmed yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct LocalId(pub Uuid);

impl LocalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LocalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LocalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The one authoritative identity of a message at any given time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum MessageRef {
    Local(LocalId),
    Remote(MessageId),
}

impl MessageRef {
    pub fn local_id(&self) -> Option<LocalId> {
        match self {
            Self::Local(id) => Some(*id),
            Self::Remote(_) => None,
        }
    }

    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::Local(_) => None,
            Self::Remote(id) => Some(id),
        }
    }
}

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{id}"),
            Self::Remote(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
    /// Metadata not fetched yet. Never sent by the server.
    #[serde(skip_deserializing)]
    Unknown,
}

/// Group role. Ordered so that `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    Owner,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessagePermission {
    #[default]
    All,
    AdminsOnly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Approval,
    Link,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    File,
    Link,
}

impl MediaKind {
    /// Name of the conversation counter tracking this kind of media.
    pub fn counter_name(self) -> &'static str {
        use crate::constants::*;
        match self {
            Self::Image => COUNTER_SHARED_IMAGES,
            Self::Video => COUNTER_SHARED_VIDEOS,
            Self::File => COUNTER_SHARED_FILES,
            Self::Link => COUNTER_SHARED_LINKS,
        }
    }
}

/// Which slice of a conversation's history a pagination cursor walks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HistoryFilter {
    /// The main message timeline.
    All,
    /// A media gallery restricted to one kind of attachment.
    Media(MediaKind),
}

impl std::fmt::Display for HistoryFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Media(MediaKind::Image) => write!(f, "image"),
            Self::Media(MediaKind::Video) => write!(f, "video"),
            Self::Media(MediaKind::File) => write!(f, "file"),
            Self::Media(MediaKind::Link) => write!(f, "link"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Member);
    }

    #[test]
    fn test_history_filter_display() {
        assert_eq!(HistoryFilter::All.to_string(), "all");
        assert_eq!(HistoryFilter::Media(MediaKind::Link).to_string(), "link");
    }

    #[test]
    fn test_message_ref_accessors() {
        let local = MessageRef::Local(LocalId::new());
        assert!(local.local_id().is_some());
        assert!(local.message_id().is_none());

        let remote = MessageRef::Remote(MessageId::new("m1"));
        assert_eq!(remote.message_id().map(MessageId::as_str), Some("m1"));
        assert_eq!(remote.to_string(), "m1");
    }

    #[test]
    fn test_unknown_kind_is_never_read_from_the_wire() {
        assert!(serde_json::from_str::<ConversationKind>(r#""unknown""#).is_err());
        assert_eq!(
            serde_json::from_str::<ConversationKind>(r#""group""#).unwrap(),
            ConversationKind::Group
        );
    }
}
