//! Viewer capabilities derived from a conversation snapshot.
//!
//! Pure functions over `Conversation`; nothing here is cached, every read
//! recomputes.

use serde::Serialize;

use chatsync_shared::{
    Conversation, ConversationId, ConversationKind, MessagePermission, Role, UserId,
};

use crate::store::ConversationStore;

/// Where a user stands in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    NotMember,
    Active(Role),
    Kicked,
    Left,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSet {
    pub can_send_message: bool,
    pub can_kick: bool,
    pub can_change_role: bool,
    pub can_update_settings: bool,
    pub can_leave: bool,
}

impl PermissionSet {
    pub fn none() -> Self {
        Self::default()
    }
}

pub fn membership_status(conversation: &Conversation, uid: &UserId) -> MembershipStatus {
    match conversation.member(uid) {
        None => MembershipStatus::NotMember,
        Some(m) if m.kicked_at.is_some() => MembershipStatus::Kicked,
        Some(m) if m.left_at.is_some() => MembershipStatus::Left,
        // Groups synced from older payloads may omit the role.
        Some(m) => MembershipStatus::Active(m.role.unwrap_or(Role::Member)),
    }
}

/// Compute what `viewer` may do in `conversation`.
pub fn derive(conversation: &Conversation, viewer: &UserId) -> PermissionSet {
    match conversation.kind {
        ConversationKind::Group => {}
        ConversationKind::Direct => {
            return PermissionSet {
                can_send_message: !conversation.blocked,
                ..PermissionSet::none()
            }
        }
        ConversationKind::Unknown => return PermissionSet::none(),
    }

    let role = match membership_status(conversation, viewer) {
        MembershipStatus::Active(role) => role,
        MembershipStatus::NotMember | MembershipStatus::Kicked | MembershipStatus::Left => {
            return PermissionSet::none()
        }
    };

    let can_send_message = match conversation.message_permission {
        MessagePermission::All => true,
        MessagePermission::AdminsOnly => role >= Role::Admin,
    };

    match role {
        Role::Member => PermissionSet {
            can_send_message,
            can_leave: true,
            ..PermissionSet::none()
        },
        Role::Admin => PermissionSet {
            can_send_message,
            can_kick: true,
            can_leave: true,
            ..PermissionSet::none()
        },
        Role::Owner => PermissionSet {
            can_send_message,
            can_kick: true,
            can_change_role: true,
            can_update_settings: true,
            can_leave: conversation.active_members_count() == 1,
        },
    }
}

/// Whether `viewer` may kick `target`: kick rights and a strictly higher role.
pub fn can_kick_target(conversation: &Conversation, viewer: &UserId, target: &UserId) -> bool {
    if viewer == target || !derive(conversation, viewer).can_kick {
        return false;
    }
    match (
        membership_status(conversation, viewer),
        membership_status(conversation, target),
    ) {
        (MembershipStatus::Active(mine), MembershipStatus::Active(theirs)) => mine > theirs,
        _ => false,
    }
}

impl ConversationStore {
    /// Capabilities of the viewer. `None` if the conversation is unknown.
    pub fn permissions(&self, conversation_id: &ConversationId) -> Option<PermissionSet> {
        self.get(conversation_id)
            .map(|c| derive(c, &self.viewer.uid))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use chatsync_shared::Member;

    use super::*;

    fn member(uid: &str, role: Role) -> Member {
        Member::new(UserId::new(uid), Some(role), Utc::now())
    }

    fn group(members: Vec<Member>) -> Conversation {
        Conversation::group(ConversationId::new("g1"), "team", members)
    }

    fn me() -> UserId {
        UserId::new("me")
    }

    #[test]
    fn test_admins_only_blocks_members() {
        let mut conv = group(vec![
            member("owner", Role::Owner),
            member("me", Role::Member),
        ]);
        conv.message_permission = MessagePermission::AdminsOnly;
        assert!(!derive(&conv, &me()).can_send_message);

        conv.member_mut(&me()).unwrap().role = Some(Role::Admin);
        assert!(derive(&conv, &me()).can_send_message);
    }

    #[test]
    fn test_role_table() {
        let conv = group(vec![
            member("me", Role::Owner),
            member("a", Role::Admin),
            member("m", Role::Member),
        ]);

        let owner = derive(&conv, &me());
        assert_eq!(
            owner,
            PermissionSet {
                can_send_message: true,
                can_kick: true,
                can_change_role: true,
                can_update_settings: true,
                can_leave: false,
            }
        );

        let admin = derive(&conv, &UserId::new("a"));
        assert!(admin.can_kick && admin.can_leave);
        assert!(!admin.can_change_role && !admin.can_update_settings);

        let plain = derive(&conv, &UserId::new("m"));
        assert!(plain.can_send_message && plain.can_leave);
        assert!(!plain.can_kick);

        assert_eq!(derive(&conv, &UserId::new("stranger")), PermissionSet::none());
    }

    #[test]
    fn test_sole_owner_may_leave() {
        let mut conv = group(vec![member("me", Role::Owner), member("m", Role::Member)]);
        conv.member_mut(&UserId::new("m")).unwrap().left_at = Some(Utc::now());
        assert!(derive(&conv, &me()).can_leave);
    }

    #[test]
    fn test_inactive_viewer_has_nothing() {
        let mut conv = group(vec![member("owner", Role::Owner), member("me", Role::Admin)]);
        conv.member_mut(&me()).unwrap().kicked_at = Some(Utc::now());
        assert_eq!(membership_status(&conv, &me()), MembershipStatus::Kicked);
        assert_eq!(derive(&conv, &me()), PermissionSet::none());
    }

    #[test]
    fn test_direct_is_flattened() {
        let mut conv = Conversation::direct(
            ConversationId::new("d1"),
            Member::new(me(), None, Utc::now()),
            Member::new(UserId::new("bob"), None, Utc::now()),
        );
        assert_eq!(
            derive(&conv, &me()),
            PermissionSet {
                can_send_message: true,
                ..PermissionSet::none()
            }
        );
        conv.blocked = true;
        assert_eq!(derive(&conv, &me()), PermissionSet::none());
    }

    #[test]
    fn test_placeholder_grants_nothing() {
        let conv = Conversation::placeholder(ConversationId::new("c9"));
        assert_eq!(conv.kind, ConversationKind::Unknown);
        assert!(conv.validate().is_ok());
        assert_eq!(derive(&conv, &me()), PermissionSet::none());
    }

    #[test]
    fn test_kick_requires_higher_role() {
        let conv = group(vec![
            member("owner", Role::Owner),
            member("me", Role::Admin),
            member("peer", Role::Admin),
            member("m", Role::Member),
        ]);
        assert!(can_kick_target(&conv, &me(), &UserId::new("m")));
        assert!(!can_kick_target(&conv, &me(), &UserId::new("peer")));
        assert!(!can_kick_target(&conv, &me(), &UserId::new("owner")));
        assert!(!can_kick_target(&conv, &me(), &me()));
    }
}
