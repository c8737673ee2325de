//! Membership changes: inbound kick/leave events and the optimistic half of
//! kick and role changes.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use chatsync_shared::{ConversationId, Member, Role, UserId};

use crate::error::{Result, StoreError};
use crate::observers::StoreChange;
use crate::permissions::{self, MembershipStatus};
use crate::store::ConversationStore;

impl ConversationStore {
    /// Apply a `member:kicked` event. Kicking the viewer drops the
    /// conversation.
    pub fn apply_member_kicked(
        &mut self,
        conversation_id: &ConversationId,
        uid: &UserId,
        kicked_by: Option<UserId>,
        kicked_at: DateTime<Utc>,
    ) -> bool {
        if uid == &self.viewer.uid {
            info!(conversation = %conversation_id, "Viewer was removed from the group");
            return self.remove(conversation_id);
        }
        self.deactivate_member(conversation_id, uid, |m| {
            m.kicked_by = kicked_by;
            m.kicked_at = Some(kicked_at);
        })
    }

    /// Apply a `member:left` event. The viewer leaving drops the conversation.
    pub fn apply_member_left(
        &mut self,
        conversation_id: &ConversationId,
        uid: &UserId,
        left_at: DateTime<Utc>,
    ) -> bool {
        if uid == &self.viewer.uid {
            return self.remove(conversation_id);
        }
        self.deactivate_member(conversation_id, uid, |m| m.left_at = Some(left_at))
    }

    fn deactivate_member(
        &mut self,
        conversation_id: &ConversationId,
        uid: &UserId,
        mark: impl FnOnce(&mut Member),
    ) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };
        match entry.conversation.member_mut(uid) {
            Some(member) if member.is_active() => mark(member),
            _ => return false,
        }
        let was_typing = entry.typing.remove(uid).is_some();

        debug!(conversation = %conversation_id, member = %uid, "Member deactivated");
        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        if was_typing {
            self.notify(StoreChange::TypingChanged(conversation_id.clone()));
        }
        true
    }

    /// Optimistically kick `uid`. Returns the member as it was, for rollback.
    pub fn kick_member_local(&mut self, conversation_id: &ConversationId, uid: &UserId) -> Result<Member> {
        let now = self.now();
        let viewer = self.viewer.uid.clone();
        let entry = self.entry_mut(conversation_id)?;
        if !permissions::can_kick_target(&entry.conversation, &viewer, uid) {
            return Err(StoreError::PermissionDenied(format!("cannot kick {uid}")));
        }
        let Some(member) = entry.conversation.member_mut(uid) else {
            return Err(StoreError::PermissionDenied(format!("{uid} is not a member")));
        };

        let previous = member.clone();
        member.kicked_by = Some(viewer);
        member.kicked_at = Some(now);
        entry.typing.remove(uid);

        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        Ok(previous)
    }

    /// Optimistically change the role of `uid`. Returns the member as it was.
    ///
    /// Ownership transfer is not supported: neither the owner nor the
    /// `Owner` role can be the subject of a role change.
    pub fn set_role_local(
        &mut self,
        conversation_id: &ConversationId,
        uid: &UserId,
        role: Role,
    ) -> Result<Member> {
        if role == Role::Owner {
            return Err(StoreError::InvalidArgument(
                "ownership transfer is not supported".into(),
            ));
        }
        let viewer = self.viewer.uid.clone();
        let entry = self.entry_mut(conversation_id)?;
        if !permissions::derive(&entry.conversation, &viewer).can_change_role {
            return Err(StoreError::PermissionDenied("cannot change roles".into()));
        }
        match permissions::membership_status(&entry.conversation, uid) {
            MembershipStatus::Active(Role::Owner) => {
                return Err(StoreError::InvalidArgument(
                    "the owner's role cannot be changed".into(),
                ))
            }
            MembershipStatus::Active(_) => {}
            _ => return Err(StoreError::PermissionDenied(format!("{uid} is not an active member"))),
        }
        let Some(member) = entry.conversation.member_mut(uid) else {
            return Err(StoreError::PermissionDenied(format!("{uid} is not a member")));
        };

        let previous = member.clone();
        member.role = Some(role);
        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        Ok(previous)
    }

    /// Put a member record back after a rejected optimistic change.
    pub fn restore_member(&mut self, conversation_id: &ConversationId, previous: Member) -> bool {
        let Some(member) = self
            .entries
            .get_mut(conversation_id)
            .and_then(|e| e.conversation.member_mut(&previous.uid))
        else {
            return false;
        };
        *member = previous;
        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        true
    }
}

#[cfg(test)]
mod tests {
    use chatsync_shared::{Conversation, SenderInfo};

    use super::*;
    use crate::config::StoreConfig;

    fn setup(my_role: Role) -> (ConversationStore, ConversationId) {
        let mut s =
            ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default());
        let id = ConversationId::new("g1");
        let mut members = vec![
            Member::new(UserId::new("me"), Some(my_role), Utc::now()),
            Member::new(UserId::new("bob"), Some(Role::Member), Utc::now()),
            Member::new(UserId::new("amy"), Some(Role::Admin), Utc::now()),
        ];
        if my_role != Role::Owner {
            members.push(Member::new(UserId::new("olga"), Some(Role::Owner), Utc::now()));
        }
        s.create_conversation(Conversation::group(id.clone(), "team", members))
            .unwrap();
        (s, id)
    }

    #[test]
    fn test_kicked_member_becomes_inactive() {
        let (mut s, id) = setup(Role::Owner);
        s.apply_typing(&id, &UserId::new("bob"), true);
        assert!(s.apply_member_kicked(&id, &UserId::new("bob"), Some(UserId::new("amy")), Utc::now()));
        assert!(!s.apply_member_kicked(&id, &UserId::new("bob"), None, Utc::now()));

        let conv = s.get(&id).unwrap();
        assert_eq!(conv.active_members_count(), 2);
        assert_eq!(
            conv.member(&UserId::new("bob")).unwrap().kicked_by,
            Some(UserId::new("amy"))
        );
        assert!(s.typing_users(&id).is_empty());
    }

    #[test]
    fn test_viewer_kicked_or_leaving_drops_conversation() {
        let (mut s, id) = setup(Role::Member);
        assert!(s.apply_member_kicked(&id, &UserId::new("me"), None, Utc::now()));
        assert!(!s.contains(&id));

        let (mut s, id) = setup(Role::Member);
        assert!(s.apply_member_left(&id, &UserId::new("me"), Utc::now()));
        assert!(!s.contains(&id));
    }

    #[test]
    fn test_optimistic_kick_and_rollback() {
        let (mut s, id) = setup(Role::Admin);
        let previous = s.kick_member_local(&id, &UserId::new("bob")).unwrap();
        assert!(!s.get(&id).unwrap().member(&UserId::new("bob")).unwrap().is_active());

        assert!(s.restore_member(&id, previous));
        assert!(s.get(&id).unwrap().member(&UserId::new("bob")).unwrap().is_active());

        assert!(matches!(
            s.kick_member_local(&id, &UserId::new("amy")),
            Err(StoreError::PermissionDenied(_))
        ));
    }

    #[test]
    fn test_role_change_rules() {
        let (mut s, id) = setup(Role::Owner);
        let previous = s
            .set_role_local(&id, &UserId::new("bob"), Role::Admin)
            .unwrap();
        assert_eq!(previous.role, Some(Role::Member));
        assert_eq!(
            s.get(&id).unwrap().member(&UserId::new("bob")).unwrap().role,
            Some(Role::Admin)
        );

        assert!(matches!(
            s.set_role_local(&id, &UserId::new("bob"), Role::Owner),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            s.set_role_local(&id, &UserId::new("me"), Role::Member),
            Err(StoreError::InvalidArgument(_))
        ));

        let (mut s, id) = setup(Role::Admin);
        assert!(matches!(
            s.set_role_local(&id, &UserId::new("bob"), Role::Admin),
            Err(StoreError::PermissionDenied(_))
        ));
    }
}
