//! Inbound event dispatch.

use tracing::{debug, warn};

use chatsync_shared::InboundEvent;

use crate::messages::IngestOutcome;
use crate::store::ConversationStore;

impl ConversationStore {
    /// Apply one inbound event. Returns `true` if the store changed.
    ///
    /// Events are applied in the order they are received; none of them can
    /// fail. Events about state that is not held locally are dropped.
    pub fn apply_event(&mut self, event: InboundEvent) -> bool {
        let kind = event.event_type();
        let conversation_id = event.conversation_id().clone();

        let changed = match event {
            InboundEvent::MessageNew(message) => {
                self.ingest_server_message(message) == IngestOutcome::Inserted
            }
            InboundEvent::MessageRecalled(e) => {
                self.apply_recall(&e.conversation_id, &e.message_id, e.recalled_at)
            }
            InboundEvent::MessageEdited(e) => {
                self.apply_edit(&e.conversation_id, &e.message_id, e.content, e.edited_at)
            }
            InboundEvent::ReactionUpdated(e) => {
                self.apply_reactions(&e.conversation_id, &e.message_id, e.reactions)
            }
            InboundEvent::ReadReceipt(e) => {
                self.record_receipt(&e.conversation_id, &e.message_id, &e.user_uid, e.read_at)
            }
            InboundEvent::TypingUpdate(e) => {
                self.apply_typing(&e.conversation_id, &e.user_uid, e.is_typing)
            }
            InboundEvent::GroupUpdated(e) if !self.contains(&e.conversation_id) => {
                debug!(conversation = %conversation_id, "Group update for a conversation not held, dropped");
                false
            }
            InboundEvent::GroupUpdated(e) => match self.upsert(&e.conversation_id, e.patch) {
                Ok(()) => true,
                Err(err) => {
                    warn!(conversation = %conversation_id, error = %err, "Discarding invalid group update");
                    false
                }
            },
            InboundEvent::MemberKicked(e) => {
                self.apply_member_kicked(&e.conversation_id, &e.uid, e.kicked_by, e.kicked_at)
            }
            InboundEvent::MemberLeft(e) => {
                self.apply_member_left(&e.conversation_id, &e.uid, e.left_at)
            }
        };

        debug!(conversation = %conversation_id, event = kind, changed, "Inbound event applied");
        changed
    }
}

#[cfg(test)]
mod tests {
    use chatsync_shared::{ConversationId, MessageId, SenderInfo, UserId};

    use super::*;
    use crate::config::StoreConfig;

    fn store() -> ConversationStore {
        ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default())
    }

    #[test]
    fn test_dispatches_json_events_in_order() {
        let mut s = store();
        let lines = [
            r#"{"type":"message:new","payload":{"messageId":"m1","conversationId":"c1","sender":{"uid":"bob"},"content":"hi","createdAt":"2024-05-01T10:00:00Z"}}"#,
            r#"{"type":"message:edited","payload":{"conversationId":"c1","messageId":"m1","content":"hi!","editedAt":"2024-05-01T10:00:05Z"}}"#,
            r#"{"type":"reaction:updated","payload":{"conversationId":"c1","messageId":"m1","reactions":{"👍":["carol"]}}}"#,
            r#"{"type":"typing:update","payload":{"conversationId":"c1","userUid":"bob","isTyping":true}}"#,
            r#"{"type":"group:updated","payload":{"conversationId":"c1","name":"weekend"}}"#,
        ];
        for line in lines {
            assert!(s.apply_event(InboundEvent::from_json(line).unwrap()), "{line}");
        }

        let id = ConversationId::new("c1");
        let messages = s.messages(&id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hi!");
        assert_eq!(messages[0].reactions["👍"], vec![UserId::new("carol")]);
        assert_eq!(s.get(&id).unwrap().name.as_deref(), Some("weekend"));
        assert!(s.is_stale(&id));
    }

    #[test]
    fn test_duplicate_and_orphan_events_change_nothing() {
        let mut s = store();
        let new = r#"{"type":"message:new","payload":{"messageId":"m1","conversationId":"c1","sender":{"uid":"bob"},"content":"hi","createdAt":"2024-05-01T10:00:00Z"}}"#;
        assert!(s.apply_event(InboundEvent::from_json(new).unwrap()));
        assert!(!s.apply_event(InboundEvent::from_json(new).unwrap()));

        let recall = r#"{"type":"message:recalled","payload":{"conversationId":"c1","messageId":"m404","recalledAt":"2024-05-01T10:01:00Z"}}"#;
        assert!(!s.apply_event(InboundEvent::from_json(recall).unwrap()));

        let receipt = r#"{"type":"read:receipt","payload":{"conversationId":"c9","messageId":"m1","userUid":"bob","readAt":"2024-05-01T10:01:00Z"}}"#;
        assert!(!s.apply_event(InboundEvent::from_json(receipt).unwrap()));
        assert!(s
            .receipts_for(&ConversationId::new("c9"), &MessageId::new("m1"))
            .is_empty());
    }

    #[test]
    fn test_group_update_does_not_revive_left_conversation() {
        let mut s = store();
        let new = r#"{"type":"message:new","payload":{"messageId":"m1","conversationId":"c1","sender":{"uid":"bob"},"content":"hi","createdAt":"2024-05-01T10:00:00Z"}}"#;
        assert!(s.apply_event(InboundEvent::from_json(new).unwrap()));

        let left = r#"{"type":"member:left","payload":{"conversationId":"c1","uid":"me","leftAt":"2024-05-01T10:01:00Z"}}"#;
        assert!(s.apply_event(InboundEvent::from_json(left).unwrap()));
        let id = ConversationId::new("c1");
        assert!(!s.contains(&id));

        let update = r#"{"type":"group:updated","payload":{"conversationId":"c1","name":"weekend"}}"#;
        assert!(!s.apply_event(InboundEvent::from_json(update).unwrap()));
        assert!(!s.contains(&id));

        let unseen = r#"{"type":"group:updated","payload":{"conversationId":"c7","name":"x"}}"#;
        assert!(!s.apply_event(InboundEvent::from_json(unseen).unwrap()));
        assert!(!s.contains(&ConversationId::new("c7")));
    }
}
