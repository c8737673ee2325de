//! Read receipts and per-user read markers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use chatsync_shared::{ConversationId, MessageId, UserId};

use crate::error::Result;
use crate::models::{ReadMarker, ReadReceipt};
use crate::observers::StoreChange;
use crate::store::ConversationStore;

#[derive(Debug, Default)]
pub(crate) struct ReceiptBook {
    /// Ordered by `read_at`, then uid.
    by_message: HashMap<MessageId, Vec<ReadReceipt>>,
    markers: HashMap<UserId, ReadMarker>,
}

impl ReceiptBook {
    /// Upsert a receipt. Older `read_at` values never replace newer ones.
    fn record(&mut self, message_id: &MessageId, user: &UserId, read_at: DateTime<Utc>) -> bool {
        let receipts = self.by_message.entry(message_id.clone()).or_default();
        match receipts.iter_mut().find(|r| &r.user_uid == user) {
            Some(existing) if existing.read_at >= read_at => return false,
            Some(existing) => existing.read_at = read_at,
            None => receipts.push(ReadReceipt {
                user_uid: user.clone(),
                message_id: message_id.clone(),
                read_at,
            }),
        }
        receipts.sort_by(|a, b| {
            a.read_at
                .cmp(&b.read_at)
                .then_with(|| a.user_uid.cmp(&b.user_uid))
        });
        true
    }

    fn advance_marker(
        &mut self,
        user: &UserId,
        message_id: &MessageId,
        message_created_at: DateTime<Utc>,
        read_at: DateTime<Utc>,
    ) {
        let behind = self
            .markers
            .get(user)
            .map(|m| m.message_created_at < message_created_at)
            .unwrap_or(true);
        if behind {
            self.markers.insert(
                user.clone(),
                ReadMarker {
                    message_id: message_id.clone(),
                    message_created_at,
                    read_at,
                },
            );
        }
    }

    fn receipts(&self, message_id: &MessageId) -> &[ReadReceipt] {
        self.by_message
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl ConversationStore {
    /// Record that `user` read `message_id`.
    ///
    /// Only messages held in the timeline take receipts, and a sender's own
    /// receipt on their message is dropped. Returns `true` if anything
    /// changed; unknown conversations are ignored.
    pub fn record_receipt(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        user: &UserId,
        read_at: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            debug!(conversation = %conversation_id, "Receipt for unknown conversation ignored");
            return false;
        };

        let created_at = match entry.timeline.get_remote(message_id) {
            Some(m) if m.is_from(user) => return false,
            Some(m) => m.created_at,
            None => {
                debug!(conversation = %conversation_id, message = %message_id, "Receipt for message not held, ignored");
                return false;
            }
        };

        if !entry.receipts.record(message_id, user, read_at) {
            return false;
        }
        entry
            .receipts
            .advance_marker(user, message_id, created_at, read_at);

        self.notify(StoreChange::ReceiptsChanged {
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    /// Every receipt on a message, oldest read first.
    pub fn receipts_for(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> &[ReadReceipt] {
        self.entries
            .get(conversation_id)
            .map(|e| e.receipts.receipts(message_id))
            .unwrap_or(&[])
    }

    /// Receipts a UI should show: only on the viewer's own messages.
    pub fn visible_receipts(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
    ) -> Vec<ReadReceipt> {
        let Some(entry) = self.entries.get(conversation_id) else {
            return Vec::new();
        };
        match entry.timeline.get_remote(message_id) {
            Some(m) if m.is_from(&self.viewer.uid) => entry
                .receipts
                .receipts(message_id)
                .iter()
                .filter(|r| r.user_uid != self.viewer.uid)
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }

    /// How far `user` has read, by send time.
    pub fn read_marker(&self, conversation_id: &ConversationId, user: &UserId) -> Option<&ReadMarker> {
        self.entries
            .get(conversation_id)?
            .receipts
            .markers
            .get(user)
    }

    /// The viewer read up to `message_id`: record their receipt and clear
    /// the unread count.
    pub fn mark_read(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<()> {
        let now = self.now();
        let viewer = self.viewer.uid.clone();
        self.entry(conversation_id)?;

        self.record_receipt(conversation_id, message_id, &viewer, now);

        let entry = self.entry_mut(conversation_id)?;
        if entry.unread_count != 0 {
            entry.unread_count = 0;
            self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, TimeZone};

    use chatsync_shared::{Conversation, Member, Role, SenderInfo, ServerMessage};

    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn server(id: &str, from: &str, secs: i64) -> ServerMessage {
        ServerMessage {
            message_id: MessageId::new(id),
            conversation_id: ConversationId::new("g1"),
            sender: SenderInfo::new(UserId::new(from)),
            content: format!("{id} from {from}"),
            created_at: at(secs),
            attachment: None,
            reply_to: None,
            edited_at: None,
            is_recalled: false,
            recalled_at: None,
            reactions: BTreeMap::new(),
        }
    }

    fn setup() -> (ConversationStore, ConversationId) {
        let mut s = ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default())
            .with_clock(|| at(1_000));
        let id = ConversationId::new("g1");
        s.create_conversation(Conversation::group(
            id.clone(),
            "team",
            vec![
                Member::new(UserId::new("me"), Some(Role::Owner), at(0)),
                Member::new(UserId::new("bob"), Some(Role::Member), at(0)),
                Member::new(UserId::new("carol"), Some(Role::Member), at(0)),
            ],
        ))
        .unwrap();
        s.ingest_server_message(server("m1", "me", 10));
        s.ingest_server_message(server("m2", "bob", 20));
        s.ingest_server_message(server("m3", "me", 30));
        (s, id)
    }

    #[test]
    fn test_older_read_at_never_regresses() {
        let (mut s, id) = setup();
        let m1 = MessageId::new("m1");
        let bob = UserId::new("bob");

        assert!(s.record_receipt(&id, &m1, &bob, at(100)));
        assert!(!s.record_receipt(&id, &m1, &bob, at(50)));
        assert!(!s.record_receipt(&id, &m1, &bob, at(100)));

        let receipts = s.receipts_for(&id, &m1);
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].read_at, at(100));
    }

    #[test]
    fn test_sender_is_excluded_from_own_message() {
        let (mut s, id) = setup();
        assert!(!s.record_receipt(&id, &MessageId::new("m2"), &UserId::new("bob"), at(100)));
        assert!(s.receipts_for(&id, &MessageId::new("m2")).is_empty());
    }

    #[test]
    fn test_receipt_for_unloaded_message_is_ignored() {
        let (mut s, id) = setup();
        let m5 = MessageId::new("m5");
        let bob = UserId::new("bob");
        assert!(!s.record_receipt(&id, &m5, &bob, at(100)));
        assert!(s.read_marker(&id, &bob).is_none());

        s.ingest_server_message(server("m5", "bob", 40));
        assert!(s.receipts_for(&id, &m5).is_empty());
        assert!(!s.record_receipt(&id, &m5, &bob, at(110)));
        assert!(s.record_receipt(&id, &m5, &UserId::new("carol"), at(110)));
    }

    #[test]
    fn test_receipts_ordered_by_read_time() {
        let (mut s, id) = setup();
        let m1 = MessageId::new("m1");
        s.record_receipt(&id, &m1, &UserId::new("carol"), at(200));
        s.record_receipt(&id, &m1, &UserId::new("bob"), at(100));
        let order: Vec<_> = s
            .receipts_for(&id, &m1)
            .iter()
            .map(|r| r.user_uid.as_str().to_string())
            .collect();
        assert_eq!(order, vec!["bob", "carol"]);
    }

    #[test]
    fn test_receipts_only_visible_on_own_messages() {
        let (mut s, id) = setup();
        s.record_receipt(&id, &MessageId::new("m1"), &UserId::new("bob"), at(100));
        s.record_receipt(&id, &MessageId::new("m2"), &UserId::new("carol"), at(100));

        assert_eq!(s.visible_receipts(&id, &MessageId::new("m1")).len(), 1);
        assert!(s.visible_receipts(&id, &MessageId::new("m2")).is_empty());
    }

    #[test]
    fn test_read_marker_is_monotonic_by_send_time() {
        let (mut s, id) = setup();
        let bob = UserId::new("bob");
        s.record_receipt(&id, &MessageId::new("m3"), &bob, at(100));
        s.record_receipt(&id, &MessageId::new("m1"), &bob, at(100) + Duration::seconds(5));

        let marker = s.read_marker(&id, &bob).unwrap();
        assert_eq!(marker.message_id, MessageId::new("m3"));
    }

    #[test]
    fn test_mark_read_resets_unread() {
        let (mut s, id) = setup();
        assert_eq!(s.unread_count(&id), 1);
        s.mark_read(&id, &MessageId::new("m2")).unwrap();
        assert_eq!(s.unread_count(&id), 0);
        assert_eq!(
            s.read_marker(&id, &UserId::new("me")).map(|m| m.message_id.clone()),
            Some(MessageId::new("m2"))
        );

        let err = s
            .mark_read(&ConversationId::new("ghost"), &MessageId::new("m2"))
            .unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
    }
}
