//! Backward history cursors, one per `(conversation, filter)`.
//!
//! A load is split in two halves around the network call: `begin_load`
//! claims the cursor and yields the request, `complete_load` / `fail_load`
//! release it. While a load is claimed every further `begin_load` for the
//! same pair is a no-op.

use std::collections::HashSet;

use tracing::{debug, warn};

use chatsync_shared::protocol::bounded_page_size;
use chatsync_shared::{
    ConversationId, HistoryFilter, HistoryPage, MediaKind, MessageId, MessageRef, OutboundIntent,
};

use crate::error::Result;
use crate::models::Message;
use crate::observers::StoreChange;
use crate::store::ConversationStore;
use crate::timeline::Timeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorState {
    pub has_more: bool,
    pub in_flight: bool,
}

impl Default for CursorState {
    fn default() -> Self {
        Self {
            has_more: true,
            in_flight: false,
        }
    }
}

/// One history fetch to issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub conversation_id: ConversationId,
    pub filter: HistoryFilter,
    /// Oldest message already held; `None` fetches the newest page.
    pub before: Option<MessageId>,
    pub limit: u16,
}

impl PageRequest {
    pub fn to_intent(&self) -> OutboundIntent {
        OutboundIntent::FetchHistory {
            conversation_id: self.conversation_id.clone(),
            filter: self.filter,
            before: self.before.clone(),
            limit: self.limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginLoad {
    Fetch(PageRequest),
    /// Another load for the same pair is running.
    InFlight,
    /// The backend reported no older items.
    Exhausted,
}

/// Result of a completed page, including what a UI needs to keep its
/// scroll anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrependOutcome {
    pub conversation_id: ConversationId,
    pub filter: HistoryFilter,
    /// Newly inserted items, in display order.
    pub prepended: Vec<MessageRef>,
    /// First item displayed before the load; keep it on screen.
    pub anchor: Option<MessageRef>,
    pub has_more: bool,
}

impl PrependOutcome {
    /// Scroll offset to add so the anchor stays put, given the rendered
    /// height of each item.
    pub fn height_delta(&self, measure: impl Fn(&MessageRef) -> f64) -> f64 {
        self.prepended.iter().map(measure).sum()
    }
}

impl ConversationStore {
    /// Claim the cursor for one backward page.
    pub fn begin_load(
        &mut self,
        conversation_id: &ConversationId,
        filter: HistoryFilter,
        limit: u16,
    ) -> Result<BeginLoad> {
        let entry = self.entry_mut(conversation_id)?;
        let cursor = entry.cursors.entry(filter).or_default();
        if cursor.in_flight {
            debug!(conversation = %conversation_id, %filter, "Load already in flight");
            return Ok(BeginLoad::InFlight);
        }
        if !cursor.has_more {
            return Ok(BeginLoad::Exhausted);
        }
        cursor.in_flight = true;

        let before = match filter {
            HistoryFilter::All => entry.timeline.oldest_remote_id(),
            HistoryFilter::Media(kind) => entry.media.get(&kind).and_then(Timeline::oldest_remote_id),
        }
        .cloned();

        Ok(BeginLoad::Fetch(PageRequest {
            conversation_id: conversation_id.clone(),
            filter,
            before,
            limit: bounded_page_size(limit),
        }))
    }

    /// Prepend a fetched page and release the cursor.
    ///
    /// Items already held are skipped. Counters and unread counts do not
    /// move: history is not new.
    pub fn complete_load(
        &mut self,
        conversation_id: &ConversationId,
        filter: HistoryFilter,
        page: HistoryPage,
    ) -> Result<PrependOutcome> {
        let entry = self.entry_mut(conversation_id)?;
        let has_more = page.has_more && !page.messages.is_empty();
        let cursor = entry.cursors.entry(filter).or_default();
        cursor.in_flight = false;
        cursor.has_more = has_more;

        let target = match filter {
            HistoryFilter::All => &mut entry.timeline,
            HistoryFilter::Media(kind) => entry.media.entry(kind).or_default(),
        };
        let anchor = target.first_reference().cloned();

        let mut inserted = HashSet::new();
        for server in page.messages {
            if &server.conversation_id != conversation_id {
                warn!(conversation = %conversation_id, message = %server.message_id, "History page carried a foreign message");
                continue;
            }
            if target.contains_remote(&server.message_id) {
                continue;
            }
            let message = Message::from(server);
            if let HistoryFilter::Media(kind) = filter {
                let matches = message.attachment.as_ref().map(|a| a.kind) == Some(kind);
                if !matches || message.is_recalled {
                    continue;
                }
            }
            inserted.insert(message.reference.clone());
            target.insert_ordered(message);
        }

        let prepended: Vec<MessageRef> = target
            .items()
            .iter()
            .filter(|m| inserted.contains(&m.reference))
            .map(|m| m.reference.clone())
            .collect();

        let outcome = PrependOutcome {
            conversation_id: conversation_id.clone(),
            filter,
            prepended,
            anchor,
            has_more,
        };
        debug!(
            conversation = %conversation_id,
            %filter,
            count = outcome.prepended.len(),
            has_more,
            "History page applied"
        );
        self.notify(StoreChange::HistoryPrepended(outcome.clone()));
        Ok(outcome)
    }

    /// Release the cursor after a failed fetch. The page can be retried.
    pub fn fail_load(&mut self, conversation_id: &ConversationId, filter: HistoryFilter) {
        if let Some(cursor) = self
            .entries
            .get_mut(conversation_id)
            .and_then(|e| e.cursors.get_mut(&filter))
        {
            cursor.in_flight = false;
        }
    }

    /// Whether older items may exist. `false` for unknown conversations.
    pub fn has_more(&self, conversation_id: &ConversationId, filter: HistoryFilter) -> bool {
        self.entries
            .get(conversation_id)
            .map(|e| e.cursors.get(&filter).copied().unwrap_or_default().has_more)
            .unwrap_or(false)
    }

    pub fn is_loading(&self, conversation_id: &ConversationId, filter: HistoryFilter) -> bool {
        self.entries
            .get(conversation_id)
            .and_then(|e| e.cursors.get(&filter))
            .map(|c| c.in_flight)
            .unwrap_or(false)
    }

    /// Loaded items of one media gallery, oldest first.
    pub fn media_items(&self, conversation_id: &ConversationId, kind: MediaKind) -> &[Message] {
        self.entries
            .get(conversation_id)
            .and_then(|e| e.media.get(&kind))
            .map(Timeline::items)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{DateTime, TimeZone, Utc};

    use chatsync_shared::{Attachment, Conversation, Member, Role, SenderInfo, ServerMessage, UserId};

    use super::*;
    use crate::config::StoreConfig;
    use crate::error::StoreError;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn server(id: &str, secs: i64, media: Option<MediaKind>) -> ServerMessage {
        ServerMessage {
            message_id: MessageId::new(id),
            conversation_id: ConversationId::new("c1"),
            sender: SenderInfo::new(UserId::new("bob")),
            content: id.to_string(),
            created_at: at(secs),
            attachment: media.map(|kind| Attachment {
                kind,
                url: format!("https://cdn/{id}"),
                name: None,
            }),
            reply_to: None,
            edited_at: None,
            is_recalled: false,
            recalled_at: None,
            reactions: BTreeMap::new(),
        }
    }

    fn setup() -> (ConversationStore, ConversationId) {
        let mut s =
            ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default());
        let id = ConversationId::new("c1");
        s.create_conversation(Conversation::group(
            id.clone(),
            "team",
            vec![Member::new(UserId::new("me"), Some(Role::Owner), at(0))],
        ))
        .unwrap();
        s.ingest_server_message(server("m10", 100, None));
        s.ingest_server_message(server("m11", 110, None));
        (s, id)
    }

    fn fetch(outcome: BeginLoad) -> PageRequest {
        match outcome {
            BeginLoad::Fetch(req) => req,
            other => panic!("expected a fetch, got {other:?}"),
        }
    }

    #[test]
    fn test_second_begin_while_in_flight_is_noop() {
        let (mut s, id) = setup();
        let req = fetch(s.begin_load(&id, HistoryFilter::All, 30).unwrap());
        assert_eq!(req.before, Some(MessageId::new("m10")));
        assert_eq!(
            s.begin_load(&id, HistoryFilter::All, 30).unwrap(),
            BeginLoad::InFlight
        );
        // Other filters have their own cursor.
        fetch(
            s.begin_load(&id, HistoryFilter::Media(MediaKind::Image), 30)
                .unwrap(),
        );
        assert!(s.is_loading(&id, HistoryFilter::All));
    }

    #[test]
    fn test_prepends_in_order_and_reports_anchor() {
        let (mut s, id) = setup();
        fetch(s.begin_load(&id, HistoryFilter::All, 30).unwrap());

        let page = HistoryPage {
            messages: vec![
                server("m9", 90, None),
                server("m7", 70, None),
                server("m10", 100, None),
                server("m8", 80, None),
            ],
            has_more: true,
        };
        let outcome = s.complete_load(&id, HistoryFilter::All, page).unwrap();

        let ids: Vec<_> = s.messages(&id).iter().map(|m| m.content.clone()).collect();
        assert_eq!(ids, vec!["m7", "m8", "m9", "m10", "m11"]);
        assert_eq!(
            outcome.prepended,
            vec![
                MessageRef::Remote(MessageId::new("m7")),
                MessageRef::Remote(MessageId::new("m8")),
                MessageRef::Remote(MessageId::new("m9")),
            ]
        );
        assert_eq!(outcome.anchor, Some(MessageRef::Remote(MessageId::new("m10"))));
        assert_eq!(outcome.height_delta(|_| 40.0), 120.0);
        assert!(outcome.has_more);
        assert!(!s.is_loading(&id, HistoryFilter::All));
    }

    #[test]
    fn test_exhaustion_makes_further_loads_noops() {
        let (mut s, id) = setup();
        fetch(s.begin_load(&id, HistoryFilter::All, 30).unwrap());
        s.complete_load(
            &id,
            HistoryFilter::All,
            HistoryPage {
                messages: vec![server("m1", 1, None)],
                has_more: false,
            },
        )
        .unwrap();
        assert!(!s.has_more(&id, HistoryFilter::All));
        assert_eq!(
            s.begin_load(&id, HistoryFilter::All, 30).unwrap(),
            BeginLoad::Exhausted
        );
    }

    #[test]
    fn test_media_gallery_keeps_only_matching_kind() {
        let (mut s, id) = setup();
        let req = fetch(
            s.begin_load(&id, HistoryFilter::Media(MediaKind::Image), 500)
                .unwrap(),
        );
        assert_eq!(req.before, None);
        assert_eq!(req.limit, 100);

        s.complete_load(
            &id,
            HistoryFilter::Media(MediaKind::Image),
            HistoryPage {
                messages: vec![
                    server("i1", 10, Some(MediaKind::Image)),
                    server("v1", 11, Some(MediaKind::Video)),
                ],
                has_more: true,
            },
        )
        .unwrap();
        let gallery = s.media_items(&id, MediaKind::Image);
        assert_eq!(gallery.len(), 1);
        assert_eq!(gallery[0].content, "i1");

        // Live images join the loaded gallery; recalls leave it.
        s.ingest_server_message(server("i2", 200, Some(MediaKind::Image)));
        assert_eq!(s.media_items(&id, MediaKind::Image).len(), 2);
        s.apply_recall(&id, &MessageId::new("i2"), at(201));
        assert_eq!(s.media_items(&id, MediaKind::Image).len(), 1);
    }

    #[test]
    fn test_failed_load_releases_cursor() {
        let (mut s, id) = setup();
        fetch(s.begin_load(&id, HistoryFilter::All, 30).unwrap());
        s.fail_load(&id, HistoryFilter::All);
        assert!(s.has_more(&id, HistoryFilter::All));
        fetch(s.begin_load(&id, HistoryFilter::All, 30).unwrap());
    }

    #[test]
    fn test_unknown_conversation() {
        let mut s =
            ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default());
        let err = s
            .begin_load(&ConversationId::new("ghost"), HistoryFilter::All, 30)
            .unwrap_err();
        assert!(matches!(err, StoreError::ConversationNotFound(_)));
        assert!(!s.has_more(&ConversationId::new("ghost"), HistoryFilter::All));
    }
}
