//! The conversation store.
//!
//! [`ConversationStore`] is the single writable surface of the sync core. It
//! owns every conversation, message, receipt, reply target and cursor; the
//! other modules of this crate extend it with `impl ConversationStore`
//! blocks. An instance is created at session start, passed by reference to
//! its consumers and dropped at logout.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chatsync_shared::{
    Conversation, ConversationId, ConversationPatch, ConversationSnapshot, HistoryFilter,
    LocalId, MediaKind, SenderInfo, SettingField, UserId,
};

use crate::coalesce::{patch_touches, IntentLedger, PendingSetting};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::models::{ConversationView, ReplyTarget};
use crate::observers::{Listener, ObserverRegistry, StoreChange, SubscriptionToken};
use crate::pagination::CursorState;
use crate::permissions;
use crate::receipts::ReceiptBook;
use crate::timeline::Timeline;

pub type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

/// Everything held for one conversation.
#[derive(Debug)]
pub(crate) struct ConversationEntry {
    pub(crate) conversation: Conversation,
    pub(crate) stale: bool,
    pub(crate) unread_count: u64,
    pub(crate) timeline: Timeline,
    pub(crate) receipts: ReceiptBook,
    pub(crate) reply_target: Option<ReplyTarget>,
    pub(crate) typing: BTreeMap<UserId, DateTime<Utc>>,
    pub(crate) self_typing: bool,
    pub(crate) cursors: HashMap<HistoryFilter, CursorState>,
    pub(crate) media: HashMap<MediaKind, Timeline>,
    pub(crate) pending_settings: HashMap<SettingField, PendingSetting>,
    pub(crate) setting_errors: BTreeMap<SettingField, String>,
}

impl ConversationEntry {
    fn new(conversation: Conversation, stale: bool) -> Self {
        Self {
            conversation,
            stale,
            unread_count: 0,
            timeline: Timeline::default(),
            receipts: ReceiptBook::default(),
            reply_target: None,
            typing: BTreeMap::new(),
            self_typing: false,
            cursors: HashMap::new(),
            media: HashMap::new(),
            pending_settings: HashMap::new(),
            setting_errors: BTreeMap::new(),
        }
    }

    /// Server changed these fields; keep showing any optimistic value but
    /// roll back to the server's value if the local write fails.
    pub(crate) fn rebase_pending(&mut self, touched: impl Fn(SettingField) -> bool) {
        for (field, pending) in self.pending_settings.iter_mut() {
            if touched(*field) {
                pending.rebase(&mut self.conversation, *field);
            }
        }
    }
}

/// In-memory cache of server truth plus local optimistic state.
pub struct ConversationStore {
    pub(crate) viewer: SenderInfo,
    pub(crate) config: StoreConfig,
    pub(crate) entries: HashMap<ConversationId, ConversationEntry>,
    /// Insertion order of `entries`.
    pub(crate) order: Vec<ConversationId>,
    pub(crate) active: Option<ConversationId>,
    /// Conversation of every unconfirmed local message.
    pub(crate) local_index: HashMap<LocalId, ConversationId>,
    pub(crate) setting_ledger: IntentLedger<(ConversationId, SettingField)>,
    pub(crate) observers: ObserverRegistry,
    clock: Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    Applied,
    /// The viewer is no longer an active member; the conversation was dropped.
    Removed,
}

impl ConversationStore {
    /// Create an empty store for `viewer`.
    pub fn new(viewer: SenderInfo, config: StoreConfig) -> Self {
        info!(viewer = %viewer.uid, "Creating conversation store");
        Self {
            viewer,
            config,
            entries: HashMap::new(),
            order: Vec::new(),
            active: None,
            local_index: HashMap::new(),
            setting_ledger: IntentLedger::default(),
            observers: ObserverRegistry::default(),
            clock: Box::new(Utc::now),
        }
    }

    /// Replace the wall clock, for deterministic tests and replays.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer.uid
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Listen to changes of one conversation.
    pub fn subscribe(
        &mut self,
        conversation_id: ConversationId,
        listener: impl FnMut(&StoreChange) + Send + 'static,
    ) -> SubscriptionToken {
        self.observers
            .subscribe(Some(conversation_id), Box::new(listener) as Listener)
    }

    /// Listen to every change.
    pub fn subscribe_all(
        &mut self,
        listener: impl FnMut(&StoreChange) + Send + 'static,
    ) -> SubscriptionToken {
        self.observers.subscribe(None, Box::new(listener) as Listener)
    }

    pub fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        self.observers.unsubscribe(token)
    }

    pub(crate) fn notify(&mut self, change: StoreChange) {
        self.observers.notify(&change);
    }

    // -----------------------------------------------------------------------
    // Keyed access
    // -----------------------------------------------------------------------

    /// Look up a conversation. Absence is normal: callers check before a
    /// conversation exists locally.
    pub fn get(&self, conversation_id: &ConversationId) -> Option<&Conversation> {
        self.entries
            .get(conversation_id)
            .map(|e| &e.conversation)
    }

    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.entries.contains_key(conversation_id)
    }

    /// Conversation IDs in insertion order.
    pub fn conversation_ids(&self) -> &[ConversationId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether metadata is missing or predates the last reconnect.
    pub fn is_stale(&self, conversation_id: &ConversationId) -> bool {
        self.entries
            .get(conversation_id)
            .map(|e| e.stale)
            .unwrap_or(false)
    }

    pub fn unread_count(&self, conversation_id: &ConversationId) -> u64 {
        self.entries
            .get(conversation_id)
            .map(|e| e.unread_count)
            .unwrap_or(0)
    }

    pub(crate) fn entry(&self, conversation_id: &ConversationId) -> Result<&ConversationEntry> {
        self.entries
            .get(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))
    }

    pub(crate) fn entry_mut(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<&mut ConversationEntry> {
        self.entries
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))
    }

    /// Fetch an entry, creating a stale placeholder for unknown conversations.
    ///
    /// Callers notify; a placeholder is never observable before the change
    /// that created it.
    pub(crate) fn entry_or_placeholder(
        &mut self,
        conversation_id: &ConversationId,
    ) -> &mut ConversationEntry {
        let order = &mut self.order;
        self.entries
            .entry(conversation_id.clone())
            .or_insert_with(|| {
                debug!(conversation = %conversation_id, "Creating placeholder conversation");
                order.push(conversation_id.clone());
                ConversationEntry::new(Conversation::placeholder(conversation_id.clone()), true)
            })
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Insert an explicitly created conversation (e.g. a new group).
    ///
    /// An existing conversation with the same ID is overwritten.
    pub fn create_conversation(&mut self, conversation: Conversation) -> Result<()> {
        conversation.validate()?;
        let id = conversation.id.clone();

        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.conversation = conversation;
                entry.stale = false;
            }
            None => {
                self.entries
                    .insert(id.clone(), ConversationEntry::new(conversation, false));
                self.order.push(id.clone());
            }
        }

        info!(conversation = %id, "Conversation created");
        self.notify(StoreChange::ConversationUpdated(id));
        Ok(())
    }

    /// Shallow-merge `patch` into a conversation, creating a placeholder
    /// first if it is unknown.
    ///
    /// A patch that replaces the member list is validated before anything is
    /// written.
    pub fn upsert(&mut self, conversation_id: &ConversationId, patch: ConversationPatch) -> Result<()> {
        let mut merged = self
            .get(conversation_id)
            .cloned()
            .unwrap_or_else(|| Conversation::placeholder(conversation_id.clone()));
        patch.apply_to(&mut merged);
        if patch.members.is_some() || patch.kind.is_some() {
            merged.validate()?;
            if self.viewer_left(&merged) {
                info!(conversation = %conversation_id, "Viewer no longer in group, dropping conversation");
                self.remove(conversation_id);
                return Ok(());
            }
        }

        let entry = self.entry_or_placeholder(conversation_id);
        entry.conversation = merged;
        entry.rebase_pending(|field| patch_touches(&patch, field));

        debug!(conversation = %conversation_id, "Conversation upserted");
        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        Ok(())
    }

    /// Replace conversation metadata with an authoritative snapshot and
    /// merge the recent messages it carries.
    ///
    /// Unconfirmed local messages survive. If the viewer is not an active
    /// member of the group any more, the conversation is removed instead.
    pub fn apply_snapshot(&mut self, snapshot: ConversationSnapshot) -> Result<SnapshotOutcome> {
        snapshot.conversation.validate()?;
        let id = snapshot.conversation.id.clone();

        if self.viewer_left(&snapshot.conversation) {
            info!(conversation = %id, "Viewer no longer in group, dropping conversation");
            self.remove(&id);
            return Ok(SnapshotOutcome::Removed);
        }

        let entry = self.entry_or_placeholder(&id);
        entry.conversation = snapshot.conversation;
        entry.stale = false;
        entry.rebase_pending(|_| true);
        self.notify(StoreChange::ConversationUpdated(id.clone()));

        for message in snapshot.recent_messages {
            if message.conversation_id != id {
                warn!(
                    conversation = %id,
                    message = %message.message_id,
                    "Snapshot carried a message for another conversation, skipping"
                );
                continue;
            }
            self.insert_remote(message, false);
        }

        debug!(conversation = %id, "Snapshot applied");
        Ok(SnapshotOutcome::Applied)
    }

    /// A group the viewer is not an active member of.
    fn viewer_left(&self, conversation: &Conversation) -> bool {
        conversation.is_group()
            && !conversation
                .member(&self.viewer.uid)
                .is_some_and(|m| m.is_active())
    }

    /// Mark every conversation stale, e.g. after the transport reconnected.
    pub fn mark_all_stale(&mut self) {
        for entry in self.entries.values_mut() {
            entry.stale = true;
        }
    }

    /// Drop a conversation and everything derived from it.
    ///
    /// Also retires the active pointer if it referenced this conversation.
    pub fn remove(&mut self, conversation_id: &ConversationId) -> bool {
        if self.entries.remove(conversation_id).is_none() {
            return false;
        }
        self.order.retain(|id| id != conversation_id);
        self.local_index.retain(|_, conv| conv != conversation_id);
        self.setting_ledger.forget(|(conv, _)| conv == conversation_id);

        info!(conversation = %conversation_id, "Conversation removed");
        self.notify(StoreChange::ConversationRemoved(conversation_id.clone()));

        if self.active.as_ref() == Some(conversation_id) {
            self.active = None;
            self.notify(StoreChange::ActiveChanged(None));
        }
        true
    }

    /// Point the UI at a conversation. Returns `false` if it is unknown.
    pub fn set_active(&mut self, conversation_id: Option<&ConversationId>) -> bool {
        if let Some(id) = conversation_id {
            if !self.entries.contains_key(id) {
                return false;
            }
        }
        let next = conversation_id.cloned();
        if self.active != next {
            self.active = next.clone();
            self.notify(StoreChange::ActiveChanged(next));
        }
        true
    }

    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    // -----------------------------------------------------------------------
    // Read-only projections
    // -----------------------------------------------------------------------

    /// Detached snapshot of one conversation for rendering.
    pub fn view(&self, conversation_id: &ConversationId) -> Option<ConversationView> {
        let entry = self.entries.get(conversation_id)?;
        let conversation = entry.conversation.clone();
        Some(ConversationView {
            permissions: permissions::derive(&conversation, &self.viewer.uid),
            active_members_count: conversation.active_members_count(),
            conversation,
            stale: entry.stale,
            unread_count: entry.unread_count,
            messages: entry.timeline.items().to_vec(),
            reply_target: entry.reply_target.clone(),
            typing: self.typing_users(conversation_id),
        })
    }

    /// Views of every conversation in insertion order.
    pub fn views(&self) -> Vec<ConversationView> {
        self.order.iter().filter_map(|id| self.view(id)).collect()
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("viewer", &self.viewer.uid)
            .field("conversations", &self.order.len())
            .field("active", &self.active)
            .field("observers", &self.observers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chatsync_shared::{ConversationKind, JoinMode, Member, Role};

    use super::*;
    use crate::permissions::PermissionSet;

    fn store() -> ConversationStore {
        ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default())
    }

    fn member(uid: &str, role: Option<Role>) -> Member {
        Member::new(UserId::new(uid), role, Utc::now())
    }

    fn group(id: &str) -> Conversation {
        Conversation::group(
            ConversationId::new(id),
            "team",
            vec![member("me", Some(Role::Owner)), member("bob", Some(Role::Member))],
        )
    }

    #[test]
    fn test_get_unknown_is_none() {
        let s = store();
        assert!(s.get(&ConversationId::new("nope")).is_none());
    }

    #[test]
    fn test_keeps_insertion_order() {
        let mut s = store();
        s.create_conversation(group("b")).unwrap();
        s.create_conversation(group("a")).unwrap();
        s.upsert(&ConversationId::new("c"), ConversationPatch::default())
            .unwrap();
        let ids: Vec<_> = s.conversation_ids().iter().map(|c| c.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_upserts_apply_in_call_order() {
        let mut s = store();
        let id = ConversationId::new("g1");
        s.create_conversation(group("g1")).unwrap();
        s.upsert(
            &id,
            ConversationPatch {
                name: Some("first".into()),
                join_mode: Some(JoinMode::Link),
                ..Default::default()
            },
        )
        .unwrap();
        s.upsert(
            &id,
            ConversationPatch {
                name: Some("second".into()),
                ..Default::default()
            },
        )
        .unwrap();

        let conv = s.get(&id).unwrap();
        assert_eq!(conv.name.as_deref(), Some("second"));
        assert_eq!(conv.join_mode, JoinMode::Link);
    }

    #[test]
    fn test_upsert_rejects_invalid_members_without_writing() {
        let mut s = store();
        let id = ConversationId::new("d1");
        s.create_conversation(Conversation::direct(
            id.clone(),
            member("me", None),
            member("bob", None),
        ))
        .unwrap();

        let err = s
            .upsert(
                &id,
                ConversationPatch {
                    members: Some(vec![member("me", None)]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(s.get(&id).unwrap().members.len(), 2);
    }

    #[test]
    fn test_remove_retires_active_pointer() {
        let mut s = store();
        let id = ConversationId::new("g1");
        s.create_conversation(group("g1")).unwrap();
        assert!(s.set_active(Some(&id)));
        assert!(s.remove(&id));
        assert!(s.active().is_none());
        assert!(!s.remove(&id));
        assert!(s.is_empty());
    }

    #[test]
    fn test_set_active_rejects_unknown() {
        let mut s = store();
        assert!(!s.set_active(Some(&ConversationId::new("ghost"))));
        assert!(s.set_active(None));
    }

    #[test]
    fn test_every_mutation_notifies() {
        let mut s = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.subscribe_all(move |c| sink.lock().unwrap().push(c.clone()));

        let id = ConversationId::new("g1");
        s.create_conversation(group("g1")).unwrap();
        s.set_active(Some(&id));
        s.remove(&id);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                StoreChange::ConversationUpdated(id.clone()),
                StoreChange::ActiveChanged(Some(id.clone())),
                StoreChange::ConversationRemoved(id),
                StoreChange::ActiveChanged(None),
            ]
        );
    }

    #[test]
    fn test_snapshot_without_viewer_removes_group() {
        let mut s = store();
        s.create_conversation(group("g1")).unwrap();

        let mut conv = group("g1");
        conv.members[0].kicked_at = Some(Utc::now());
        let outcome = s
            .apply_snapshot(ConversationSnapshot {
                conversation: conv,
                recent_messages: vec![],
            })
            .unwrap();
        assert_eq!(outcome, SnapshotOutcome::Removed);
        assert!(!s.contains(&ConversationId::new("g1")));
    }

    #[test]
    fn test_member_patch_removing_viewer_drops_group() {
        let mut s = store();
        let id = ConversationId::new("g1");
        s.create_conversation(group("g1")).unwrap();
        s.set_active(Some(&id));

        let mut members = group("g1").members;
        members[0].kicked_at = Some(Utc::now());
        s.upsert(
            &id,
            ConversationPatch {
                members: Some(members),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!s.contains(&id));
        assert!(s.active().is_none());
    }

    #[test]
    fn test_snapshot_clears_placeholder_staleness() {
        let mut s = store();
        let id = ConversationId::new("g1");
        s.upsert(&id, ConversationPatch::default()).unwrap();
        assert!(s.is_stale(&id));
        assert_eq!(s.get(&id).unwrap().kind, ConversationKind::Unknown);
        assert_eq!(s.permissions(&id), Some(PermissionSet::none()));

        s.apply_snapshot(ConversationSnapshot {
            conversation: group("g1"),
            recent_messages: vec![],
        })
        .unwrap();
        assert!(!s.is_stale(&id));
        assert_eq!(s.get(&id).unwrap().kind, ConversationKind::Group);
    }
}
