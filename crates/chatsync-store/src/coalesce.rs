//! Last-intent-wins bookkeeping.
//!
//! Every local intent on a key (a typing flag, a group setting, ...) gets a
//! monotonically increasing token. Only the holder of the latest token may
//! emit its network call or apply its result; everything older is stale and
//! silently discarded. The same ledger backs typing, settings toggles and
//! join-mode changes.

use std::collections::HashMap;
use std::hash::Hash;

use chatsync_shared::{Conversation, ConversationPatch, SettingField, SettingValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntentToken(u64);

#[derive(Debug)]
pub struct IntentLedger<K> {
    next: u64,
    latest: HashMap<K, IntentToken>,
}

impl<K> Default for IntentLedger<K> {
    fn default() -> Self {
        Self {
            next: 0,
            latest: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> IntentLedger<K> {
    /// Record a new intent for `key`, superseding any earlier one.
    pub fn issue(&mut self, key: K) -> IntentToken {
        self.next += 1;
        let token = IntentToken(self.next);
        self.latest.insert(key, token);
        token
    }

    pub fn is_current(&self, key: &K, token: IntentToken) -> bool {
        self.latest.get(key) == Some(&token)
    }

    /// Retire `token` if it is still the latest for `key`.
    ///
    /// Returns `false` for a superseded token, whose result must be dropped.
    pub fn settle(&mut self, key: &K, token: IntentToken) -> bool {
        if self.is_current(key, token) {
            self.latest.remove(key);
            true
        } else {
            false
        }
    }

    pub fn has_pending(&self, key: &K) -> bool {
        self.latest.contains_key(key)
    }

    /// Forget every key matching `pred`, e.g. when a conversation is dropped.
    pub fn forget(&mut self, pred: impl Fn(&K) -> bool) {
        self.latest.retain(|k, _| !pred(k));
    }
}

/// An optimistic settings write awaiting the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingSetting {
    pub(crate) token: IntentToken,
    /// Last value the server is known to hold; restored on failure.
    pub(crate) baseline: SettingValue,
    /// Value currently shown.
    pub(crate) optimistic: SettingValue,
}

impl PendingSetting {
    /// Adopt the conversation's current `field` as the new baseline and put
    /// the optimistic value back on top.
    pub(crate) fn rebase(&mut self, conversation: &mut Conversation, field: SettingField) {
        self.baseline = SettingValue::read(conversation, field);
        self.optimistic.write(conversation);
    }
}

pub(crate) fn patch_touches(patch: &ConversationPatch, field: SettingField) -> bool {
    match field {
        SettingField::Name => patch.name.is_some(),
        SettingField::MessagePermission => patch.message_permission.is_some(),
        SettingField::JoinMode => patch.join_mode.is_some(),
    }
}
