//! Typing indicators.
//!
//! Remote users expire after `typing_ttl` without a refresh. The viewer's own
//! flag is local state only; the session decides when to emit it.

use chrono::Duration;

use chatsync_shared::{ConversationId, UserId};

use crate::observers::StoreChange;
use crate::store::ConversationStore;

impl ConversationStore {
    fn typing_ttl(&self) -> Duration {
        Duration::from_std(self.config.typing_ttl).unwrap_or_else(|_| Duration::zero())
    }

    /// Apply a `typing:update`. The viewer's own echoes are ignored.
    pub fn apply_typing(&mut self, conversation_id: &ConversationId, user: &UserId, is_typing: bool) -> bool {
        if user == &self.viewer.uid {
            return false;
        }
        let now = self.now();
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };

        let changed = if is_typing {
            entry.typing.insert(user.clone(), now).is_none()
        } else {
            entry.typing.remove(user).is_some()
        };
        if changed {
            self.notify(StoreChange::TypingChanged(conversation_id.clone()));
        }
        changed
    }

    /// Users currently typing, sorted by uid.
    pub fn typing_users(&self, conversation_id: &ConversationId) -> Vec<UserId> {
        let Some(entry) = self.entries.get(conversation_id) else {
            return Vec::new();
        };
        let cutoff = self.now() - self.typing_ttl();
        entry
            .typing
            .iter()
            .filter(|(_, seen)| **seen > cutoff)
            .map(|(uid, _)| uid.clone())
            .collect()
    }

    /// Drop expired typing entries. Returns the conversations that changed.
    pub fn prune_typing(&mut self) -> Vec<ConversationId> {
        let cutoff = self.now() - self.typing_ttl();
        let mut changed = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            let before = entry.typing.len();
            entry.typing.retain(|_, seen| *seen > cutoff);
            if entry.typing.len() != before {
                changed.push(id.clone());
            }
        }
        for id in &changed {
            self.notify(StoreChange::TypingChanged(id.clone()));
        }
        changed
    }

    /// Set the viewer's own typing flag. Returns `false` if unchanged.
    pub fn set_self_typing(&mut self, conversation_id: &ConversationId, is_typing: bool) -> bool {
        match self.entries.get_mut(conversation_id) {
            Some(entry) if entry.self_typing != is_typing => {
                entry.self_typing = is_typing;
                true
            }
            _ => false,
        }
    }

    pub fn self_typing(&self, conversation_id: &ConversationId) -> bool {
        self.entries
            .get(conversation_id)
            .map(|e| e.self_typing)
            .unwrap_or(false)
    }
}
