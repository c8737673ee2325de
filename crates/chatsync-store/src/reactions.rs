//! Emoji reactions on messages.

use std::collections::BTreeMap;

use chatsync_shared::{ConversationId, MessageId, MessageRef, UserId};

use crate::observers::StoreChange;
use crate::store::ConversationStore;

impl ConversationStore {
    /// Replace a message's reactions with the server's full set.
    ///
    /// Emojis without users are dropped and users are de-duplicated. Ignored
    /// for messages not held locally or already recalled.
    pub fn apply_reactions(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        reactions: BTreeMap<String, Vec<UserId>>,
    ) -> bool {
        let Some(message) = self
            .entries
            .get_mut(conversation_id)
            .and_then(|e| e.timeline.get_remote_mut(message_id))
        else {
            return false;
        };
        if message.is_recalled {
            return false;
        }

        let normalized: BTreeMap<String, Vec<UserId>> = reactions
            .into_iter()
            .filter_map(|(emoji, mut users)| {
                users.sort();
                users.dedup();
                (!users.is_empty()).then_some((emoji, users))
            })
            .collect();
        if message.reactions == normalized {
            return false;
        }
        message.reactions = normalized;

        self.notify(StoreChange::MessageChanged {
            conversation_id: conversation_id.clone(),
            reference: MessageRef::Remote(message_id.clone()),
        });
        true
    }

    /// Users who reacted with `emoji`.
    pub fn reactors(
        &self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        emoji: &str,
    ) -> &[UserId] {
        self.entries
            .get(conversation_id)
            .and_then(|e| e.timeline.get_remote(message_id))
            .and_then(|m| m.reactions.get(emoji))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
