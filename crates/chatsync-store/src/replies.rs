//! Reply context: at most one pending reply target per conversation.

use tracing::debug;

use chatsync_shared::{ConversationId, LocalId, MessageId, MessageRef};

use crate::error::{Result, StoreError};
use crate::models::{Draft, ReplyTarget};
use crate::observers::StoreChange;
use crate::store::ConversationStore;

impl ConversationStore {
    /// Reply to `message_id` with the next send. Replaces any earlier target.
    pub fn set_reply_target(&mut self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<()> {
        let entry = self.entry_mut(conversation_id)?;
        let message = entry
            .timeline
            .get_remote(message_id)
            .ok_or_else(|| StoreError::MessageNotFound(MessageRef::Remote(message_id.clone())))?;
        if message.is_recalled {
            return Err(StoreError::InvalidArgument(format!(
                "cannot reply to recalled message {message_id}"
            )));
        }

        entry.reply_target = Some(ReplyTarget {
            message_id: message_id.clone(),
            sender: message.sender.clone(),
            content: message.content.clone(),
        });
        self.notify(StoreChange::ReplyTargetChanged(conversation_id.clone()));
        Ok(())
    }

    /// Drop the reply target. No-op if none is set.
    pub fn clear_reply_target(&mut self, conversation_id: &ConversationId) -> bool {
        let cleared = self
            .entries
            .get_mut(conversation_id)
            .and_then(|e| e.reply_target.take())
            .is_some();
        if cleared {
            self.notify(StoreChange::ReplyTargetChanged(conversation_id.clone()));
        }
        cleared
    }

    pub fn reply_target(&self, conversation_id: &ConversationId) -> Option<&ReplyTarget> {
        self.entries.get(conversation_id)?.reply_target.as_ref()
    }

    /// Send `draft` as a reply to the current target and consume the target.
    ///
    /// Without a target this is a plain optimistic send.
    pub fn send_with_reply(&mut self, conversation_id: &ConversationId, mut draft: Draft) -> Result<LocalId> {
        if let Some(target) = self.reply_target(conversation_id) {
            draft.reply_to = Some(target.to_preview());
        }
        let local_id = self.send_optimistic(conversation_id, draft)?;
        if self.clear_reply_target(conversation_id) {
            debug!(conversation = %conversation_id, %local_id, "Reply target consumed");
        }
        Ok(local_id)
    }
}
