//! Message reconciliation: optimistic sends, server acks and inbound
//! messages, recalls and edits.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use chatsync_shared::constants::COUNTER_TOTAL_MESSAGES;
use chatsync_shared::{
    ConversationId, HistoryFilter, LocalId, MessageId, MessageRef, SendMessageRequest,
    ServerMessage,
};

use crate::error::{Result, StoreError};
use crate::models::{DeliveryStatus, Draft, Message};
use crate::observers::StoreChange;
use crate::store::{ConversationEntry, ConversationStore};

/// How a server ack was reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The pending entry was replaced by the server record.
    Replaced,
    /// The server record had already arrived as an inbound message; the
    /// pending entry was dropped.
    AlreadyPresent,
    /// No entry carried the local ID; a pending entry with the same sender,
    /// content and close send time was replaced instead.
    MatchedPending,
    /// Nothing matched; the server record was inserted as new.
    Inserted,
    /// The conversation is no longer held.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Duplicate,
}

impl ConversationEntry {
    /// Counters and media galleries follow every newly confirmed message.
    fn count_new_message(&mut self, message: &Message) {
        if message.is_recalled {
            return;
        }
        self.conversation.bump_counter(COUNTER_TOTAL_MESSAGES);
        if let Some(kind) = message.attachment.as_ref().map(|a| a.kind) {
            self.conversation.bump_counter(kind.counter_name());
            if let (Some(gallery), Some(id)) = (self.media.get_mut(&kind), message.message_id()) {
                if !gallery.contains_remote(id) {
                    gallery.insert_ordered(message.clone());
                }
            }
        }
    }

    /// Enforce the timeline bound. Only confirmed messages are evicted.
    fn trim_timeline(&mut self, max: usize) {
        let evicted = self.timeline.trim_oldest(max);
        if !evicted.is_empty() {
            // The evicted range can be paged back in.
            self.cursors.entry(HistoryFilter::All).or_default().has_more = true;
        }
    }
}

impl ConversationStore {
    /// Show a message immediately as `Pending` and return its local ID.
    pub fn send_optimistic(&mut self, conversation_id: &ConversationId, draft: Draft) -> Result<LocalId> {
        if draft.is_empty() {
            return Err(StoreError::InvalidArgument(
                "cannot send an empty message".into(),
            ));
        }

        let now = self.now();
        let sender = self.viewer.clone();
        let max = self.config.max_timeline_items;
        let local_id = LocalId::new();

        let entry = self.entry_mut(conversation_id)?;
        entry.timeline.insert_ordered(Message::pending(
            local_id,
            conversation_id.clone(),
            sender,
            draft,
            now,
        ));
        entry.trim_timeline(max);
        self.local_index.insert(local_id, conversation_id.clone());

        debug!(conversation = %conversation_id, %local_id, "Optimistic message inserted");
        self.notify(StoreChange::MessageChanged {
            conversation_id: conversation_id.clone(),
            reference: MessageRef::Local(local_id),
        });
        Ok(local_id)
    }

    /// The `sendMessage` payload for an unconfirmed message.
    pub fn send_request(&self, local_id: LocalId) -> Option<SendMessageRequest> {
        let message = self.resolve_local(local_id)?;
        Some(SendMessageRequest {
            conversation_id: message.conversation_id.clone(),
            client_ref: local_id,
            content: message.content.clone(),
            attachment: message.attachment.clone(),
            reply_to_id: message.reply_to.as_ref().map(|r| r.message_id.clone()),
        })
    }

    /// Reconcile a server ack with the optimistic entry it belongs to.
    pub fn confirm_sent(&mut self, local_id: LocalId, server: ServerMessage) -> ConfirmOutcome {
        let conversation_id = self
            .local_index
            .remove(&local_id)
            .unwrap_or_else(|| server.conversation_id.clone());
        let dedupe_window = self.config.dedupe_window;

        let Some(entry) = self.entries.get_mut(&conversation_id) else {
            warn!(conversation = %conversation_id, %local_id, "Ack for a dropped conversation");
            return ConfirmOutcome::Dropped;
        };

        let already_present = entry.timeline.contains_remote(&server.message_id);
        let pending_idx = entry.timeline.position_of_local(local_id);

        let (outcome, idx) = match (pending_idx, already_present) {
            (Some(idx), true) => {
                entry.timeline.remove_at(idx);
                debug!(conversation = %conversation_id, %local_id, "Ack raced the inbound copy");
                self.notify(StoreChange::MessageChanged {
                    conversation_id,
                    reference: MessageRef::Local(local_id),
                });
                return ConfirmOutcome::AlreadyPresent;
            }
            (None, true) => return ConfirmOutcome::AlreadyPresent,
            (Some(idx), false) => (ConfirmOutcome::Replaced, Some(idx)),
            (None, false) => {
                let window = chrono::Duration::from_std(dedupe_window)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let matched = entry.timeline.items().iter().position(|m| {
                    let skew = if m.created_at > server.created_at {
                        m.created_at - server.created_at
                    } else {
                        server.created_at - m.created_at
                    };
                    m.status != DeliveryStatus::Sent
                        && m.is_from(&server.sender.uid)
                        && m.content == server.content
                        && skew <= window
                });
                match matched {
                    Some(idx) => (ConfirmOutcome::MatchedPending, Some(idx)),
                    None => (ConfirmOutcome::Inserted, None),
                }
            }
        };

        let Some(idx) = idx else {
            self.insert_remote(server, true);
            return outcome;
        };

        let replaced_local = entry.timeline.items()[idx].local_id();
        let message = Message::from(server);
        let reference = message.reference.clone();
        entry.count_new_message(&message);
        entry.timeline.replace_at(idx, message);
        if let Some(stale) = replaced_local {
            self.local_index.remove(&stale);
        }

        info!(conversation = %conversation_id, %local_id, message = %reference, "Message confirmed");
        self.notify(StoreChange::MessageChanged {
            conversation_id: conversation_id.clone(),
            reference,
        });
        self.notify(StoreChange::ConversationUpdated(conversation_id));
        outcome
    }

    /// Flag an unconfirmed message as failed. It stays visible for a retry.
    pub fn mark_failed(&mut self, local_id: LocalId, reason: impl Into<String>) -> bool {
        let Some(conversation_id) = self.local_index.get(&local_id).cloned() else {
            return false;
        };
        let Some(entry) = self.entries.get_mut(&conversation_id) else {
            return false;
        };
        let Some(idx) = entry.timeline.position_of_local(local_id) else {
            return false;
        };

        let reason = reason.into();
        let message = entry.timeline.at_mut(idx);
        message.status = DeliveryStatus::Failed;
        message.failure_reason = Some(reason.clone());

        warn!(conversation = %conversation_id, %local_id, %reason, "Message send failed");
        self.notify(StoreChange::MessageChanged {
            conversation_id,
            reference: MessageRef::Local(local_id),
        });
        true
    }

    /// Resend a failed message as a fresh optimistic entry.
    pub fn retry_failed(&mut self, local_id: LocalId) -> Result<LocalId> {
        let not_found = || StoreError::MessageNotFound(MessageRef::Local(local_id));
        let conversation_id = self
            .local_index
            .get(&local_id)
            .cloned()
            .ok_or_else(not_found)?;

        let entry = self.entry_mut(&conversation_id)?;
        let idx = entry
            .timeline
            .position_of_local(local_id)
            .ok_or_else(not_found)?;
        if entry.timeline.items()[idx].status != DeliveryStatus::Failed {
            return Err(StoreError::InvalidArgument(format!(
                "message {local_id} has not failed"
            )));
        }

        let failed = entry.timeline.remove_at(idx);
        self.local_index.remove(&local_id);
        self.notify(StoreChange::MessageChanged {
            conversation_id: conversation_id.clone(),
            reference: MessageRef::Local(local_id),
        });

        debug!(conversation = %conversation_id, %local_id, "Retrying failed message");
        self.send_optimistic(&conversation_id, failed.to_draft())
    }

    /// Insert a message pushed by the server. Duplicate deliveries are no-ops.
    ///
    /// A message for an unknown conversation creates a stale placeholder.
    pub fn ingest_server_message(&mut self, server: ServerMessage) -> IngestOutcome {
        self.insert_remote(server, true)
    }

    /// Insert a server record unless its ID is already held.
    ///
    /// `live` messages are new to the conversation and move its counters and
    /// unread count; snapshot and history messages do not.
    pub(crate) fn insert_remote(&mut self, server: ServerMessage, live: bool) -> IngestOutcome {
        let conversation_id = server.conversation_id.clone();
        let created = !self.entries.contains_key(&conversation_id);
        let counts_as_unread = live
            && server.sender.uid != self.viewer.uid
            && self.active.as_ref() != Some(&conversation_id);
        let max = self.config.max_timeline_items;

        let entry = self.entry_or_placeholder(&conversation_id);
        if entry.timeline.contains_remote(&server.message_id) {
            debug!(conversation = %conversation_id, message = %server.message_id, "Duplicate message ignored");
            return IngestOutcome::Duplicate;
        }

        let message = Message::from(server);
        let reference = message.reference.clone();
        if live {
            entry.count_new_message(&message);
            if counts_as_unread && !message.is_recalled {
                entry.unread_count += 1;
            }
        }
        entry.timeline.insert_ordered(message);
        entry.trim_timeline(max);

        if created || live {
            self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        }
        self.notify(StoreChange::MessageChanged {
            conversation_id,
            reference,
        });
        IngestOutcome::Inserted
    }

    /// Tombstone a message. Replies quoting it lose their preview and a
    /// reply target pointing at it is cleared.
    ///
    /// Ignored if the message is not held locally.
    pub fn apply_recall(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        recalled_at: DateTime<Utc>,
    ) -> bool {
        let Some(entry) = self.entries.get_mut(conversation_id) else {
            return false;
        };
        let Some(message) = entry.timeline.get_remote_mut(message_id) else {
            debug!(conversation = %conversation_id, message = %message_id, "Recall for unknown message ignored");
            return false;
        };

        let mut changed = vec![MessageRef::Remote(message_id.clone())];
        if message.is_recalled {
            if message.recalled_at == Some(recalled_at) {
                return false;
            }
            message.recalled_at = Some(recalled_at);
        } else {
            message.tombstone(recalled_at);

            for reply in entry.timeline.iter_mut() {
                if let Some(preview) = reply.reply_to.as_mut() {
                    if &preview.message_id == message_id && !preview.is_recalled {
                        preview.is_recalled = true;
                        preview.content.clear();
                        changed.push(reply.reference.clone());
                    }
                }
            }
            for gallery in entry.media.values_mut() {
                if let Some(idx) = gallery.position_of_remote(message_id) {
                    gallery.remove_at(idx);
                }
            }
        }

        let target_cleared = entry
            .reply_target
            .as_ref()
            .map(|t| &t.message_id == message_id)
            .unwrap_or(false);
        if target_cleared {
            entry.reply_target = None;
        }

        info!(conversation = %conversation_id, message = %message_id, "Message recalled");
        for reference in changed {
            self.notify(StoreChange::MessageChanged {
                conversation_id: conversation_id.clone(),
                reference,
            });
        }
        if target_cleared {
            self.notify(StoreChange::ReplyTargetChanged(conversation_id.clone()));
        }
        true
    }

    /// Replace a message's content. Ignored if the message is not held, was
    /// recalled, or already carries an edit at least as recent.
    pub fn apply_edit(
        &mut self,
        conversation_id: &ConversationId,
        message_id: &MessageId,
        content: String,
        edited_at: DateTime<Utc>,
    ) -> bool {
        let Some(message) = self
            .entries
            .get_mut(conversation_id)
            .and_then(|e| e.timeline.get_remote_mut(message_id))
        else {
            return false;
        };
        if message.is_recalled || message.edited_at.map_or(false, |prev| prev >= edited_at) {
            return false;
        }

        message.content = content;
        message.edited_at = Some(edited_at);
        self.notify(StoreChange::MessageChanged {
            conversation_id: conversation_id.clone(),
            reference: MessageRef::Remote(message_id.clone()),
        });
        true
    }

    /// Messages of a conversation in display order.
    pub fn messages(&self, conversation_id: &ConversationId) -> &[Message] {
        self.entries
            .get(conversation_id)
            .map(|e| e.timeline.items())
            .unwrap_or(&[])
    }

    pub fn message(&self, conversation_id: &ConversationId, reference: &MessageRef) -> Option<&Message> {
        self.entries.get(conversation_id)?.timeline.get(reference)
    }

    /// Find an unconfirmed message by local ID. `None` once the server
    /// confirmed it.
    pub fn resolve_local(&self, local_id: LocalId) -> Option<&Message> {
        let conversation_id = self.local_index.get(&local_id)?;
        self.message(conversation_id, &MessageRef::Local(local_id))
    }
}
