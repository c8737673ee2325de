//! Ordered message sequence for one conversation.
//!
//! Display order is ascending `created_at`; equal timestamps keep arrival
//! order. Items are never re-sorted after insertion.

use std::collections::HashSet;

use chatsync_shared::{LocalId, MessageId, MessageRef};

use crate::models::{DeliveryStatus, Message};

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    items: Vec<Message>,
    remote_ids: HashSet<MessageId>,
}

impl Timeline {
    pub fn items(&self) -> &[Message] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_remote(&self, id: &MessageId) -> bool {
        self.remote_ids.contains(id)
    }

    /// Insert after every item with `created_at <= message.created_at`.
    /// Returns the index the message landed at.
    pub fn insert_ordered(&mut self, message: Message) -> usize {
        let idx = self
            .items
            .partition_point(|m| m.created_at <= message.created_at);
        if let Some(id) = message.message_id() {
            self.remote_ids.insert(id.clone());
        }
        self.items.insert(idx, message);
        idx
    }

    pub fn position(&self, reference: &MessageRef) -> Option<usize> {
        self.items.iter().position(|m| &m.reference == reference)
    }

    pub fn position_of_local(&self, local_id: LocalId) -> Option<usize> {
        self.items
            .iter()
            .position(|m| m.local_id() == Some(local_id))
    }

    pub fn position_of_remote(&self, id: &MessageId) -> Option<usize> {
        if !self.contains_remote(id) {
            return None;
        }
        self.items.iter().position(|m| m.message_id() == Some(id))
    }

    pub fn get(&self, reference: &MessageRef) -> Option<&Message> {
        self.position(reference).map(|idx| &self.items[idx])
    }

    pub fn get_remote(&self, id: &MessageId) -> Option<&Message> {
        self.position_of_remote(id).map(|idx| &self.items[idx])
    }

    pub(crate) fn get_remote_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let idx = self.position_of_remote(id)?;
        Some(&mut self.items[idx])
    }

    pub(crate) fn at_mut(&mut self, idx: usize) -> &mut Message {
        &mut self.items[idx]
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Message> {
        self.items.iter_mut()
    }

    pub(crate) fn remove_at(&mut self, idx: usize) -> Message {
        let removed = self.items.remove(idx);
        if let Some(id) = removed.message_id() {
            self.remote_ids.remove(id);
        }
        removed
    }

    /// Replace the item at `idx`.
    ///
    /// The replacement stays in place when its timestamp still fits between
    /// its neighbours, so confirming a send does not move it on screen.
    /// Otherwise it is re-inserted at its ordered position.
    pub(crate) fn replace_at(&mut self, idx: usize, message: Message) -> usize {
        let fits_before = idx == 0 || self.items[idx - 1].created_at <= message.created_at;
        let fits_after =
            idx + 1 >= self.items.len() || message.created_at <= self.items[idx + 1].created_at;

        if fits_before && fits_after {
            let old = std::mem::replace(&mut self.items[idx], message);
            if let Some(id) = old.message_id() {
                self.remote_ids.remove(id);
            }
            if let Some(id) = self.items[idx].message_id() {
                self.remote_ids.insert(id.clone());
            }
            idx
        } else {
            self.remove_at(idx);
            self.insert_ordered(message)
        }
    }

    /// Drop the oldest confirmed items until at most `max` remain.
    ///
    /// Pending and failed local messages are never evicted, so the buffer
    /// may stay above `max` while they are outstanding.
    pub(crate) fn trim_oldest(&mut self, max: usize) -> Vec<Message> {
        let mut excess = self.items.len().saturating_sub(max);
        if excess == 0 {
            return Vec::new();
        }
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.items.len());
        for m in self.items.drain(..) {
            if excess > 0 && m.status == DeliveryStatus::Sent {
                excess -= 1;
                if let Some(id) = m.message_id() {
                    self.remote_ids.remove(id);
                }
                evicted.push(m);
            } else {
                kept.push(m);
            }
        }
        self.items = kept;
        evicted
    }

    /// Oldest server-confirmed message; the backward paging cursor.
    pub fn oldest_remote_id(&self) -> Option<&MessageId> {
        self.items.iter().find_map(|m| m.message_id())
    }

    pub fn first_reference(&self) -> Option<&MessageRef> {
        self.items.first().map(|m| &m.reference)
    }
}
