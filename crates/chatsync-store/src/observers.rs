//! Change notification for UI layers.
//!
//! Listeners run synchronously inside the mutating call, so every change is
//! delivered exactly once and in mutation order. A listener must not call
//! back into the store.

use chatsync_shared::{ConversationId, MessageId, MessageRef};

use crate::pagination::PrependOutcome;

/// A single observable change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Conversation metadata, members, counters or unread count changed.
    ConversationUpdated(ConversationId),
    ConversationRemoved(ConversationId),
    /// A message was inserted, replaced, updated or removed.
    MessageChanged {
        conversation_id: ConversationId,
        reference: MessageRef,
    },
    /// Older history or media was loaded in front of what is displayed.
    HistoryPrepended(PrependOutcome),
    ReceiptsChanged {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    ReplyTargetChanged(ConversationId),
    TypingChanged(ConversationId),
    ActiveChanged(Option<ConversationId>),
}

impl StoreChange {
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::ConversationUpdated(id)
            | Self::ConversationRemoved(id)
            | Self::ReplyTargetChanged(id)
            | Self::TypingChanged(id) => Some(id),
            Self::MessageChanged {
                conversation_id, ..
            }
            | Self::ReceiptsChanged {
                conversation_id, ..
            } => Some(conversation_id),
            Self::HistoryPrepended(outcome) => Some(&outcome.conversation_id),
            Self::ActiveChanged(id) => id.as_ref(),
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

pub type Listener = Box<dyn FnMut(&StoreChange) + Send>;

struct Subscription {
    token: SubscriptionToken,
    /// `None` receives every change.
    scope: Option<ConversationId>,
    listener: Listener,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_token: u64,
    subscriptions: Vec<Subscription>,
}

impl ObserverRegistry {
    pub(crate) fn subscribe(
        &mut self,
        scope: Option<ConversationId>,
        listener: Listener,
    ) -> SubscriptionToken {
        self.next_token += 1;
        let token = SubscriptionToken(self.next_token);
        self.subscriptions.push(Subscription {
            token,
            scope,
            listener,
        });
        token
    }

    pub(crate) fn unsubscribe(&mut self, token: SubscriptionToken) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.token != token);
        self.subscriptions.len() != before
    }

    pub(crate) fn notify(&mut self, change: &StoreChange) {
        let target = change.conversation_id();
        for sub in &mut self.subscriptions {
            let wanted = match (&sub.scope, target) {
                (None, _) => true,
                (Some(scope), Some(id)) => scope == id,
                (Some(_), None) => false,
            };
            if wanted {
                (sub.listener)(change);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_scoped_and_global_listeners() {
        let mut registry = ObserverRegistry::default();
        let seen_all = Arc::new(Mutex::new(Vec::new()));
        let seen_c1 = Arc::new(Mutex::new(Vec::new()));

        let all = seen_all.clone();
        registry.subscribe(
            None,
            Box::new(move |c| all.lock().unwrap().push(c.clone())),
        );
        let c1 = seen_c1.clone();
        registry.subscribe(
            Some(ConversationId::new("c1")),
            Box::new(move |c| c1.lock().unwrap().push(c.clone())),
        );

        registry.notify(&StoreChange::TypingChanged(ConversationId::new("c1")));
        registry.notify(&StoreChange::TypingChanged(ConversationId::new("c2")));
        registry.notify(&StoreChange::ActiveChanged(None));

        assert_eq!(seen_all.lock().unwrap().len(), 3);
        assert_eq!(seen_c1.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut registry = ObserverRegistry::default();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let token = registry.subscribe(None, Box::new(move |_| *c.lock().unwrap() += 1));

        registry.notify(&StoreChange::ActiveChanged(None));
        assert!(registry.unsubscribe(token));
        assert!(!registry.unsubscribe(token));
        registry.notify(&StoreChange::ActiveChanged(None));

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(registry.len(), 0);
    }
}
