//! The async intent boundary.
//!
//! A [`Session`] owns the conversation store for one signed-in user and
//! turns UI intents into optimistic store changes plus transport calls.
//! Transport failures become state (a failed message, a rolled-back field)
//! instead of propagating as panics. The store lock is never held across an
//! `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chatsync_shared::{
    ConversationId, HistoryFilter, InboundEvent, LocalId, MessageId, MessageRef, Role,
    SenderInfo, SettingValue, UserId,
};
use chatsync_store::{
    BeginLoad, ConfirmOutcome, ConversationStore, Draft, IntentLedger, PageRequest, PrependOutcome,
    SettleOutcome, SnapshotOutcome, StoreChange, StoreError, SubscriptionToken,
};

use crate::config::SessionConfig;
use crate::error::{ClientError, Result, TransportError};
use crate::transport::Transport;

/// What happened to a send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReport {
    Sent {
        local_id: LocalId,
        message_id: MessageId,
        outcome: ConfirmOutcome,
    },
    /// The message stays visible as failed; `retry` resends it.
    Failed { local_id: LocalId, reason: String },
}

impl SendReport {
    pub fn local_id(&self) -> LocalId {
        match self {
            Self::Sent { local_id, .. } | Self::Failed { local_id, .. } => *local_id,
        }
    }
}

/// Outcome of a coalesced intent (typing, settings).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentOutcome {
    /// This call carried the final state to the backend.
    Applied,
    /// A newer call for the same key took over.
    Superseded,
    /// The backend already has this state; nothing was sent.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(PrependOutcome),
    Exhausted,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncReport {
    pub refreshed: Vec<ConversationId>,
    pub removed: Vec<ConversationId>,
    pub failed: Vec<(ConversationId, String)>,
}

type LoadKey = (ConversationId, HistoryFilter);
type SharedLoad = Shared<BoxFuture<'static, Result<LoadOutcome>>>;

#[derive(Debug, Default)]
struct TypingState {
    ledger: IntentLedger<ConversationId>,
    /// Last flag the backend acknowledged, per conversation.
    emitted: HashMap<ConversationId, bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Session {
    store: Arc<Mutex<ConversationStore>>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    typing: Mutex<TypingState>,
    loads: Arc<Mutex<HashMap<LoadKey, SharedLoad>>>,
}

impl Session {
    /// Start a session with a fresh store for `config.viewer`.
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        let viewer = SenderInfo {
            display_name: config.viewer_display_name.clone(),
            ..SenderInfo::new(config.viewer.clone())
        };
        let store = ConversationStore::new(viewer, config.store.clone());
        Self::from_store(store, config, transport)
    }

    /// Start a session around an existing store.
    pub fn from_store(store: ConversationStore, config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        info!(viewer = %store.viewer(), "Session started");
        Self {
            store: Arc::new(Mutex::new(store)),
            transport,
            config,
            typing: Mutex::new(TypingState::default()),
            loads: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Shared handle to the store, e.g. for a UI thread that renders views.
    pub fn store(&self) -> Arc<Mutex<ConversationStore>> {
        self.store.clone()
    }

    /// Run `f` with exclusive access to the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut ConversationStore) -> R) -> R {
        f(&mut lock(&self.store))
    }

    pub fn subscribe(
        &self,
        conversation_id: ConversationId,
        listener: impl FnMut(&StoreChange) + Send + 'static,
    ) -> SubscriptionToken {
        self.with_store(|s| s.subscribe(conversation_id, listener))
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.with_store(|s| s.unsubscribe(token))
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Send a message: it shows as pending at once and is reconciled with
    /// the server's ack, or marked failed.
    pub async fn send_message(&self, conversation_id: &ConversationId, draft: Draft) -> Result<SendReport> {
        let local_id = self.with_store(|s| s.send_optimistic(conversation_id, draft))?;
        self.deliver(local_id).await
    }

    /// Send as a reply to the conversation's reply target, consuming it.
    pub async fn send_with_reply(&self, conversation_id: &ConversationId, draft: Draft) -> Result<SendReport> {
        let local_id = self.with_store(|s| s.send_with_reply(conversation_id, draft))?;
        self.deliver(local_id).await
    }

    /// Resend a failed message under a new local ID.
    pub async fn retry(&self, local_id: LocalId) -> Result<SendReport> {
        let local_id = self.with_store(|s| s.retry_failed(local_id))?;
        self.deliver(local_id).await
    }

    async fn deliver(&self, local_id: LocalId) -> Result<SendReport> {
        let request = self
            .with_store(|s| s.send_request(local_id))
            .ok_or(StoreError::MessageNotFound(MessageRef::Local(local_id)))?;

        let result = tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send_message(request),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout));

        match result {
            Ok(server) => {
                let message_id = server.message_id.clone();
                let outcome = self.with_store(|s| s.confirm_sent(local_id, server));
                Ok(SendReport::Sent {
                    local_id,
                    message_id,
                    outcome,
                })
            }
            Err(e) => {
                let reason = e.to_string();
                self.with_store(|s| s.mark_failed(local_id, reason.clone()));
                Ok(SendReport::Failed { local_id, reason })
            }
        }
    }

    /// Mark everything up to `message_id` read, locally first.
    pub async fn mark_read(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<()> {
        self.with_store(|s| s.mark_read(conversation_id, message_id))?;
        self.transport
            .mark_read(conversation_id, message_id)
            .await
            .map_err(ClientError::from)
    }

    // -----------------------------------------------------------------------
    // Coalesced intents
    // -----------------------------------------------------------------------

    /// Set the viewer's typing flag.
    ///
    /// The local flag changes immediately; the network call waits for the
    /// debounce period and is skipped if a newer call arrived meanwhile or
    /// the backend already has the same flag.
    pub async fn set_typing(&self, conversation_id: &ConversationId, is_typing: bool) -> Result<IntentOutcome> {
        self.with_store(|s| {
            s.get(conversation_id)
                .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))?;
            s.set_self_typing(conversation_id, is_typing);
            Ok::<_, StoreError>(())
        })?;
        let token = lock(&self.typing).ledger.issue(conversation_id.clone());

        tokio::time::sleep(self.config.typing_debounce).await;

        {
            let mut typing = lock(&self.typing);
            if !typing.ledger.settle(conversation_id, token) {
                return Ok(IntentOutcome::Superseded);
            }
            let last = typing.emitted.get(conversation_id).copied().unwrap_or(false);
            if last == is_typing {
                return Ok(IntentOutcome::Unchanged);
            }
            typing.emitted.insert(conversation_id.clone(), is_typing);
        }

        if let Err(e) = self.transport.set_typing(conversation_id, is_typing).await {
            warn!(conversation = %conversation_id, error = %e, "Typing update failed");
            lock(&self.typing).emitted.remove(conversation_id);
            return Err(e.into());
        }
        Ok(IntentOutcome::Applied)
    }

    /// Update group settings.
    ///
    /// Values show immediately. After the debounce period only fields whose
    /// latest write is this call are sent; a rejection rolls them back to
    /// the last server value and records a field error.
    pub async fn update_group_settings(
        &self,
        conversation_id: &ConversationId,
        changes: Vec<SettingValue>,
    ) -> Result<IntentOutcome> {
        if changes.is_empty() {
            return Ok(IntentOutcome::Unchanged);
        }
        let tokens = self.with_store(|s| {
            let allowed = s
                .permissions(conversation_id)
                .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))?
                .can_update_settings;
            if !allowed {
                return Err(StoreError::PermissionDenied("cannot update settings".into()));
            }
            let mut tokens = Vec::with_capacity(changes.len());
            for value in changes {
                let token = s.begin_setting_write(conversation_id, value.clone())?;
                tokens.push((value, token));
            }
            Ok(tokens)
        })?;

        tokio::time::sleep(self.config.settings_debounce).await;

        let current: Vec<_> = self.with_store(|s| {
            tokens
                .into_iter()
                .filter(|(value, token)| s.is_setting_current(conversation_id, value.field(), *token))
                .collect()
        });
        if current.is_empty() {
            debug!(conversation = %conversation_id, "Settings write superseded before sending");
            return Ok(IntentOutcome::Superseded);
        }

        let values = current.iter().map(|(v, _)| v.clone()).collect();
        let result = self
            .transport
            .update_group_settings(conversation_id, values)
            .await;

        let reason = result.as_ref().err().map(ToString::to_string);
        let outcomes: Vec<SettleOutcome> = self.with_store(|s| {
            current
                .iter()
                .map(|(value, token)| {
                    let settled = match &reason {
                        None => Ok(()),
                        Some(r) => Err(r.clone()),
                    };
                    s.settle_setting_write(conversation_id, value, *token, settled)
                })
                .collect()
        });

        match result {
            Ok(()) if outcomes.contains(&SettleOutcome::Confirmed) => Ok(IntentOutcome::Applied),
            Ok(()) => Ok(IntentOutcome::Superseded),
            Err(e) if outcomes.contains(&SettleOutcome::RolledBack) => Err(e.into()),
            Err(_) => Ok(IntentOutcome::Superseded),
        }
    }

    // -----------------------------------------------------------------------
    // Group administration
    // -----------------------------------------------------------------------

    /// Kick a member, optimistically. Rolled back if the backend refuses.
    pub async fn kick_member(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<()> {
        let previous = self.with_store(|s| s.kick_member_local(conversation_id, uid))?;
        match self.transport.kick_member(conversation_id, uid).await {
            Ok(()) => {
                info!(conversation = %conversation_id, member = %uid, "Member kicked");
                Ok(())
            }
            Err(e) => {
                warn!(conversation = %conversation_id, member = %uid, error = %e, "Kick failed, rolling back");
                self.with_store(|s| s.restore_member(conversation_id, previous));
                Err(e.into())
            }
        }
    }

    /// Change a member's role, optimistically. Rolled back if the backend
    /// refuses.
    pub async fn change_role(&self, conversation_id: &ConversationId, uid: &UserId, role: Role) -> Result<()> {
        let previous = self.with_store(|s| s.set_role_local(conversation_id, uid, role))?;
        match self.transport.change_role(conversation_id, uid, role).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(conversation = %conversation_id, member = %uid, error = %e, "Role change failed, rolling back");
                self.with_store(|s| s.restore_member(conversation_id, previous));
                Err(e.into())
            }
        }
    }

    /// Leave a group. The conversation is dropped once the backend confirms.
    pub async fn leave_group(&self, conversation_id: &ConversationId) -> Result<()> {
        let allowed = self
            .with_store(|s| s.permissions(conversation_id))
            .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.clone()))?
            .can_leave;
        if !allowed {
            return Err(StoreError::PermissionDenied("cannot leave this conversation".into()).into());
        }

        self.transport.leave_group(conversation_id).await?;
        self.with_store(|s| s.remove(conversation_id));
        info!(conversation = %conversation_id, "Left group");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Load one older page for `(conversation, filter)`.
    ///
    /// Calls made while a load for the same pair is running do not fetch;
    /// they resolve to the running load's result.
    pub async fn load_more(&self, conversation_id: &ConversationId, filter: HistoryFilter) -> Result<LoadOutcome> {
        let key = (conversation_id.clone(), filter);
        let shared = {
            let mut loads = lock(&self.loads);
            match loads.get(&key) {
                Some(running) => running.clone(),
                None => {
                    let begin =
                        self.with_store(|s| s.begin_load(conversation_id, filter, self.config.page_size))?;
                    let request = match begin {
                        BeginLoad::Fetch(request) => request,
                        BeginLoad::Exhausted => return Ok(LoadOutcome::Exhausted),
                        BeginLoad::InFlight => {
                            return Err(StoreError::Conflict(format!(
                                "untracked load in flight for {conversation_id}/{filter}"
                            ))
                            .into())
                        }
                    };
                    let shared = self.spawn_load(key.clone(), request);
                    loads.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    fn spawn_load(&self, key: LoadKey, request: PageRequest) -> SharedLoad {
        let transport = self.transport.clone();
        let store = self.store.clone();
        let loads = self.loads.clone();

        let handle = tokio::spawn(async move {
            debug!(conversation = %request.conversation_id, filter = %request.filter, "Fetching history");
            let fetched = transport
                .fetch_history(
                    &request.conversation_id,
                    request.filter,
                    request.before.clone(),
                    request.limit,
                )
                .await;

            // Releasing the cursor and forgetting the shared load happen
            // under both locks, so no caller sees one without the other.
            let mut loads = lock(&loads);
            let mut store = lock(&store);
            loads.remove(&key);
            match fetched {
                Ok(page) => store
                    .complete_load(&request.conversation_id, request.filter, page)
                    .map(LoadOutcome::Loaded)
                    .map_err(ClientError::from),
                Err(e) => {
                    warn!(conversation = %request.conversation_id, error = %e, "History fetch failed");
                    store.fail_load(&request.conversation_id, request.filter);
                    Err(e.into())
                }
            }
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ClientError::TransportFailure(format!("history task failed: {e}"))))
        }
        .boxed()
        .shared()
    }

    // -----------------------------------------------------------------------
    // Server truth
    // -----------------------------------------------------------------------

    /// Fetch a conversation's snapshot and make it the active one.
    pub async fn open(&self, conversation_id: &ConversationId) -> Result<SnapshotOutcome> {
        let snapshot = self.transport.fetch_conversation(conversation_id).await?;
        self.with_store(|s| {
            let outcome = s.apply_snapshot(snapshot)?;
            if outcome == SnapshotOutcome::Applied {
                s.set_active(Some(conversation_id));
            }
            Ok::<_, StoreError>(outcome)
        })
        .map_err(ClientError::from)
    }

    /// Re-fetch every held conversation after a reconnect.
    ///
    /// Everything is marked stale first; a conversation stays stale if its
    /// fetch fails.
    pub async fn resync(&self) -> ResyncReport {
        let ids = self.with_store(|s| {
            s.mark_all_stale();
            s.conversation_ids().to_vec()
        });
        info!(count = ids.len(), "Resyncing conversations");

        let fetches = ids.iter().map(|id| self.transport.fetch_conversation(id));
        let results = join_all(fetches).await;

        let mut report = ResyncReport::default();
        self.with_store(|s| {
            for (id, result) in ids.into_iter().zip(results) {
                match result.map_err(ClientError::from).and_then(|snapshot| {
                    s.apply_snapshot(snapshot).map_err(ClientError::from)
                }) {
                    Ok(SnapshotOutcome::Applied) => report.refreshed.push(id),
                    Ok(SnapshotOutcome::Removed) => report.removed.push(id),
                    Err(e) => {
                        warn!(conversation = %id, error = %e, "Resync failed");
                        report.failed.push((id, e.to_string()));
                    }
                }
            }
        });
        report
    }

    /// Apply one inbound event.
    pub fn handle_event(&self, event: InboundEvent) -> bool {
        self.with_store(|s| s.apply_event(event))
    }

    /// Drain inbound events in order until the sender is dropped, pruning
    /// expired typing indicators along the way.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        let period = (self.config.store.typing_ttl / 2).max(Duration::from_millis(100));
        let mut prune = tokio::time::interval(period);
        prune.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Event pump started");
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        self.handle_event(event);
                    }
                    None => break,
                },
                _ = prune.tick() => {
                    self.with_store(|s| s.prune_typing());
                }
            }
        }
        info!("Event stream closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
