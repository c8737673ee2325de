//! Optimistic group settings writes.
//!
//! The new value is shown immediately. Only the latest write per field is
//! allowed to reach the server and to settle; a failed latest write restores
//! the last server-known value and leaves a field-level error behind.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use chatsync_shared::{ConversationId, SettingField, SettingValue};

use crate::coalesce::{IntentToken, PendingSetting};
use crate::error::Result;
use crate::observers::StoreChange;
use crate::store::ConversationStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    Confirmed,
    RolledBack,
    /// A newer write for the same field exists; this result was discarded.
    Superseded,
}

impl ConversationStore {
    /// Apply a settings value locally and return the token its network call
    /// must present when it settles.
    pub fn begin_setting_write(
        &mut self,
        conversation_id: &ConversationId,
        value: SettingValue,
    ) -> Result<IntentToken> {
        let field = value.field();
        self.entry(conversation_id)?;
        let token = self
            .setting_ledger
            .issue((conversation_id.clone(), field));

        let entry = self.entry_mut(conversation_id)?;
        let baseline = match entry.pending_settings.get(&field) {
            Some(pending) => pending.baseline.clone(),
            None => SettingValue::read(&entry.conversation, field),
        };
        value.write(&mut entry.conversation);
        entry.setting_errors.remove(&field);
        entry.pending_settings.insert(
            field,
            PendingSetting {
                token,
                baseline,
                optimistic: value,
            },
        );

        debug!(conversation = %conversation_id, ?field, "Setting applied optimistically");
        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        Ok(token)
    }

    /// Whether `token` is still the latest write for `field`.
    pub fn is_setting_current(
        &self,
        conversation_id: &ConversationId,
        field: SettingField,
        token: IntentToken,
    ) -> bool {
        self.setting_ledger
            .is_current(&(conversation_id.clone(), field), token)
    }

    /// Settle the write of `value` with the server's answer.
    ///
    /// A superseded write that the server accepted still becomes the
    /// baseline a later failure rolls back to.
    pub fn settle_setting_write(
        &mut self,
        conversation_id: &ConversationId,
        value: &SettingValue,
        token: IntentToken,
        result: std::result::Result<(), String>,
    ) -> SettleOutcome {
        let field = value.field();
        if !self
            .setting_ledger
            .settle(&(conversation_id.clone(), field), token)
        {
            debug!(conversation = %conversation_id, ?field, "Discarding superseded setting result");
            if result.is_ok() {
                if let Some(pending) = self
                    .entries
                    .get_mut(conversation_id)
                    .and_then(|e| e.pending_settings.get_mut(&field))
                {
                    pending.baseline = value.clone();
                }
            }
            return SettleOutcome::Superseded;
        }

        let Ok(entry) = self.entry_mut(conversation_id) else {
            return SettleOutcome::Superseded;
        };
        let Some(pending) = entry
            .pending_settings
            .remove(&field)
            .filter(|p| p.token == token)
        else {
            return SettleOutcome::Superseded;
        };

        let outcome = match result {
            Ok(()) => SettleOutcome::Confirmed,
            Err(reason) => {
                warn!(conversation = %conversation_id, ?field, %reason, "Setting rejected, rolling back");
                pending.baseline.write(&mut entry.conversation);
                entry.setting_errors.insert(field, reason);
                SettleOutcome::RolledBack
            }
        };

        self.notify(StoreChange::ConversationUpdated(conversation_id.clone()));
        outcome
    }

    /// Field-level errors of the last rejected writes.
    pub fn setting_errors(&self, conversation_id: &ConversationId) -> BTreeMap<SettingField, String> {
        self.entries
            .get(conversation_id)
            .map(|e| e.setting_errors.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use chatsync_shared::{
        Conversation, ConversationPatch, JoinMode, Member, MessagePermission, Role, SenderInfo,
        UserId,
    };

    use super::*;
    use crate::config::StoreConfig;

    fn store_with_group() -> (ConversationStore, ConversationId) {
        let mut s =
            ConversationStore::new(SenderInfo::new(UserId::new("me")), StoreConfig::default());
        let id = ConversationId::new("g1");
        s.create_conversation(Conversation::group(
            id.clone(),
            "team",
            vec![Member::new(UserId::new("me"), Some(Role::Owner), Utc::now())],
        ))
        .unwrap();
        (s, id)
    }

    #[test]
    fn test_applies_immediately_and_confirms() {
        let (mut s, id) = store_with_group();
        let token = s
            .begin_setting_write(&id, SettingValue::JoinMode(JoinMode::Link))
            .unwrap();
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Link);

        let outcome = s.settle_setting_write(&id, &SettingValue::JoinMode(JoinMode::Link), token, Ok(()));
        assert_eq!(outcome, SettleOutcome::Confirmed);
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Link);
    }

    #[test]
    fn test_superseded_result_is_discarded() {
        let (mut s, id) = store_with_group();
        let first = s
            .begin_setting_write(&id, SettingValue::JoinMode(JoinMode::Link))
            .unwrap();
        let second = s
            .begin_setting_write(&id, SettingValue::JoinMode(JoinMode::Approval))
            .unwrap();
        assert!(!s.is_setting_current(&id, SettingField::JoinMode, first));

        let outcome = s.settle_setting_write(
            &id,
            &SettingValue::JoinMode(JoinMode::Link),
            first,
            Err("boom".into()),
        );
        assert_eq!(outcome, SettleOutcome::Superseded);
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Approval);
        assert!(s.setting_errors(&id).is_empty());

        let outcome = s.settle_setting_write(
            &id,
            &SettingValue::JoinMode(JoinMode::Approval),
            second,
            Ok(()),
        );
        assert_eq!(outcome, SettleOutcome::Confirmed);
    }

    #[test]
    fn test_accepted_superseded_write_becomes_rollback_target() {
        let (mut s, id) = store_with_group();
        let link = SettingValue::JoinMode(JoinMode::Link);
        let approval = SettingValue::JoinMode(JoinMode::Approval);
        let first = s.begin_setting_write(&id, link.clone()).unwrap();
        let second = s.begin_setting_write(&id, approval.clone()).unwrap();

        let outcome = s.settle_setting_write(&id, &link, first, Ok(()));
        assert_eq!(outcome, SettleOutcome::Superseded);
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Approval);

        let outcome = s.settle_setting_write(&id, &approval, second, Err("closed".into()));
        assert_eq!(outcome, SettleOutcome::RolledBack);
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Link);
    }

    #[test]
    fn test_failure_restores_last_server_value() {
        let (mut s, id) = store_with_group();
        s.begin_setting_write(
            &id,
            SettingValue::MessagePermission(MessagePermission::AdminsOnly),
        )
        .unwrap();
        let latest = s
            .begin_setting_write(&id, SettingValue::MessagePermission(MessagePermission::All))
            .unwrap();
        s.begin_setting_write(&id, SettingValue::JoinMode(JoinMode::Link))
            .unwrap();

        // Rollback goes to the value before the first unsettled write, not
        // to the intermediate optimistic one.
        let latest = {
            let again = s
                .begin_setting_write(
                    &id,
                    SettingValue::MessagePermission(MessagePermission::AdminsOnly),
                )
                .unwrap();
            assert!(!s.is_setting_current(&id, SettingField::MessagePermission, latest));
            again
        };
        let outcome = s.settle_setting_write(
            &id,
            &SettingValue::MessagePermission(MessagePermission::AdminsOnly),
            latest,
            Err("not allowed".into()),
        );
        assert_eq!(outcome, SettleOutcome::RolledBack);
        assert_eq!(s.get(&id).unwrap().message_permission, MessagePermission::All);
        assert_eq!(
            s.setting_errors(&id).get(&SettingField::MessagePermission).map(String::as_str),
            Some("not allowed")
        );
        // Unrelated field keeps its optimistic value.
        assert_eq!(s.get(&id).unwrap().join_mode, JoinMode::Link);
    }

    #[test]
    fn test_server_update_moves_rollback_baseline() {
        let (mut s, id) = store_with_group();
        let token = s
            .begin_setting_write(&id, SettingValue::Name(Some("draft".into())))
            .unwrap();

        s.upsert(
            &id,
            ConversationPatch {
                name: Some("renamed elsewhere".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(s.get(&id).unwrap().name.as_deref(), Some("draft"));

        s.settle_setting_write(
            &id,
            &SettingValue::Name(Some("draft".into())),
            token,
            Err("rejected".into()),
        );
        assert_eq!(
            s.get(&id).unwrap().name.as_deref(),
            Some("renamed elsewhere")
        );
    }
}
