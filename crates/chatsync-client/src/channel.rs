//! [`Transport`] over a tokio channel.
//!
//! Each intent is sent as a [`TransportRequest`] carrying a oneshot for the
//! answer. Whatever owns the receiver (a socket task, a test harness) serves
//! the requests; dropping it fails every pending and future call with
//! [`TransportError::Closed`].

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use chatsync_shared::{
    ConversationId, ConversationSnapshot, HistoryFilter, HistoryPage, MessageId, OutboundIntent,
    Role, SendMessageRequest, ServerMessage, SettingValue, UserId,
};

use crate::error::TransportError;
use crate::transport::Transport;

/// Answer to one intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentReply {
    Ack,
    Sent(ServerMessage),
    History(HistoryPage),
    Snapshot(ConversationSnapshot),
}

#[derive(Debug)]
pub struct TransportRequest {
    pub intent: OutboundIntent,
    pub reply: oneshot::Sender<Result<IntentReply, TransportError>>,
}

#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<TransportRequest>,
}

impl ChannelTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<TransportRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    async fn request(&self, intent: OutboundIntent) -> Result<IntentReply, TransportError> {
        let (reply, rx) = oneshot::channel();
        debug!(conversation = %intent.conversation_id(), "Dispatching intent");
        self.tx
            .send(TransportRequest { intent, reply })
            .await
            .map_err(|_| TransportError::Closed)?;
        rx.await.map_err(|_| TransportError::Closed)?
    }

    async fn ack(&self, intent: OutboundIntent) -> Result<(), TransportError> {
        match self.request(intent).await? {
            IntentReply::Ack => Ok(()),
            other => Err(unexpected("ack", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &IntentReply) -> TransportError {
    TransportError::UnexpectedReply(format!("expected {wanted}, got {got:?}"))
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_message(&self, request: SendMessageRequest) -> Result<ServerMessage, TransportError> {
        match self.request(OutboundIntent::SendMessage(request)).await? {
            IntentReply::Sent(message) => Ok(message),
            other => Err(unexpected("sent message", &other)),
        }
    }

    async fn set_typing(&self, conversation_id: &ConversationId, is_typing: bool) -> Result<(), TransportError> {
        self.ack(OutboundIntent::SetTyping {
            conversation_id: conversation_id.clone(),
            is_typing,
        })
        .await
    }

    async fn mark_read(&self, conversation_id: &ConversationId, message_id: &MessageId) -> Result<(), TransportError> {
        self.ack(OutboundIntent::MarkRead {
            conversation_id: conversation_id.clone(),
            message_id: message_id.clone(),
        })
        .await
    }

    async fn update_group_settings(
        &self,
        conversation_id: &ConversationId,
        changes: Vec<SettingValue>,
    ) -> Result<(), TransportError> {
        self.ack(OutboundIntent::UpdateGroupSettings {
            conversation_id: conversation_id.clone(),
            changes,
        })
        .await
    }

    async fn kick_member(&self, conversation_id: &ConversationId, uid: &UserId) -> Result<(), TransportError> {
        self.ack(OutboundIntent::KickMember {
            conversation_id: conversation_id.clone(),
            uid: uid.clone(),
        })
        .await
    }

    async fn change_role(&self, conversation_id: &ConversationId, uid: &UserId, role: Role) -> Result<(), TransportError> {
        self.ack(OutboundIntent::ChangeRole {
            conversation_id: conversation_id.clone(),
            uid: uid.clone(),
            role,
        })
        .await
    }

    async fn leave_group(&self, conversation_id: &ConversationId) -> Result<(), TransportError> {
        self.ack(OutboundIntent::LeaveGroup {
            conversation_id: conversation_id.clone(),
        })
        .await
    }

    async fn fetch_history(
        &self,
        conversation_id: &ConversationId,
        filter: HistoryFilter,
        before: Option<MessageId>,
        limit: u16,
    ) -> Result<HistoryPage, TransportError> {
        let intent = OutboundIntent::FetchHistory {
            conversation_id: conversation_id.clone(),
            filter,
            before,
            limit,
        };
        match self.request(intent).await? {
            IntentReply::History(page) => Ok(page),
            other => Err(unexpected("history page", &other)),
        }
    }

    async fn fetch_conversation(&self, conversation_id: &ConversationId) -> Result<ConversationSnapshot, TransportError> {
        let intent = OutboundIntent::FetchConversation {
            conversation_id: conversation_id.clone(),
        };
        match self.request(intent).await? {
            IntentReply::Snapshot(snapshot) => Ok(snapshot),
            other => Err(unexpected("snapshot", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use chatsync_shared::{LocalId, SenderInfo};

    use super::*;

    #[tokio::test]
    async fn test_round_trips_through_server_task() {
        let (transport, mut rx) = ChannelTransport::new(8);
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let reply = match req.intent {
                    OutboundIntent::SendMessage(r) => Ok(IntentReply::Sent(ServerMessage {
                        message_id: MessageId::new("m1"),
                        conversation_id: r.conversation_id,
                        sender: SenderInfo::new(UserId::new("me")),
                        content: r.content,
                        created_at: Utc::now(),
                        attachment: r.attachment,
                        reply_to: None,
                        edited_at: None,
                        is_recalled: false,
                        recalled_at: None,
                        reactions: BTreeMap::new(),
                    })),
                    OutboundIntent::KickMember { .. } => Err(TransportError::Rejected {
                        code: 403,
                        message: "nope".into(),
                    }),
                    _ => Ok(IntentReply::Ack),
                };
                let _ = req.reply.send(reply);
            }
        });

        let conv = ConversationId::new("c1");
        let sent = transport
            .send_message(SendMessageRequest {
                conversation_id: conv.clone(),
                client_ref: LocalId::new(),
                content: "hi".into(),
                attachment: None,
                reply_to_id: None,
            })
            .await
            .unwrap();
        assert_eq!(sent.content, "hi");

        transport.set_typing(&conv, true).await.unwrap();
        assert!(matches!(
            transport.kick_member(&conv, &UserId::new("bob")).await,
            Err(TransportError::Rejected { code: 403, .. })
        ));
        assert!(matches!(
            transport.fetch_conversation(&conv).await,
            Err(TransportError::UnexpectedReply(_))
        ));
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes() {
        let (transport, rx) = ChannelTransport::new(1);
        drop(rx);
        assert_eq!(
            transport.leave_group(&ConversationId::new("c1")).await,
            Err(TransportError::Closed)
        );
    }
}
