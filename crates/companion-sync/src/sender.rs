use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use companion_proto::{
    now_millis, Frame, HabitCompletionRequest, WatchMessage, MESSAGE_PATH,
};
use companion_transport::{NodeId, Transport};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::coordinator::CommandSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// No reachable phone; the command was dropped.
    NoPeer,
    Failed,
}

/// Sends control frames to the phone. Nothing is retried: a dropped command
/// is recovered only by the next full snapshot.
pub struct OutboundSender {
    transport: Arc<dyn Transport>,
    capability: String,
    target: RwLock<Option<NodeId>>,
}

impl OutboundSender {
    pub fn new(transport: Arc<dyn Transport>, capability: impl Into<String>) -> Self {
        Self {
            transport,
            capability: capability.into(),
            target: RwLock::new(None),
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        self.target.read().clone()
    }

    pub fn set_target(&self, node: Option<NodeId>) {
        *self.target.write() = node;
    }

    pub async fn send_sync_request(&self) -> SendOutcome {
        self.send_control(WatchMessage::sync_request()).await
    }

    pub async fn send_habit_completion(&self, habit_id: &str, completed: bool) -> SendOutcome {
        let request = HabitCompletionRequest::from_wearable(habit_id, now_millis());
        match WatchMessage::habit_completion(&request, completed) {
            Ok(message) => self.send_control(message).await,
            Err(err) => {
                warn!(
                    target = "companion.sender",
                    habit_id,
                    error = %err,
                    "failed to encode habit completion"
                );
                SendOutcome::Failed
            }
        }
    }

    pub async fn send_control(&self, message: WatchMessage) -> SendOutcome {
        let kind = message.kind;
        let Some(node) = self.resolve_target().await else {
            debug!(target = "companion.sender", kind = ?kind, "no reachable phone; dropping command");
            return SendOutcome::NoPeer;
        };
        let payload = match Frame::Control(message).encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target = "companion.sender", kind = ?kind, error = %err, "failed to encode frame");
                return SendOutcome::Failed;
            }
        };
        match self
            .transport
            .send_message(&node, MESSAGE_PATH, Bytes::from(payload))
            .await
        {
            Ok(()) => {
                debug!(target = "companion.sender", kind = ?kind, node = %node, "sent command");
                SendOutcome::Sent
            }
            Err(err) => {
                warn!(
                    target = "companion.sender",
                    kind = ?kind,
                    node = %node,
                    error = %err,
                    "failed to send command"
                );
                // Forget the node so the next send looks the phone up again.
                let mut target = self.target.write();
                if target.as_deref() == Some(node.as_str()) {
                    *target = None;
                }
                SendOutcome::Failed
            }
        }
    }

    /// Cached node, else the first reachable node advertising the capability
    /// (nearby nodes first).
    async fn resolve_target(&self) -> Option<NodeId> {
        let cached = self.target.read().clone();
        if cached.is_some() {
            return cached;
        }
        let nodes = match self.transport.reachable_nodes(&self.capability).await {
            Ok(nodes) => nodes,
            Err(err) => {
                debug!(target = "companion.sender", error = %err, "capability lookup failed");
                return None;
            }
        };
        let node = nodes
            .iter()
            .find(|node| node.nearby)
            .or_else(|| nodes.first())
            .map(|node| node.id.clone())?;
        *self.target.write() = Some(node.clone());
        Some(node)
    }
}

#[async_trait]
impl CommandSink for OutboundSender {
    async fn habit_toggled(&self, habit_id: &str, completed: bool) {
        self.send_habit_completion(habit_id, completed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use companion_proto::WatchMessageType;
    use companion_transport::LocalLink;

    const CAP: &str = "coach_phone_app";

    async fn paired() -> (LocalLink, Arc<companion_transport::LocalEndpoint>, OutboundSender) {
        let link = LocalLink::pair("phone", "watch");
        let phone = link.first();
        phone.advertise_capability(CAP).await.unwrap();
        let sender = OutboundSender::new(link.second(), CAP);
        (link, phone, sender)
    }

    #[tokio::test]
    async fn sync_request_is_framed_as_control() {
        let (_link, phone, sender) = paired().await;
        let mut rx = phone.subscribe_messages();

        assert_eq!(sender.send_sync_request().await, SendOutcome::Sent);
        assert_eq!(sender.target().as_deref(), Some("node-phone"));

        let msg = rx.recv().await.expect("message");
        assert_eq!(msg.path, MESSAGE_PATH);
        match Frame::decode(&msg.payload).unwrap() {
            Frame::Control(message) => assert_eq!(message.kind, WatchMessageType::SyncRequest),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn habit_completion_carries_request_payload() {
        let (_link, phone, sender) = paired().await;
        let mut rx = phone.subscribe_messages();

        assert_eq!(
            sender.send_habit_completion("h1", false).await,
            SendOutcome::Sent
        );
        let msg = rx.recv().await.expect("message");
        let Frame::Control(message) = Frame::decode(&msg.payload).unwrap() else {
            panic!("expected control frame");
        };
        assert_eq!(message.kind, WatchMessageType::HabitUncompleted);
        let request = message.completion_request().unwrap();
        assert_eq!(request.habit_id, "h1");
        assert_eq!(request.source, "wear_os");
    }

    #[tokio::test]
    async fn no_peer_is_a_quiet_no_op() {
        let link = LocalLink::pair("phone", "watch");
        let sender = OutboundSender::new(link.second(), CAP);
        assert_eq!(sender.send_sync_request().await, SendOutcome::NoPeer);
        assert_eq!(sender.target(), None);
    }

    #[tokio::test]
    async fn failed_send_forgets_cached_node() {
        let (link, _phone, sender) = paired().await;
        assert_eq!(sender.send_sync_request().await, SendOutcome::Sent);

        link.set_connected(false);
        assert_eq!(sender.send_sync_request().await, SendOutcome::Failed);
        assert_eq!(sender.target(), None);
        assert_eq!(sender.send_sync_request().await, SendOutcome::NoPeer);

        link.set_connected(true);
        assert_eq!(sender.send_sync_request().await, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn lookup_failure_counts_as_no_peer() {
        let (link, _phone, sender) = paired().await;
        link.fail_lookups(true);
        assert_eq!(sender.send_sync_request().await, SendOutcome::NoPeer);
    }
}
