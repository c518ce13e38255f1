use std::sync::Arc;

use companion_proto::{CompanionData, Frame, WatchMessageType, DATA_KEY, DATA_PATH, MESSAGE_PATH};
use companion_transport::{DataEvent, InboundMessage, Transport};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordinator::SyncCoordinator;
use crate::sender::OutboundSender;

/// What the listener did with one inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Snapshot handed to the coordinator and accepted.
    Applied,
    /// Snapshot handed to the coordinator and dropped as stale.
    Stale,
    /// Phone asked for a refresh; a sync request went out.
    RefreshRequested,
    /// Control message with no handler on this side.
    Informational(WatchMessageType),
    /// Event on a path this bridge does not own.
    Ignored,
    /// Payload could not be decoded; state untouched.
    Malformed,
}

/// Routes data-item changes and messages from the phone into the
/// coordinator.
pub struct TransportListener {
    transport: Arc<dyn Transport>,
    coordinator: Arc<SyncCoordinator>,
    sender: Arc<OutboundSender>,
}

impl TransportListener {
    pub fn new(
        transport: Arc<dyn Transport>,
        coordinator: Arc<SyncCoordinator>,
        sender: Arc<OutboundSender>,
    ) -> Self {
        Self {
            transport,
            coordinator,
            sender,
        }
    }

    /// Subscribes to both event streams and spawns one worker per stream.
    /// Subscriptions are taken before returning, so nothing sent afterwards
    /// is missed.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut data_rx = self.transport.subscribe_data();
        let mut message_rx = self.transport.subscribe_messages();

        let listener = Arc::clone(self);
        let data_task = tokio::spawn(async move {
            loop {
                match data_rx.recv().await {
                    Ok(event) => {
                        listener.handle_data_event(event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target = "companion.listener", skipped, "data events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        let listener = Arc::clone(self);
        let message_task = tokio::spawn(async move {
            loop {
                match message_rx.recv().await {
                    Ok(message) => {
                        listener.handle_message(&message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target = "companion.listener", skipped, "messages lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        vec![data_task, message_task]
    }

    pub async fn handle_data_event(&self, event: DataEvent) -> Dispatch {
        let item = match event {
            DataEvent::Changed(item) if item.path == DATA_PATH => item,
            DataEvent::Deleted { path } if path == DATA_PATH => {
                debug!(target = "companion.listener", "snapshot data item deleted; keeping local state");
                return Dispatch::Ignored;
            }
            _ => return Dispatch::Ignored,
        };
        let Some(raw) = item.field(DATA_KEY) else {
            warn!(target = "companion.listener", key = DATA_KEY, "snapshot data item without payload");
            return Dispatch::Malformed;
        };
        match CompanionData::from_slice(raw) {
            Ok(data) => self.apply(data).await,
            Err(err) => {
                warn!(target = "companion.listener", error = %err, "failed to decode snapshot data item");
                Dispatch::Malformed
            }
        }
    }

    pub async fn handle_message(&self, message: &InboundMessage) -> Dispatch {
        if message.path != MESSAGE_PATH {
            return Dispatch::Ignored;
        }
        let frame = match Frame::decode(&message.payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(
                    target = "companion.listener",
                    source = %message.source_node,
                    error = %err,
                    "dropping undecodable message"
                );
                return Dispatch::Malformed;
            }
        };
        match frame {
            Frame::Snapshot(data) => self.apply(data).await,
            Frame::Control(control) => match control.kind {
                WatchMessageType::RefreshData => {
                    self.sender.send_sync_request().await;
                    Dispatch::RefreshRequested
                }
                other => {
                    debug!(target = "companion.listener", kind = ?other, "informational control message");
                    Dispatch::Informational(other)
                }
            },
        }
    }

    async fn apply(&self, data: CompanionData) -> Dispatch {
        if self.coordinator.apply_inbound_snapshot(data).await {
            Dispatch::Applied
        } else {
            Dispatch::Stale
        }
    }
}
