use std::sync::Arc;

use bytes::Bytes;
use companion_proto::{
    now_millis, CompanionData, Frame, HabitSummary, StreakStats, WatchMessage, WatchMessageType,
    DATA_KEY, DATA_PATH, MESSAGE_PATH, PHONE_CAPABILITY,
};
use companion_transport::{DataItem, InboundMessage, Transport};
use parking_lot::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::SyncResult;

/// Phone half of the bridge: the source of truth that pushes full snapshots
/// and applies habit toggles reported by the wearable.
pub struct PhonePublisher {
    transport: Arc<dyn Transport>,
    capability: String,
    state: RwLock<CompanionData>,
}

impl PhonePublisher {
    pub fn new(transport: Arc<dyn Transport>, initial: CompanionData) -> Self {
        Self {
            transport,
            capability: PHONE_CAPABILITY.to_string(),
            state: RwLock::new(initial),
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = capability.into();
        self
    }

    pub fn snapshot(&self) -> CompanionData {
        self.state.read().clone()
    }

    pub async fn advertise(&self) -> SyncResult<()> {
        self.transport.advertise_capability(&self.capability).await?;
        Ok(())
    }

    pub async fn withdraw(&self) -> SyncResult<()> {
        self.transport.withdraw_capability(&self.capability).await?;
        Ok(())
    }

    /// Rebuilds the snapshot from a fresh habit list and publishes it.
    pub async fn replace_habits(
        &self,
        habits: Vec<HabitSummary>,
        stats: StreakStats,
    ) -> SyncResult<CompanionData> {
        *self.state.write() = CompanionData::assemble(habits, stats, now_millis());
        self.publish_snapshot().await
    }

    /// Applies a toggle made on the phone itself and publishes the result.
    /// Unknown ids and no-op toggles publish nothing.
    pub async fn set_habit_completed(
        &self,
        habit_id: &str,
        completed: bool,
    ) -> SyncResult<Option<CompanionData>> {
        if !self.apply_toggle(habit_id, completed) {
            return Ok(None);
        }
        self.publish_snapshot().await.map(Some)
    }

    /// Stamps `lastUpdated` and writes the snapshot data item.
    pub async fn publish_snapshot(&self) -> SyncResult<CompanionData> {
        let snapshot = {
            let mut state = self.state.write();
            state.last_updated = now_millis().max(state.last_updated.saturating_add(1));
            state.clone()
        };
        let item = DataItem::new(DATA_PATH).with_field(DATA_KEY, snapshot.to_json()?.into_bytes());
        self.transport.put_data_item(item).await?;
        debug!(
            target = "companion.phone",
            habits = snapshot.habits.len(),
            last_updated = snapshot.last_updated,
            "published snapshot"
        );
        Ok(snapshot)
    }

    /// Sends the current snapshot as a framed message instead of a data item.
    pub async fn push_snapshot_message(&self, node: &str) -> SyncResult<()> {
        let payload = Frame::Snapshot(self.snapshot()).encode()?;
        self.transport
            .send_message(node, MESSAGE_PATH, Bytes::from(payload))
            .await?;
        Ok(())
    }

    /// Asks the wearable to request a full sync.
    pub async fn request_refresh(&self, node: &str) -> SyncResult<()> {
        let payload = Frame::Control(WatchMessage::refresh_data()).encode()?;
        self.transport
            .send_message(node, MESSAGE_PATH, Bytes::from(payload))
            .await?;
        Ok(())
    }

    /// Handles one message from the wearable, returning the control type
    /// acted upon.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> SyncResult<Option<WatchMessageType>> {
        if message.path != MESSAGE_PATH {
            return Ok(None);
        }
        let control = match Frame::decode(&message.payload)? {
            Frame::Control(control) => control,
            Frame::Snapshot(_) => {
                debug!(target = "companion.phone", "ignoring snapshot sent to the phone");
                return Ok(None);
            }
        };
        match control.kind {
            WatchMessageType::SyncRequest => {
                self.publish_snapshot().await?;
            }
            WatchMessageType::HabitCompleted | WatchMessageType::HabitUncompleted => {
                let request = control.completion_request()?;
                let completed = control.kind == WatchMessageType::HabitCompleted;
                info!(
                    target = "companion.phone",
                    habit_id = %request.habit_id,
                    completed,
                    source = %request.source,
                    "habit toggled on wearable"
                );
                if self.apply_toggle(&request.habit_id, completed) {
                    self.publish_snapshot().await?;
                }
            }
            WatchMessageType::RefreshData => {
                debug!(target = "companion.phone", "refresh request has no meaning on the phone");
            }
        }
        Ok(Some(control.kind))
    }

    pub fn spawn_command_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.transport.subscribe_messages();
        let phone = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if let Err(err) = phone.handle_message(&message).await {
                            warn!(
                                target = "companion.phone",
                                source = %message.source_node,
                                error = %err,
                                "failed to handle wearable message"
                            );
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target = "companion.phone", skipped, "wearable messages lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn apply_toggle(&self, habit_id: &str, completed: bool) -> bool {
        let mut state = self.state.write();
        match state.with_habit_completion(habit_id, completed) {
            Some(next) => {
                *state = next;
                true
            }
            None => false,
        }
    }
}
