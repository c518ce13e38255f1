use std::sync::Arc;

use async_trait::async_trait;
use companion_proto::CompanionData;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::cache::SnapshotCache;
use crate::SnapshotPolicy;

/// Receives habit toggles once they have been applied locally.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn habit_toggled(&self, habit_id: &str, completed: bool);
}

/// Sole owner of the wearable's current snapshot and the only writer of the
/// snapshot cache.
///
/// Observers follow state through [`SyncCoordinator::subscribe`]. Mutations go
/// through one write gate so the cache always ends up holding the latest
/// in-memory value.
pub struct SyncCoordinator {
    state: watch::Sender<Arc<CompanionData>>,
    cache: SnapshotCache,
    sink: Arc<dyn CommandSink>,
    policy: SnapshotPolicy,
    write_gate: Mutex<()>,
}

impl SyncCoordinator {
    /// Restores the cached snapshot (or the empty default) as initial state.
    pub async fn load(
        cache: SnapshotCache,
        sink: Arc<dyn CommandSink>,
        policy: SnapshotPolicy,
    ) -> Self {
        let initial = cache.load().await;
        info!(
            target = "companion.coordinator",
            habits = initial.habits.len(),
            last_updated = initial.last_updated,
            "restored companion snapshot"
        );
        let (state, _) = watch::channel(Arc::new(initial));
        Self {
            state,
            cache,
            sink,
            policy,
            write_gate: Mutex::new(()),
        }
    }

    pub fn current(&self) -> Arc<CompanionData> {
        Arc::clone(&self.state.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CompanionData>> {
        self.state.subscribe()
    }

    /// Replaces local state with a snapshot from the phone. Returns `false`
    /// only when [`SnapshotPolicy::RejectOlder`] drops it.
    pub async fn apply_inbound_snapshot(&self, data: CompanionData) -> bool {
        let _gate = self.write_gate.lock().await;
        if self.policy == SnapshotPolicy::RejectOlder {
            let stale = data.is_older_than(&self.state.borrow());
            if stale {
                debug!(
                    target = "companion.coordinator",
                    sync_version = data.sync_version,
                    last_updated = data.last_updated,
                    "dropping stale snapshot"
                );
                return false;
            }
        }
        let data = Arc::new(data);
        self.state.send_replace(Arc::clone(&data));
        self.cache.store(&data).await;
        debug!(
            target = "companion.coordinator",
            habits = data.habits.len(),
            "applied inbound snapshot"
        );
        true
    }

    pub async fn complete_habit(&self, habit_id: &str) -> bool {
        self.set_habit_completed(habit_id, true).await
    }

    pub async fn uncomplete_habit(&self, habit_id: &str) -> bool {
        self.set_habit_completed(habit_id, false).await
    }

    /// Applies an optimistic toggle, persists it, then tells the sink. Unknown
    /// ids and no-op toggles leave state untouched and send nothing. The local
    /// change stands whatever the sink does with it.
    pub async fn set_habit_completed(&self, habit_id: &str, completed: bool) -> bool {
        {
            let _gate = self.write_gate.lock().await;
            let next = {
                let current = self.state.borrow();
                current.with_habit_completion(habit_id, completed)
            };
            let Some(next) = next else {
                debug!(
                    target = "companion.coordinator",
                    habit_id,
                    completed,
                    "habit toggle ignored"
                );
                return false;
            };
            let next = Arc::new(next);
            self.state.send_replace(Arc::clone(&next));
            self.cache.store(&next).await;
        }
        self.sink.habit_toggled(habit_id, completed).await;
        true
    }
}
