use std::sync::Arc;

use companion_proto::CompanionData;
use companion_transport::Transport;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{PreferenceStore, SnapshotCache};
use crate::connectivity::{ConnectionState, ConnectivityMonitor};
use crate::coordinator::SyncCoordinator;
use crate::listener::TransportListener;
use crate::sender::{OutboundSender, SendOutcome};
use crate::BridgeConfig;

/// The wearable side of the bridge, built once at startup and handed to
/// whatever needs it.
///
/// Owns every background task it spawns; [`CompanionBridge::shutdown`] (or
/// dropping the bridge) aborts them, discarding any transport call still in
/// flight.
pub struct CompanionBridge {
    coordinator: Arc<SyncCoordinator>,
    sender: Arc<OutboundSender>,
    monitor: Arc<ConnectivityMonitor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CompanionBridge {
    /// Restores the cached snapshot, starts listening, then runs the first
    /// connectivity check (which asks the phone for a sync if it is there).
    pub async fn start(
        transport: Arc<dyn Transport>,
        prefs: Arc<dyn PreferenceStore>,
        config: BridgeConfig,
    ) -> Self {
        let cache = SnapshotCache::new(prefs, &config.prefs_namespace, &config.cache_key);
        let sender = Arc::new(OutboundSender::new(
            Arc::clone(&transport),
            config.capability.clone(),
        ));
        let coordinator = Arc::new(
            SyncCoordinator::load(cache, sender.clone(), config.snapshot_policy).await,
        );
        let listener = Arc::new(TransportListener::new(
            Arc::clone(&transport),
            Arc::clone(&coordinator),
            Arc::clone(&sender),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(
            Arc::clone(&transport),
            Arc::clone(&sender),
            config.capability.clone(),
        ));

        let mut tasks = listener.spawn();
        tasks.push(monitor.spawn_capability_watch());

        let bridge = Self {
            coordinator,
            sender,
            monitor,
            tasks: Mutex::new(tasks),
        };
        let state = bridge.monitor.recheck().await;
        info!(
            target = "companion.bridge",
            node = %transport.local_node().id,
            connection = ?state,
            "companion bridge started"
        );
        bridge
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn sender(&self) -> &Arc<OutboundSender> {
        &self.sender
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    pub fn current(&self) -> Arc<CompanionData> {
        self.coordinator.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<CompanionData>> {
        self.coordinator.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub async fn complete_habit(&self, habit_id: &str) -> bool {
        self.coordinator.complete_habit(habit_id).await
    }

    pub async fn uncomplete_habit(&self, habit_id: &str) -> bool {
        self.coordinator.uncomplete_habit(habit_id).await
    }

    pub async fn request_sync(&self) -> SendOutcome {
        self.sender.send_sync_request().await
    }

    pub async fn recheck_connectivity(&self) -> ConnectionState {
        self.monitor.recheck().await
    }

    pub fn is_running(&self) -> bool {
        let tasks = self.tasks.lock();
        !tasks.is_empty() && tasks.iter().all(|task| !task.is_finished())
    }

    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        if tasks.is_empty() {
            return;
        }
        for task in tasks {
            task.abort();
        }
        info!(target = "companion.bridge", "companion bridge stopped");
    }
}

impl Drop for CompanionBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
