use std::sync::Arc;

use companion_transport::{Node, Transport};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sender::OutboundSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Tracks whether a phone advertising the capability is reachable.
///
/// Connectivity is re-evaluated only on construction, on capability-changed
/// events and on explicit [`ConnectivityMonitor::recheck`] calls. Each
/// `Disconnected -> Connected` transition sends exactly one sync request.
pub struct ConnectivityMonitor {
    transport: Arc<dyn Transport>,
    sender: Arc<OutboundSender>,
    capability: String,
    state: watch::Sender<ConnectionState>,
    check_gate: Mutex<()>,
}

impl ConnectivityMonitor {
    pub fn new(
        transport: Arc<dyn Transport>,
        sender: Arc<OutboundSender>,
        capability: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            sender,
            capability: capability.into(),
            state,
            check_gate: Mutex::new(()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Queries reachable nodes and updates state. A failed query counts as
    /// disconnected.
    pub async fn recheck(&self) -> ConnectionState {
        let _gate = self.check_gate.lock().await;
        let nodes = match self.transport.reachable_nodes(&self.capability).await {
            Ok(nodes) => nodes,
            Err(err) => {
                debug!(target = "companion.connectivity", error = %err, "capability lookup failed");
                Vec::new()
            }
        };
        self.apply_nodes(&nodes).await
    }

    async fn apply_nodes(&self, nodes: &[Node]) -> ConnectionState {
        let previous = self.state();
        let preferred = nodes.iter().find(|node| node.nearby).or_else(|| nodes.first());
        match preferred {
            Some(node) => {
                self.sender.set_target(Some(node.id.clone()));
                self.state.send_replace(ConnectionState::Connected);
                if previous == ConnectionState::Disconnected {
                    info!(target = "companion.connectivity", node = %node.id, "phone reachable; requesting sync");
                    self.sender.send_sync_request().await;
                }
                ConnectionState::Connected
            }
            None => {
                self.sender.set_target(None);
                self.state.send_replace(ConnectionState::Disconnected);
                if previous == ConnectionState::Connected {
                    info!(target = "companion.connectivity", "phone no longer reachable");
                }
                ConnectionState::Disconnected
            }
        }
    }

    /// Rechecks whenever the transport reports a change to our capability.
    pub fn spawn_capability_watch(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.transport.subscribe_capabilities();
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) if change.capability == monitor.capability => {
                        monitor.recheck().await;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        monitor.recheck().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
