use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    CapabilityChange, DataEvent, DataItem, InboundMessage, Node, Transport, TransportError,
    TransportResult,
};

const CHANNEL_CAPACITY: usize = 64;

struct Side {
    node: Node,
    messages: broadcast::Sender<InboundMessage>,
    data: broadcast::Sender<DataEvent>,
    capabilities: broadcast::Sender<CapabilityChange>,
}

impl Side {
    fn new(name: &str) -> Self {
        Self {
            node: Node {
                id: format!("node-{name}"),
                display_name: name.to_string(),
                nearby: true,
            },
            messages: broadcast::channel(CHANNEL_CAPACITY).0,
            data: broadcast::channel(CHANNEL_CAPACITY).0,
            capabilities: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }
}

#[derive(Default)]
struct LinkState {
    connected: bool,
    fail_lookups: bool,
    advertised: [HashSet<String>; 2],
    items: [BTreeMap<String, DataItem>; 2],
    // Data events owed to each side, flushed on reconnect. Keyed by path so a
    // later write supersedes an earlier one.
    undelivered: [BTreeMap<String, DataEvent>; 2],
}

struct LinkInner {
    sides: [Side; 2],
    state: RwLock<LinkState>,
}

impl LinkInner {
    fn reachable_from(&self, state: &LinkState, side: usize, capability: &str) -> Vec<Node> {
        let other = 1 - side;
        if state.connected && state.advertised[other].contains(capability) {
            vec![self.sides[other].node.clone()]
        } else {
            Vec::new()
        }
    }

    fn notify_capability(&self, state: &LinkState, side: usize, capability: &str) {
        let nodes = self.reachable_from(state, side, capability);
        let _ = self.sides[side].capabilities.send(CapabilityChange {
            capability: capability.to_string(),
            nodes,
        });
    }

    fn deliver_data(&self, state: &mut LinkState, to: usize, event: DataEvent) {
        if state.connected {
            let _ = self.sides[to].data.send(event);
        } else {
            let path = match &event {
                DataEvent::Changed(item) => item.path.clone(),
                DataEvent::Deleted { path } => path.clone(),
            };
            state.undelivered[to].insert(path, event);
        }
    }
}

/// Two in-process endpoints joined by a switchable link.
#[derive(Clone)]
pub struct LocalLink {
    inner: Arc<LinkInner>,
}

impl LocalLink {
    /// Creates a connected pair. Node ids are `node-<name>`.
    pub fn pair(first: &str, second: &str) -> Self {
        Self {
            inner: Arc::new(LinkInner {
                sides: [Side::new(first), Side::new(second)],
                state: RwLock::new(LinkState {
                    connected: true,
                    ..LinkState::default()
                }),
            }),
        }
    }

    pub fn first(&self) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            inner: Arc::clone(&self.inner),
            side: 0,
        })
    }

    pub fn second(&self) -> Arc<LocalEndpoint> {
        Arc::new(LocalEndpoint {
            inner: Arc::clone(&self.inner),
            side: 1,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.read().connected
    }

    /// Connects or disconnects the pair. Each side is told about every
    /// capability the other side advertises, and pending data items are
    /// flushed when the link comes back.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.inner.state.write();
        if state.connected == connected {
            return;
        }
        state.connected = connected;
        debug!(target = "companion.transport", connected, "local link state changed");

        if connected {
            for side in 0..2 {
                let pending = std::mem::take(&mut state.undelivered[side]);
                for (_, event) in pending {
                    let _ = self.inner.sides[side].data.send(event);
                }
            }
        }

        for side in 0..2 {
            let other_caps: Vec<String> = state.advertised[1 - side].iter().cloned().collect();
            for capability in other_caps {
                self.inner.notify_capability(&state, side, &capability);
            }
        }
    }

    /// Makes every capability lookup fail until cleared.
    pub fn fail_lookups(&self, fail: bool) {
        self.inner.state.write().fail_lookups = fail;
    }
}

pub struct LocalEndpoint {
    inner: Arc<LinkInner>,
    side: usize,
}

impl LocalEndpoint {
    fn other(&self) -> usize {
        1 - self.side
    }

    /// Data items this endpoint has written, by path.
    pub fn stored_item(&self, path: &str) -> Option<DataItem> {
        self.inner.state.read().items[self.side].get(path).cloned()
    }
}

#[async_trait]
impl Transport for LocalEndpoint {
    fn local_node(&self) -> Node {
        self.inner.sides[self.side].node.clone()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.sides[self.side].messages.subscribe()
    }

    fn subscribe_data(&self) -> broadcast::Receiver<DataEvent> {
        self.inner.sides[self.side].data.subscribe()
    }

    fn subscribe_capabilities(&self) -> broadcast::Receiver<CapabilityChange> {
        self.inner.sides[self.side].capabilities.subscribe()
    }

    async fn send_message(&self, node: &str, path: &str, payload: Bytes) -> TransportResult<()> {
        let state = self.inner.state.read();
        let target = &self.inner.sides[self.other()];
        if !state.connected || target.node.id != node {
            return Err(TransportError::Unreachable(node.to_string()));
        }
        let _ = target.messages.send(InboundMessage {
            source_node: self.inner.sides[self.side].node.id.clone(),
            path: path.to_string(),
            payload,
        });
        Ok(())
    }

    async fn put_data_item(&self, item: DataItem) -> TransportResult<()> {
        let mut state = self.inner.state.write();
        state.items[self.side].insert(item.path.clone(), item.clone());
        self.inner
            .deliver_data(&mut state, self.other(), DataEvent::Changed(item));
        Ok(())
    }

    async fn delete_data_item(&self, path: &str) -> TransportResult<()> {
        let mut state = self.inner.state.write();
        state.items[self.side].remove(path);
        self.inner.deliver_data(
            &mut state,
            self.other(),
            DataEvent::Deleted {
                path: path.to_string(),
            },
        );
        Ok(())
    }

    async fn reachable_nodes(&self, capability: &str) -> TransportResult<Vec<Node>> {
        let state = self.inner.state.read();
        if state.fail_lookups {
            return Err(TransportError::Lookup("lookup failure injected".into()));
        }
        Ok(self.inner.reachable_from(&state, self.side, capability))
    }

    async fn advertise_capability(&self, capability: &str) -> TransportResult<()> {
        let mut state = self.inner.state.write();
        if state.advertised[self.side].insert(capability.to_string()) {
            self.inner.notify_capability(&state, self.other(), capability);
        }
        Ok(())
    }

    async fn withdraw_capability(&self, capability: &str) -> TransportResult<()> {
        let mut state = self.inner.state.write();
        if state.advertised[self.side].remove(capability) {
            self.inner.notify_capability(&state, self.other(), capability);
        }
        Ok(())
    }
}
