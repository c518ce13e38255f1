//! Transport seam between the phone and wearable halves of the companion bridge.
//!
//! The real transport is a vendor pub/sub layer offering three things: durable
//! data items replicated to paired nodes, fire-and-forget point-to-point
//! messages, and capability advertisement for discovery. [`Transport`] captures
//! that surface; [`LocalLink`] is an in-process pair used by tests and the CLI
//! simulator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

mod local;

pub use local::{LocalEndpoint, LocalLink};

pub type NodeId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub display_name: String,
    pub nearby: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub source_node: NodeId,
    pub path: String,
    pub payload: Bytes,
}

/// A replicated key/value record addressed by path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DataItem {
    pub path: String,
    pub fields: BTreeMap<String, Bytes>,
}

impl DataItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Bytes> {
        self.fields.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataEvent {
    Changed(DataItem),
    Deleted { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityChange {
    pub capability: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("node {0} is not reachable")]
    Unreachable(NodeId),
    #[error("capability lookup failed: {0}")]
    Lookup(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait Transport: Send + Sync {
    fn local_node(&self) -> Node;

    fn subscribe_messages(&self) -> broadcast::Receiver<InboundMessage>;

    fn subscribe_data(&self) -> broadcast::Receiver<DataEvent>;

    fn subscribe_capabilities(&self) -> broadcast::Receiver<CapabilityChange>;

    async fn send_message(&self, node: &str, path: &str, payload: Bytes) -> TransportResult<()>;

    /// Stores the item locally and replicates it to connected peers. Peers that
    /// are offline receive it once they reconnect.
    async fn put_data_item(&self, item: DataItem) -> TransportResult<()>;

    async fn delete_data_item(&self, path: &str) -> TransportResult<()>;

    /// Nodes that advertise `capability` and are reachable right now.
    async fn reachable_nodes(&self, capability: &str) -> TransportResult<Vec<Node>>;

    async fn advertise_capability(&self, capability: &str) -> TransportResult<()>;

    async fn withdraw_capability(&self, capability: &str) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_item_builder_keeps_fields() {
        let item = DataItem::new("/companion_data").with_field("json", Bytes::from_static(b"{}"));
        assert_eq!(item.path, "/companion_data");
        assert_eq!(item.field("json"), Some(&Bytes::from_static(b"{}")));
        assert!(item.field("missing").is_none());
    }
}
