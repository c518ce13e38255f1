//! Companion sync bridge: keeps a wearable's habit snapshot in step with the
//! phone app.
//!
//! Responsibilities:
//! - restoring the last-known snapshot from local preferences at startup
//! - applying full snapshots pushed by the phone
//! - optimistic habit toggles on the wearable, relayed best-effort to the phone
//! - tracking whether the phone is reachable and asking for a full sync when it
//!   comes back
//!
//! Every failure here degrades to "keep the last-known-good snapshot" or "drop
//! this operation"; nothing is fatal to the host.

use companion_proto::{ProtoError, CACHE_KEY, PHONE_CAPABILITY, PREFS_NAMESPACE};
use companion_transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bridge;
pub mod cache;
pub mod connectivity;
pub mod coordinator;
pub mod listener;
pub mod phone;
pub mod sender;

pub use bridge::CompanionBridge;
pub use cache::{CacheError, FilePreferences, InMemoryPreferences, PreferenceStore, SnapshotCache};
pub use connectivity::{ConnectionState, ConnectivityMonitor};
pub use coordinator::{CommandSink, SyncCoordinator};
pub use listener::{Dispatch, TransportListener};
pub use phone::PhonePublisher;
pub use sender::{OutboundSender, SendOutcome};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

pub type SyncResult<T> = Result<T, SyncError>;

/// How the coordinator treats an inbound snapshot that is older than the one
/// it already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotPolicy {
    /// Every inbound snapshot replaces local state, including optimistic
    /// toggles made while the phone was away.
    #[default]
    LastWriteWins,
    /// Snapshots ordered before the current one by `(syncVersion, lastUpdated)`
    /// are dropped.
    RejectOlder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Capability the phone advertises.
    pub capability: String,
    pub prefs_namespace: String,
    pub cache_key: String,
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capability: PHONE_CAPABILITY.to_string(),
            prefs_namespace: PREFS_NAMESPACE.to_string(),
            cache_key: CACHE_KEY.to_string(),
            snapshot_policy: SnapshotPolicy::default(),
        }
    }
}
