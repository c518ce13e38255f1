//! Wire definitions shared by the phone and wearable halves of the companion
//! bridge. Field names are camelCase on the wire and must stay stable so an
//! unmodified peer can still read them.

use thiserror::Error;
use time::OffsetDateTime;

mod frame;
mod message;
mod model;

pub use frame::Frame;
pub use message::{HabitCompletionRequest, WatchMessage, WatchMessageType};
pub use model::{CompanionData, HabitSummary, StreakStats};

/// Data-item path carrying the full snapshot.
pub const DATA_PATH: &str = "/companion_data";
/// Field key inside the data item holding the snapshot JSON.
pub const DATA_KEY: &str = "companion_data_json";
/// Message path for framed snapshots and control messages.
pub const MESSAGE_PATH: &str = "/companion_message";
/// Advertised by the phone app when installed and reachable.
pub const PHONE_CAPABILITY: &str = "coach_phone_app";
/// Advertised by the wearable app.
pub const WATCH_CAPABILITY: &str = "coach_wear_app";
pub const PREFS_NAMESPACE: &str = "wear_companion_prefs";
pub const CACHE_KEY: &str = "cached_companion_data";
/// `source` tag on completion requests originating from the wearable.
pub const SOURCE_WEAR_OS: &str = "wear_os";

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("payload is not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("missing field {0}")]
    MissingField(&'static str),
}

pub type ProtoResult<T> = Result<T, ProtoError>;

/// Current wall clock as Unix epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
