use serde::{Deserialize, Serialize};

use crate::{CompanionData, ProtoResult, WatchMessage};

/// Envelope for everything sent on the message path. The `kind` tag says
/// whether the body is a full snapshot or a control message, so decoding
/// never guesses from the payload's shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Snapshot(CompanionData),
    Control(WatchMessage),
}

impl Frame {
    pub fn encode(&self) -> ProtoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> ProtoResult<Self> {
        let text = std::str::from_utf8(bytes)?;
        Ok(serde_json::from_str(text)?)
    }
}
