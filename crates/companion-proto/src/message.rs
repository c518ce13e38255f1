use serde::{Deserialize, Serialize};

use crate::{now_millis, ProtoError, ProtoResult, SOURCE_WEAR_OS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchMessageType {
    SyncRequest,
    HabitCompleted,
    HabitUncompleted,
    RefreshData,
}

/// Control envelope. `payload` carries nested JSON text when the message
/// type needs one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchMessage {
    #[serde(rename = "type")]
    pub kind: WatchMessageType,
    #[serde(default)]
    pub payload: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitCompletionRequest {
    pub habit_id: String,
    pub completed_at: i64,
    pub source: String,
}

impl HabitCompletionRequest {
    pub fn from_wearable(habit_id: impl Into<String>, completed_at: i64) -> Self {
        Self {
            habit_id: habit_id.into(),
            completed_at,
            source: SOURCE_WEAR_OS.to_string(),
        }
    }
}

impl WatchMessage {
    pub fn new(kind: WatchMessageType) -> Self {
        Self {
            kind,
            payload: None,
            timestamp: now_millis(),
        }
    }

    pub fn sync_request() -> Self {
        Self::new(WatchMessageType::SyncRequest)
    }

    pub fn refresh_data() -> Self {
        Self::new(WatchMessageType::RefreshData)
    }

    pub fn habit_completion(request: &HabitCompletionRequest, completed: bool) -> ProtoResult<Self> {
        let kind = if completed {
            WatchMessageType::HabitCompleted
        } else {
            WatchMessageType::HabitUncompleted
        };
        Ok(Self {
            kind,
            payload: Some(serde_json::to_string(request)?),
            timestamp: request.completed_at,
        })
    }

    /// Decodes the nested completion request of a habit message.
    pub fn completion_request(&self) -> ProtoResult<HabitCompletionRequest> {
        let payload = self
            .payload
            .as_deref()
            .ok_or(ProtoError::MissingField("payload"))?;
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_names_are_screaming_snake_case() {
        let json = serde_json::to_value(WatchMessage::sync_request()).unwrap();
        assert_eq!(json["type"], "SYNC_REQUEST");
        assert!(json["payload"].is_null());
        let parsed: WatchMessage =
            serde_json::from_str(r#"{"type":"REFRESH_DATA","timestamp":1}"#).unwrap();
        assert_eq!(parsed.kind, WatchMessageType::RefreshData);
        assert_eq!(parsed.payload, None);
    }

    #[test]
    fn completion_payload_is_nested_json() {
        let request = HabitCompletionRequest::from_wearable("h1", 99);
        let message = WatchMessage::habit_completion(&request, true).unwrap();
        assert_eq!(message.kind, WatchMessageType::HabitCompleted);
        assert_eq!(message.timestamp, 99);

        let nested: serde_json::Value =
            serde_json::from_str(message.payload.as_deref().unwrap()).unwrap();
        assert_eq!(nested["habitId"], "h1");
        assert_eq!(nested["completedAt"], 99);
        assert_eq!(nested["source"], "wear_os");
        assert_eq!(message.completion_request().unwrap(), request);

        let undo = WatchMessage::habit_completion(&request, false).unwrap();
        assert_eq!(undo.kind, WatchMessageType::HabitUncompleted);
    }

    #[test]
    fn missing_payload_is_reported() {
        let err = WatchMessage::sync_request()
            .completion_request()
            .expect_err("no payload");
        assert!(matches!(err, ProtoError::MissingField("payload")));
    }
}
