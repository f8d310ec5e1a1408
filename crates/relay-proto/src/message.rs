use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::now_millis;

/// Envelopes the hub pushes to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// One opaque payload relayed from a sender.
    Frame {
        role: String,
        camera_id: String,
        timestamp: u64,
        data: String,
    },
    /// The current telemetry snapshot.
    Sensor { data: Value, timestamp: u64 },
    /// SOS flag change.
    Sos { active: bool, timestamp: u64 },
    /// Reply to a viewer ping.
    Pong { timestamp: u64 },
}

impl HubMessage {
    pub fn frame(role: &str, camera_id: &str, payload: FramePayload) -> Self {
        HubMessage::Frame {
            role: role.to_string(),
            camera_id: camera_id.to_string(),
            timestamp: now_millis(),
            data: payload.into_inner(),
        }
    }

    pub fn pong() -> Self {
        HubMessage::Pong {
            timestamp: now_millis(),
        }
    }

    /// Label used for metrics and logs.
    pub fn kind_label(&self) -> &'static str {
        match self {
            HubMessage::Frame { .. } => "frame",
            HubMessage::Sensor { .. } => "sensor",
            HubMessage::Sos { .. } => "sos",
            HubMessage::Pong { .. } => "pong",
        }
    }
}

/// Messages a viewer may send. Anything that does not parse as one of these
/// is ignored by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    Ping,
}

/// Opaque payload carried in a frame envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePayload(String);

impl FramePayload {
    /// A JSON object with a string `frame` (or `data`) field contributes that
    /// string; any other text is the payload verbatim.
    pub fn from_text(text: &str) -> Self {
        if text.trim_start().starts_with('{') {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) {
                let inner = map
                    .get("frame")
                    .or_else(|| map.get("data"))
                    .and_then(Value::as_str);
                if let Some(inner) = inner {
                    return FramePayload(inner.to_string());
                }
            }
        }
        FramePayload(text.to_string())
    }

    pub fn from_binary(bytes: &[u8]) -> Self {
        FramePayload(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test_timeout::timeout]
    fn frame_envelope_shape() {
        let message = HubMessage::Frame {
            role: "cam".into(),
            camera_id: "cam-1".into(),
            timestamp: 42,
            data: "AAA".into(),
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"type": "frame", "role": "cam", "camera_id": "cam-1", "timestamp": 42, "data": "AAA"})
        );
    }

    #[test_timeout::timeout]
    fn viewer_ping_parses_with_extra_fields() {
        let parsed: ViewerMessage =
            serde_json::from_str(r#"{"type":"ping","sent_at":1}"#).unwrap();
        assert_eq!(parsed, ViewerMessage::Ping);
        assert!(serde_json::from_str::<ViewerMessage>(r#"{"type":"subscribe"}"#).is_err());
    }

    #[test_timeout::timeout]
    fn payload_unwraps_frame_field() {
        assert_eq!(FramePayload::from_text(r#"{"frame":"AAA"}"#).as_str(), "AAA");
        assert_eq!(FramePayload::from_text(r#"{"data":"BBB"}"#).as_str(), "BBB");
    }

    #[test_timeout::timeout]
    fn payload_keeps_other_text_verbatim() {
        assert_eq!(FramePayload::from_text("/9j/4AAQSk").as_str(), "/9j/4AAQSk");
        let raw = r#"{"frame":7}"#;
        assert_eq!(FramePayload::from_text(raw).as_str(), raw);
    }

    #[test_timeout::timeout]
    fn binary_payload_is_base64() {
        assert_eq!(FramePayload::from_binary(&[0xff, 0xd8, 0xff]).as_str(), "/9j/");
    }
}
