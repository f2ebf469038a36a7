//! Control channel wire protocol.
//!
//! Every frame is a UTF-8 JSON object `{"type": <tag>, "data": <payload>}`.
//! Sends are fire-and-forget: no queueing, no retry, no acknowledgement.

use crate::errors::StreamError;
use crate::webrtc::peer::DataChannel;
use base64::Engine;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Largest base64 clipboard payload that still fits one data channel message
/// once wrapped in its envelope.
pub const CLIPBOARD_LIMIT: usize = 65400;

/// `system` message action, sent as a single comma-delimited string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemAction {
    Reload,
    VideoFramerate(u32),
    VideoBitrate(u32),
    AudioBitrate(u32),
    Encoder(String),
    Resize(bool),
    Resolution(String),
}

impl fmt::Display for SystemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SystemAction::Reload => f.write_str("reload"),
            SystemAction::VideoFramerate(fps) => write!(f, "videoFramerate,{}", fps),
            SystemAction::VideoBitrate(kbps) => write!(f, "video_bitrate,{}", kbps),
            SystemAction::AudioBitrate(bps) => write!(f, "audio_bitrate,{}", bps),
            SystemAction::Encoder(name) => write!(f, "encoder,{}", name),
            // Web clients compare against the capitalized spelling.
            SystemAction::Resize(true) => f.write_str("resize,True"),
            SystemAction::Resize(false) => f.write_str("resize,False"),
            SystemAction::Resolution(res) => write!(f, "resolution,{}", res),
        }
    }
}

impl Serialize for SystemAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Catalog of messages sent to the peer over the control channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    Clipboard {
        content: String,
    },
    /// Opaque cursor descriptor produced by the cursor monitor
    Cursor(Value),
    GpuStats {
        /// Utilization between 0 and 1
        load: f64,
        /// MB
        memory_total: f64,
        /// MB
        memory_used: f64,
    },
    System {
        action: SystemAction,
    },
    Ping {
        start_time: f64,
    },
    LatencyMeasurement {
        latency_ms: f64,
    },
    SystemStats {
        cpu_percent: f64,
        mem_total: u64,
        mem_used: u64,
    },
}

impl ControlMessage {
    /// Clipboard message carrying `text` base64-encoded, or `None` when the
    /// encoding exceeds [`CLIPBOARD_LIMIT`]. Oversized content is dropped,
    /// never truncated.
    pub fn clipboard(text: &str) -> Option<Self> {
        let content = base64::engine::general_purpose::STANDARD.encode(text.as_bytes());
        if content.len() > CLIPBOARD_LIMIT {
            log::warn!(
                "clipboard may not be sent to the client because the base64 message length {} is above the maximum length of {}",
                content.len(),
                CLIPBOARD_LIMIT
            );
            return None;
        }
        Some(ControlMessage::Clipboard { content })
    }

    /// Ping stamped with `start_time` seconds, kept to millisecond precision
    pub fn ping(start_time: f64) -> Self {
        ControlMessage::Ping {
            start_time: (start_time * 1000.0).round() / 1000.0,
        }
    }

    pub fn system(action: SystemAction) -> Self {
        ControlMessage::System { action }
    }

    /// Wire tag of this message
    pub fn tag(&self) -> &'static str {
        match self {
            ControlMessage::Clipboard { .. } => "clipboard",
            ControlMessage::Cursor(_) => "cursor",
            ControlMessage::GpuStats { .. } => "gpu_stats",
            ControlMessage::System { .. } => "system",
            ControlMessage::Ping { .. } => "ping",
            ControlMessage::LatencyMeasurement { .. } => "latency_measurement",
            ControlMessage::SystemStats { .. } => "system_stats",
        }
    }

    pub fn encode(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Free-form envelope for message types outside the catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: Value,
}

impl ControlEnvelope {
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The primary control channel of a session
#[derive(Clone)]
pub struct ControlChannel {
    channel: Arc<dyn DataChannel>,
}

impl ControlChannel {
    pub fn new(channel: Arc<dyn DataChannel>) -> Self {
        Self { channel }
    }

    pub fn label(&self) -> &str {
        self.channel.label()
    }

    pub async fn send(&self, message: &ControlMessage) -> Result<(), StreamError> {
        self.channel.send_text(message.encode()?).await
    }

    pub async fn send_envelope(&self, envelope: &ControlEnvelope) -> Result<(), StreamError> {
        self.channel.send_text(envelope.encode()?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(message: &ControlMessage) -> Value {
        serde_json::from_str(&message.encode().unwrap()).unwrap()
    }

    #[test]
    fn test_system_actions() {
        let cases = [
            (SystemAction::Reload, "reload"),
            (SystemAction::VideoFramerate(60), "videoFramerate,60"),
            (SystemAction::VideoBitrate(8000), "video_bitrate,8000"),
            (SystemAction::AudioBitrate(128000), "audio_bitrate,128000"),
            (SystemAction::Encoder("nvh264enc".into()), "encoder,nvh264enc"),
            (SystemAction::Resize(true), "resize,True"),
            (SystemAction::Resize(false), "resize,False"),
            (SystemAction::Resolution("1920x1080".into()), "resolution,1920x1080"),
        ];
        for (action, expected) in cases {
            assert_eq!(
                to_json(&ControlMessage::system(action)),
                json!({"type": "system", "data": {"action": expected}})
            );
        }
    }

    #[test]
    fn test_catalog_envelopes() {
        assert_eq!(
            to_json(&ControlMessage::GpuStats {
                load: 0.5,
                memory_total: 8192.0,
                memory_used: 1024.0
            }),
            json!({"type": "gpu_stats", "data": {"load": 0.5, "memory_total": 8192.0, "memory_used": 1024.0}})
        );
        assert_eq!(
            to_json(&ControlMessage::LatencyMeasurement { latency_ms: 12.5 }),
            json!({"type": "latency_measurement", "data": {"latency_ms": 12.5}})
        );
        assert_eq!(
            to_json(&ControlMessage::SystemStats {
                cpu_percent: 12.0,
                mem_total: 16,
                mem_used: 4
            }),
            json!({"type": "system_stats", "data": {"cpu_percent": 12.0, "mem_total": 16, "mem_used": 4}})
        );
        let cursor = json!({"curdata": "AAAA", "handle": 42, "hotspot": {"x": 1, "y": 2}});
        assert_eq!(
            to_json(&ControlMessage::Cursor(cursor.clone())),
            json!({"type": "cursor", "data": cursor})
        );
    }

    #[test]
    fn test_tag_matches_serialized_type() {
        let messages = [
            ControlMessage::clipboard("x").unwrap(),
            ControlMessage::Cursor(json!({})),
            ControlMessage::ping(1.0),
            ControlMessage::system(SystemAction::Reload),
            ControlMessage::LatencyMeasurement { latency_ms: 1.0 },
        ];
        for message in messages {
            assert_eq!(to_json(&message)["type"], message.tag());
        }
    }

    #[test]
    fn test_ping_rounds_to_milliseconds() {
        assert_eq!(
            ControlMessage::ping(1700000000.123456),
            ControlMessage::Ping {
                start_time: 1700000000.123
            }
        );
    }

    #[test]
    fn test_clipboard_base64() {
        let message = ControlMessage::clipboard("hello").unwrap();
        assert_eq!(
            to_json(&message),
            json!({"type": "clipboard", "data": {"content": "aGVsbG8="}})
        );
    }

    #[test]
    fn test_clipboard_limit() {
        // 49050 bytes encode to exactly 65400 base64 characters
        let at_limit = "a".repeat(49_050);
        match ControlMessage::clipboard(&at_limit) {
            Some(ControlMessage::Clipboard { content }) => assert_eq!(content.len(), CLIPBOARD_LIMIT),
            other => panic!("expected clipboard message, got {:?}", other),
        }

        // One more byte pushes the encoding past the limit
        let over_limit = "a".repeat(49_051);
        assert!(ControlMessage::clipboard(&over_limit).is_none());
    }

    #[test]
    fn test_free_form_envelope() {
        let envelope = ControlEnvelope::new("media", json!({"seq": 1}));
        assert_eq!(
            envelope.encode().unwrap(),
            r#"{"type":"media","data":{"seq":1}}"#
        );
    }
}
