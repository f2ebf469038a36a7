use crate::timing::TimeBase;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an outgoing media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// MIME type of the retransmission codec for this kind, e.g. `video/rtx`
    pub fn rtx_mime_type(&self) -> String {
        format!("{}/rtx", self.as_str())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One encoded media access unit ready for the transport.
///
/// When present, `dts` always equals `pts`: the encoders feeding this crate
/// emit no B-frames.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPacket {
    pub payload: Bytes,
    pub time_base: TimeBase,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

impl MediaPacket {
    pub fn new(payload: Bytes, time_base: TimeBase) -> Self {
        Self {
            payload,
            time_base,
            pts: None,
            dts: None,
        }
    }

    /// Stamp the packet; decode order equals presentation order.
    pub fn with_timestamp(mut self, ticks: u64) -> Self {
        self.pts = Some(ticks);
        self.dts = Some(ticks);
        self
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_strings() {
        assert_eq!(MediaKind::Video.to_string(), "video");
        assert_eq!(MediaKind::Audio.rtx_mime_type(), "audio/rtx");
        assert_eq!(
            serde_json::to_string(&MediaKind::Video).unwrap(),
            "\"video\""
        );
    }

    #[test]
    fn test_packet_timestamp_sets_dts() {
        let packet = MediaPacket::new(Bytes::from_static(b"\x00\x00\x00\x01"), TimeBase::from_clock_rate(90_000))
            .with_timestamp(3_000);
        assert_eq!(packet.pts, Some(3_000));
        assert_eq!(packet.dts, packet.pts);
        assert_eq!(packet.len(), 4);
    }

    #[test]
    fn test_unstamped_packet() {
        let packet = MediaPacket::new(Bytes::new(), TimeBase::from_clock_rate(48_000));
        assert!(packet.is_empty());
        assert_eq!(packet.pts, None);
        assert_eq!(packet.dts, None);
    }
}
