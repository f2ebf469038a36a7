use crate::webrtc::bridge::Bridge;
use crate::webrtc::packet::{MediaKind, MediaPacket};
use std::sync::Arc;

/// Pull-side adapter handed to the transport as an outgoing track source.
///
/// Holds no buffering of its own; every `next` awaits the bound bridge.
#[derive(Clone)]
pub struct MediaRelay {
    kind: MediaKind,
    bridge: Arc<Bridge<MediaPacket>>,
}

impl MediaRelay {
    pub fn new(kind: MediaKind, bridge: Arc<Bridge<MediaPacket>>) -> Self {
        Self { kind, bridge }
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    /// Next packet for the track, or `None` once the session is torn down
    pub async fn next(&self) -> Option<MediaPacket> {
        self.bridge.get().await
    }
}

impl std::fmt::Debug for MediaRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaRelay")
            .field("kind", &self.kind)
            .field("closed", &self.bridge.is_closed())
            .finish()
    }
}
