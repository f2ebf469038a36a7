pub mod aux_channel;
pub mod bridge;
pub mod codec;
pub mod events;
pub mod ice;
/// Capture sample ingestion
///
/// Converts encoded samples from a capture pipeline into timestamped
/// packets and hands them to the active session.
pub mod ingest;
pub mod packet;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod scheduler;
/// Session lifecycle and control channel sends
pub mod session;

/// Transport implementation on top of webrtc-rs
#[cfg(feature = "webrtc")]
pub mod backend;

pub use bridge::{Bridge, BridgeSlot, MediaBridges};
pub use codec::{CodecCapability, CodecPreference};
pub use events::{ChannelEvents, EventForwarder, SessionEvent, SignalingEvents, UnhandledEvents};
pub use ice::IceCandidate;
pub use ingest::{CaptureSample, EncodedBuffer, EncodedSample, FlowStatus, SampleCaps, SampleIngest};
pub use packet::{MediaKind, MediaPacket};
pub use peer::{
    ConnectionState, DataChannel, PeerConnection, RtcConfiguration, SdpType, SessionDescription,
    TransportEngine,
};
pub use protocol::{ControlMessage, SystemAction, CLIPBOARD_LIMIT};
pub use scheduler::TaskSubmitter;
pub use session::{SessionController, SessionStats};

#[cfg(feature = "webrtc")]
pub use backend::WebRtcEngine;
