//! Event sinks supplied to the session controller at construction.
//!
//! Every method has a default that logs the event as unhandled, so a sink
//! only overrides what it cares about.

use crate::webrtc::peer::SdpType;
use bytes::Bytes;
use tokio::sync::mpsc;

/// Events from the control channel and the auxiliary channel
pub trait ChannelEvents: Send + Sync {
    fn on_open(&self) {
        log::warn!("unhandled on_data_open");
    }

    fn on_close(&self) {
        log::warn!("unhandled on_data_close");
    }

    fn on_error(&self, error: &str) {
        log::warn!("unhandled on_data_error: {}", error);
    }

    /// Text message on the control channel
    fn on_message(&self, message: String) {
        log::warn!("unhandled on_data_message ({} bytes)", message.len());
    }

    /// Binary payload, including everything received on the auxiliary channel
    fn on_binary_message(&self, data: Bytes) {
        log::warn!("unhandled on_data_msg_bytes ({} bytes)", data.len());
    }
}

/// Outputs toward the signaling layer and the encoder
pub trait SignalingEvents: Send + Sync {
    fn on_sdp(&self, sdp_type: SdpType, sdp: &str) {
        log::warn!("unhandled sdp event: {} ({} bytes)", sdp_type, sdp.len());
    }

    fn on_ice(&self, mline_index: u16, candidate: &str) {
        log::warn!("unhandled ice event: {} {}", mline_index, candidate);
    }

    /// The remote decoder lost a picture and needs a key frame
    fn request_key_frame(&self) {
        log::warn!("unhandled request_idr_frame");
    }
}

/// Sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct UnhandledEvents;

impl ChannelEvents for UnhandledEvents {}
impl SignalingEvents for UnhandledEvents {}

/// Everything the controller can report, as a value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    DataOpen,
    DataClose,
    DataError(String),
    DataMessage(String),
    DataBytes(Bytes),
    Sdp { sdp_type: SdpType, sdp: String },
    Ice { mline_index: u16, candidate: String },
    KeyFrameRequested,
}

/// Sink forwarding every event into an unbounded channel
#[derive(Debug, Clone)]
pub struct EventForwarder {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventForwarder {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("session event receiver dropped");
        }
    }
}

impl ChannelEvents for EventForwarder {
    fn on_open(&self) {
        self.forward(SessionEvent::DataOpen);
    }

    fn on_close(&self) {
        self.forward(SessionEvent::DataClose);
    }

    fn on_error(&self, error: &str) {
        self.forward(SessionEvent::DataError(error.to_string()));
    }

    fn on_message(&self, message: String) {
        self.forward(SessionEvent::DataMessage(message));
    }

    fn on_binary_message(&self, data: Bytes) {
        self.forward(SessionEvent::DataBytes(data));
    }
}

impl SignalingEvents for EventForwarder {
    fn on_sdp(&self, sdp_type: SdpType, sdp: &str) {
        self.forward(SessionEvent::Sdp {
            sdp_type,
            sdp: sdp.to_string(),
        });
    }

    fn on_ice(&self, mline_index: u16, candidate: &str) {
        self.forward(SessionEvent::Ice {
            mline_index,
            candidate: candidate.to_string(),
        });
    }

    fn request_key_frame(&self) {
        self.forward(SessionEvent::KeyFrameRequested);
    }
}
