//! Transport collaborator contract.
//!
//! The session core drives a peer connection it does not implement: ICE,
//! DTLS/SRTP, congestion control and packetization all live behind these
//! traits. `backend` implements them on webrtc-rs; `testing` implements them
//! in memory.

use crate::errors::StreamError;
use crate::webrtc::codec::CodecCapability;
use crate::webrtc::ice::IceCandidate;
use crate::webrtc::packet::MediaKind;
use crate::webrtc::relay::MediaRelay;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

/// Future returned by transport event handlers
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback registered on a transport object for events carrying `T`
pub type EventHandler<T> = Box<dyn Fn(T) -> HandlerFuture + Send + Sync>;

/// Peer connection configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RtcConfiguration {
    pub ice_servers: Vec<IceServer>,
}

/// ICE server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// WebRTC peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::New => "new",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdpType {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "offer" => Ok(SdpType::Offer),
            "answer" => Ok(SdpType::Answer),
            "pranswer" => Ok(SdpType::Pranswer),
            "rollback" => Ok(SdpType::Rollback),
            other => Err(StreamError::SessionProtocol(format!(
                "unknown sdp type \"{}\"",
                other
            ))),
        }
    }
}

/// Session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Locally gathered ICE candidate as reported by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidateInit {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

/// Data channel delivery options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChannelInit {
    pub ordered: bool,
    /// `Some(0)` makes the channel unreliable: lost messages are never resent
    pub max_retransmits: Option<u16>,
}

impl DataChannelInit {
    /// In-order, no retransmissions
    pub fn ordered_unreliable() -> Self {
        Self {
            ordered: true,
            max_retransmits: Some(0),
        }
    }
}

/// Message received on a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn into_bytes(self) -> Bytes {
        match self {
            ChannelMessage::Text(text) => Bytes::from(text),
            ChannelMessage::Binary(data) => data,
        }
    }
}

/// Factory for peer connections
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn new_peer_connection(
        &self,
        config: RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, StreamError>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn connection_state(&self) -> ConnectionState;

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, StreamError>;

    /// Channel opened by the remote peer
    fn on_data_channel(&self, handler: EventHandler<Arc<dyn DataChannel>>);

    fn on_connection_state_change(&self, handler: EventHandler<ConnectionState>);

    fn on_ice_candidate(&self, handler: EventHandler<IceCandidateInit>);

    /// Attach an outgoing track fed by `relay`
    async fn add_track(&self, relay: MediaRelay) -> Result<Arc<dyn RtpSender>, StreamError>;

    async fn transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>>;

    async fn create_offer(&self) -> Result<SessionDescription, StreamError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), StreamError>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError>;

    async fn close(&self) -> Result<(), StreamError>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send_text(&self, text: String) -> Result<(), StreamError>;

    fn on_open(&self, handler: EventHandler<()>);

    fn on_close(&self, handler: EventHandler<()>);

    fn on_error(&self, handler: EventHandler<String>);

    fn on_message(&self, handler: EventHandler<ChannelMessage>);
}

#[async_trait]
pub trait RtpSender: Send + Sync {
    /// Identifier of the track this sender carries
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    /// Codecs the sender is able to use, in engine preference order
    async fn codec_capabilities(&self) -> Vec<CodecCapability>;

    /// Picture loss indication received from the remote peer
    fn on_pli(&self, handler: EventHandler<()>);
}

#[async_trait]
pub trait RtpTransceiver: Send + Sync {
    /// Track id of the sender owned by this transceiver
    async fn sender_id(&self) -> Option<String>;

    async fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<(), StreamError>;
}
