//! In-memory transport for exercising sessions without a network.
//!
//! Every mock records what the session did to it and exposes hooks to play
//! the remote side: changing connection state, opening a channel from the
//! peer, delivering messages and raising picture loss.

use crate::errors::StreamError;
use crate::webrtc::codec::CodecCapability;
use crate::webrtc::ice::IceCandidate;
use crate::webrtc::packet::MediaKind;
use crate::webrtc::peer::{
    ChannelMessage, ConnectionState, DataChannel, DataChannelInit, EventHandler, HandlerFuture,
    IceCandidateInit, PeerConnection, RtcConfiguration, RtpSender, RtpTransceiver,
    SessionDescription, TransportEngine,
};
use crate::webrtc::relay::MediaRelay;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type SharedHandler<T> = Arc<dyn Fn(T) -> HandlerFuture + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Last handler registered for one event
struct HandlerSlot<T> {
    handler: Mutex<Option<SharedHandler<T>>>,
}

impl<T> Default for HandlerSlot<T> {
    fn default() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }
}

impl<T> HandlerSlot<T> {
    fn set(&self, handler: EventHandler<T>) {
        *lock(&self.handler) = Some(Arc::from(handler));
    }

    fn is_set(&self) -> bool {
        lock(&self.handler).is_some()
    }

    async fn fire(&self, value: T) {
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(value).await;
        }
    }
}

/// Default video capability list: VP8 first, so the H.264 pin is visible
pub fn default_video_capabilities() -> Vec<CodecCapability> {
    vec![
        CodecCapability::new("video/VP8", 90_000, 96),
        CodecCapability::new("video/rtx", 90_000, 97).with_fmtp("apt=96"),
        CodecCapability::new("video/H264", 90_000, 102)
            .with_fmtp("level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"),
        CodecCapability::new("video/rtx", 90_000, 103).with_fmtp("apt=102"),
    ]
}

pub fn default_audio_capabilities() -> Vec<CodecCapability> {
    let mut opus = CodecCapability::new("audio/opus", 48_000, 111).with_fmtp("minptime=10;useinbandfec=1");
    opus.channels = 2;
    vec![opus]
}

/// Engine handing out [`MockPeerConnection`]s
pub struct MockEngine {
    video_capabilities: Vec<CodecCapability>,
    connections: Mutex<Vec<Arc<MockPeerConnection>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            video_capabilities: default_video_capabilities(),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn with_video_capabilities(mut self, capabilities: Vec<CodecCapability>) -> Self {
        self.video_capabilities = capabilities;
        self
    }

    /// Drop every retransmission codec from the video capabilities
    pub fn without_rtx(mut self) -> Self {
        self.video_capabilities
            .retain(|codec| !codec.mime_type.eq_ignore_ascii_case("video/rtx"));
        self
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn last_connection(&self) -> Option<Arc<MockPeerConnection>> {
        lock(&self.connections).last().cloned()
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn new_peer_connection(
        &self,
        config: RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, StreamError> {
        let connection = Arc::new(MockPeerConnection::new(
            config,
            self.video_capabilities.clone(),
        ));
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }
}

pub struct MockPeerConnection {
    config: RtcConfiguration,
    video_capabilities: Vec<CodecCapability>,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    data_channels: Mutex<Vec<Arc<MockDataChannel>>>,
    senders: Mutex<Vec<Arc<MockRtpSender>>>,
    transceivers: Mutex<Vec<Arc<MockTransceiver>>>,
    local_description: Mutex<Option<SessionDescription>>,
    remote_description: Mutex<Option<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    on_data_channel: HandlerSlot<Arc<dyn DataChannel>>,
    on_state_change: HandlerSlot<ConnectionState>,
    on_ice_candidate: HandlerSlot<IceCandidateInit>,
}

impl MockPeerConnection {
    pub fn new(config: RtcConfiguration, video_capabilities: Vec<CodecCapability>) -> Self {
        Self {
            config,
            video_capabilities,
            state: Mutex::new(ConnectionState::New),
            closed: AtomicBool::new(false),
            data_channels: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            transceivers: Mutex::new(Vec::new()),
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            on_data_channel: HandlerSlot::default(),
            on_state_change: HandlerSlot::default(),
            on_ice_candidate: HandlerSlot::default(),
        }
    }

    pub fn config(&self) -> &RtcConfiguration {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Move to `state` and run the state change handler to completion
    pub async fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        self.on_state_change.fire(state).await;
    }

    pub fn has_state_handler(&self) -> bool {
        self.on_state_change.is_set()
    }

    /// Open a channel from the remote side
    pub async fn open_remote_channel(&self, label: &str) -> Arc<MockDataChannel> {
        let channel = Arc::new(MockDataChannel::new(label));
        self.on_data_channel
            .fire(Arc::clone(&channel) as Arc<dyn DataChannel>)
            .await;
        channel
    }

    /// Report a locally gathered candidate
    pub async fn gather_candidate(&self, candidate: IceCandidateInit) {
        self.on_ice_candidate.fire(candidate).await;
    }

    pub fn data_channel(&self, label: &str) -> Option<Arc<MockDataChannel>> {
        lock(&self.data_channels)
            .iter()
            .find(|channel| channel.label == label)
            .cloned()
    }

    pub fn data_channel_labels(&self) -> Vec<String> {
        lock(&self.data_channels)
            .iter()
            .map(|channel| channel.label.clone())
            .collect()
    }

    pub fn track_kinds(&self) -> Vec<MediaKind> {
        lock(&self.senders).iter().map(|sender| sender.kind).collect()
    }

    pub fn sender(&self, kind: MediaKind) -> Option<Arc<MockRtpSender>> {
        lock(&self.senders)
            .iter()
            .find(|sender| sender.kind == kind)
            .cloned()
    }

    /// Relay feeding the `kind` track, for pulling packets as the transport would
    pub fn relay(&self, kind: MediaKind) -> Option<MediaRelay> {
        self.sender(kind).map(|sender| sender.relay.clone())
    }

    pub fn codec_preferences(&self, kind: MediaKind) -> Vec<CodecCapability> {
        lock(&self.transceivers)
            .iter()
            .find(|transceiver| transceiver.kind == kind)
            .map(|transceiver| transceiver.preferences())
            .unwrap_or_default()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local_description).clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote_description).clone()
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.remote_candidates).clone()
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.is_closed() {
            return Err(StreamError::Transport("peer connection is closed".to_string()));
        }
        Ok(())
    }

    fn offer_sdp(&self) -> String {
        let mut sdp = String::from("v=0\r\no=- 4611731400430051336 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n");
        for (mid, transceiver) in lock(&self.transceivers).iter().enumerate() {
            let payload_types: Vec<String> = transceiver
                .preferences()
                .iter()
                .map(|codec| codec.payload_type.to_string())
                .collect();
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\na=mid:{}\r\na=sendonly\r\n",
                transceiver.kind,
                payload_types.join(" "),
                mid
            ));
        }
        sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        sdp
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    fn connection_state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, StreamError> {
        self.ensure_open()?;
        let channel = Arc::new(MockDataChannel::with_init(label, init));
        lock(&self.data_channels).push(Arc::clone(&channel));
        Ok(channel)
    }

    fn on_data_channel(&self, handler: EventHandler<Arc<dyn DataChannel>>) {
        self.on_data_channel.set(handler);
    }

    fn on_connection_state_change(&self, handler: EventHandler<ConnectionState>) {
        self.on_state_change.set(handler);
    }

    fn on_ice_candidate(&self, handler: EventHandler<IceCandidateInit>) {
        self.on_ice_candidate.set(handler);
    }

    async fn add_track(&self, relay: MediaRelay) -> Result<Arc<dyn RtpSender>, StreamError> {
        self.ensure_open()?;
        let kind = relay.kind();
        let capabilities = match kind {
            MediaKind::Video => self.video_capabilities.clone(),
            MediaKind::Audio => default_audio_capabilities(),
        };
        let sender = Arc::new(MockRtpSender {
            id: format!("{}-{}", kind, lock(&self.senders).len()),
            kind,
            capabilities,
            relay,
            on_pli: HandlerSlot::default(),
        });
        lock(&self.transceivers).push(Arc::new(MockTransceiver {
            sender_id: sender.id.clone(),
            kind,
            preferences: Mutex::new(Vec::new()),
        }));
        lock(&self.senders).push(Arc::clone(&sender));
        Ok(sender)
    }

    async fn transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>> {
        lock(&self.transceivers)
            .iter()
            .map(|transceiver| Arc::clone(transceiver) as Arc<dyn RtpTransceiver>)
            .collect()
    }

    async fn create_offer(&self) -> Result<SessionDescription, StreamError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(self.offer_sdp()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        self.ensure_open()?;
        *lock(&self.local_description) = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local_description).clone()
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        self.ensure_open()?;
        *lock(&self.remote_description) = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError> {
        self.ensure_open()?;
        lock(&self.remote_candidates).push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let channels: Vec<_> = lock(&self.data_channels).clone();
        for channel in channels {
            channel.close();
        }
        self.set_state(ConnectionState::Closed).await;
        Ok(())
    }
}

pub struct MockDataChannel {
    label: String,
    init: DataChannelInit,
    closed: AtomicBool,
    sent: Mutex<Vec<String>>,
    on_open: HandlerSlot<()>,
    on_close: HandlerSlot<()>,
    on_error: HandlerSlot<String>,
    on_message: HandlerSlot<ChannelMessage>,
}

impl MockDataChannel {
    pub fn new(label: &str) -> Self {
        Self::with_init(label, DataChannelInit::default())
    }

    pub fn with_init(label: &str, init: DataChannelInit) -> Self {
        Self {
            label: label.to_string(),
            init,
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            on_open: HandlerSlot::default(),
            on_close: HandlerSlot::default(),
            on_error: HandlerSlot::default(),
            on_message: HandlerSlot::default(),
        }
    }

    pub fn init(&self) -> DataChannelInit {
        self.init
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Text frames sent so far, oldest first
    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    /// Sent frames decoded as JSON; undecodable frames are skipped
    pub fn sent_json(&self) -> Vec<Value> {
        lock(&self.sent)
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub async fn deliver(&self, message: ChannelMessage) {
        self.on_message.fire(message).await;
    }

    pub async fn fire_open(&self) {
        self.on_open.fire(()).await;
    }

    pub async fn fire_close(&self) {
        self.on_close.fire(()).await;
    }

    pub async fn fire_error(&self, error: &str) {
        self.on_error.fire(error.to_string()).await;
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: String) -> Result<(), StreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Transport(format!(
                "data channel {} is closed",
                self.label
            )));
        }
        lock(&self.sent).push(text);
        Ok(())
    }

    fn on_open(&self, handler: EventHandler<()>) {
        self.on_open.set(handler);
    }

    fn on_close(&self, handler: EventHandler<()>) {
        self.on_close.set(handler);
    }

    fn on_error(&self, handler: EventHandler<String>) {
        self.on_error.set(handler);
    }

    fn on_message(&self, handler: EventHandler<ChannelMessage>) {
        self.on_message.set(handler);
    }
}

pub struct MockRtpSender {
    id: String,
    kind: MediaKind,
    capabilities: Vec<CodecCapability>,
    relay: MediaRelay,
    on_pli: HandlerSlot<()>,
}

impl MockRtpSender {
    /// Raise a picture loss indication as a remote decoder would
    pub async fn trigger_pli(&self) {
        self.on_pli.fire(()).await;
    }
}

#[async_trait]
impl RtpSender for MockRtpSender {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn codec_capabilities(&self) -> Vec<CodecCapability> {
        self.capabilities.clone()
    }

    fn on_pli(&self, handler: EventHandler<()>) {
        self.on_pli.set(handler);
    }
}

pub struct MockTransceiver {
    sender_id: String,
    kind: MediaKind,
    preferences: Mutex<Vec<CodecCapability>>,
}

impl MockTransceiver {
    pub fn preferences(&self) -> Vec<CodecCapability> {
        lock(&self.preferences).clone()
    }
}

#[async_trait]
impl RtpTransceiver for MockTransceiver {
    async fn sender_id(&self) -> Option<String> {
        Some(self.sender_id.clone())
    }

    async fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<(), StreamError> {
        *lock(&self.preferences) = codecs;
        Ok(())
    }
}
