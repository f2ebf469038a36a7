//! Streaming session lifecycle.
//!
//! `SessionController` owns one peer connection at a time. `start` builds the
//! connection, its control channel and the two media tracks, pins the video
//! codec and emits the SDP offer; `stop` tears it all down. Between the two,
//! the controller pushes control messages to the peer and accepts the
//! remote answer and candidates from the signaling layer.

use crate::config::CrabStreamConfig;
use crate::errors::StreamError;
use crate::webrtc::aux_channel::{attach_aux_channel, AuxChannelSlot};
use crate::webrtc::bridge::{BridgeSlot, MediaBridges};
use crate::webrtc::codec::{force_codec, CodecPreference};
use crate::webrtc::events::{ChannelEvents, SignalingEvents, UnhandledEvents};
use crate::webrtc::ice::IceCandidate;
use crate::webrtc::ingest::SampleIngest;
use crate::webrtc::packet::MediaKind;
use crate::webrtc::peer::{
    ChannelMessage, ConnectionState, DataChannel, DataChannelInit, HandlerFuture,
    IceCandidateInit, PeerConnection, SdpType, SessionDescription, TransportEngine,
};
use crate::webrtc::protocol::{ControlChannel, ControlEnvelope, ControlMessage, SystemAction};
use crate::webrtc::relay::MediaRelay;
use crate::webrtc::scheduler::TaskSubmitter;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Weak};
use uuid::Uuid;

/// Resources of the active session
struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    peer_connection: Arc<dyn PeerConnection>,
    control: ControlChannel,
    aux_channel: AuxChannelSlot,
    bridges: MediaBridges,
    codec: CodecPreference,
}

/// Snapshot of the controller for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub session_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub connection_state: Option<ConnectionState>,
    pub control_channel_ready: bool,
    pub control_channel_label: Option<String>,
    pub aux_channel_label: Option<String>,
    pub video_codec: Option<String>,
    pub video_packets_overwritten: u64,
    pub audio_packets_overwritten: u64,
}

pub struct SessionController {
    config: CrabStreamConfig,
    engine: Arc<dyn TransportEngine>,
    submitter: TaskSubmitter,
    channel_events: Arc<dyn ChannelEvents>,
    signaling: Arc<dyn SignalingEvents>,
    bridges: BridgeSlot,
    session: Option<Session>,
    last_cursor_sent: Option<Value>,
}

impl SessionController {
    pub fn new(
        config: CrabStreamConfig,
        engine: Arc<dyn TransportEngine>,
        submitter: TaskSubmitter,
    ) -> Self {
        Self {
            config,
            engine,
            submitter,
            channel_events: Arc::new(UnhandledEvents),
            signaling: Arc::new(UnhandledEvents),
            bridges: BridgeSlot::new(),
            session: None,
            last_cursor_sent: None,
        }
    }

    pub fn with_channel_events(mut self, events: Arc<dyn ChannelEvents>) -> Self {
        self.channel_events = events;
        self
    }

    pub fn with_signaling_events(mut self, events: Arc<dyn SignalingEvents>) -> Self {
        self.signaling = events;
        self
    }

    pub fn config(&self) -> &CrabStreamConfig {
        &self.config
    }

    /// Entry point for the capture pipeline.
    ///
    /// The returned ingest outlives sessions: samples pushed while no session
    /// is running are dropped.
    pub fn sample_ingest(&self) -> SampleIngest {
        SampleIngest::new(self.bridges.clone(), self.submitter.clone())
            .with_default_audio_clock_rate(self.config.session.default_audio_clock_rate)
    }

    pub fn is_started(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|session| session.id)
    }

    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.session
            .as_ref()
            .map(|session| session.peer_connection.connection_state())
    }

    /// Channel most recently opened by the remote peer, if any
    pub fn aux_channel(&self) -> Option<Arc<dyn DataChannel>> {
        self.session
            .as_ref()
            .and_then(|session| session.aux_channel.get())
    }

    /// Start a session and emit the local SDP offer through `on_sdp`.
    ///
    /// Fails without touching the transport when no TURN server is
    /// configured. Any failure after the peer connection exists closes it.
    pub async fn start(&mut self) -> Result<(), StreamError> {
        if self.session.is_some() {
            return Err(StreamError::AlreadyStarted);
        }

        let rtc_config = self.config.ice.rtc_configuration()?;
        let id = Uuid::new_v4();
        log::info!("Starting session {}", id);

        let peer_connection = self.engine.new_peer_connection(rtc_config).await?;
        let bridges = MediaBridges::new();

        let (session, offer) = match self.negotiate(id, &peer_connection, &bridges).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                log::error!("Failed to start session {}: {}", id, e);
                bridges.close();
                if let Err(close_err) = peer_connection.close().await {
                    log::warn!("Failed to close peer connection: {}", close_err);
                }
                return Err(e);
            }
        };

        self.bridges.install(bridges);
        self.session = Some(session);

        log::info!("Session {} started, sending offer", id);
        self.signaling.on_sdp(SdpType::Offer, &offer);
        Ok(())
    }

    async fn negotiate(
        &self,
        id: Uuid,
        peer_connection: &Arc<dyn PeerConnection>,
        bridges: &MediaBridges,
    ) -> Result<(Session, String), StreamError> {
        let settings = &self.config.session;

        let channel = peer_connection
            .create_data_channel(
                &settings.control_channel_label,
                DataChannelInit::ordered_unreliable(),
            )
            .await?;
        register_control_handlers(channel.as_ref(), &self.channel_events);

        let aux_channel = AuxChannelSlot::new();
        {
            let slot = aux_channel.clone();
            let events = Arc::clone(&self.channel_events);
            let submitter = self.submitter.clone();
            peer_connection.on_data_channel(Box::new(
                move |channel: Arc<dyn DataChannel>| -> HandlerFuture {
                    attach_aux_channel(channel, &slot, Arc::clone(&events), &submitter);
                    Box::pin(async {})
                },
            ));
        }

        let weak = Arc::downgrade(peer_connection);
        peer_connection.on_connection_state_change(Box::new(
            move |state: ConnectionState| -> HandlerFuture {
                Box::pin(handle_connection_state(state, weak.clone()))
            },
        ));

        {
            let signaling = Arc::clone(&self.signaling);
            peer_connection.on_ice_candidate(Box::new(
                move |candidate: IceCandidateInit| -> HandlerFuture {
                    forward_local_candidate(signaling.as_ref(), &candidate);
                    Box::pin(async {})
                },
            ));
        }

        let video_sender = peer_connection
            .add_track(MediaRelay::new(MediaKind::Video, Arc::clone(&bridges.video)))
            .await?;
        {
            let signaling = Arc::clone(&self.signaling);
            video_sender.on_pli(Box::new(move |_: ()| -> HandlerFuture {
                log::info!("PLI received, requesting key frame");
                signaling.request_key_frame();
                Box::pin(async {})
            }));
        }
        peer_connection
            .add_track(MediaRelay::new(MediaKind::Audio, Arc::clone(&bridges.audio)))
            .await?;

        let codec = force_codec(peer_connection.as_ref(), &video_sender, &settings.video_codec).await?;

        let offer = peer_connection.create_offer().await?;
        peer_connection.set_local_description(offer.clone()).await?;
        // Prefer the description as applied, it may carry gathered candidates.
        let local = peer_connection.local_description().await.unwrap_or(offer);

        let session = Session {
            id,
            started_at: Utc::now(),
            peer_connection: Arc::clone(peer_connection),
            control: ControlChannel::new(channel),
            aux_channel,
            bridges: bridges.clone(),
            codec,
        };
        Ok((session, local.sdp))
    }

    /// Apply the remote answer.
    ///
    /// `sdp_type` must be `"answer"` and `sdp` non-empty; anything else is a
    /// protocol error.
    pub async fn set_remote_answer(
        &self,
        sdp_type: &str,
        sdp: Option<&str>,
    ) -> Result<(), StreamError> {
        if sdp_type != SdpType::Answer.as_str() {
            return Err(StreamError::SessionProtocol(format!(
                "sdp type was \"{}\", expected \"answer\"",
                sdp_type
            )));
        }
        let sdp = sdp.filter(|sdp| !sdp.is_empty()).ok_or_else(|| {
            StreamError::SessionProtocol("sdp can't be empty".to_string())
        })?;

        let session = self.session.as_ref().ok_or(StreamError::NotStarted)?;
        log::info!("Setting remote answer ({} bytes)", sdp.len());
        session
            .peer_connection
            .set_remote_description(SessionDescription::answer(sdp))
            .await
    }

    /// Parse and apply a remote candidate.
    pub async fn add_remote_ice_candidate(
        &self,
        candidate: &str,
        sdp_mid: Option<&str>,
    ) -> Result<(), StreamError> {
        let candidate =
            IceCandidate::from_sdp(candidate)?.with_sdp_mid(sdp_mid.map(str::to_string));

        let session = self.session.as_ref().ok_or(StreamError::NotStarted)?;
        log::debug!("Adding remote candidate {}", candidate);
        session.peer_connection.add_ice_candidate(candidate).await
    }

    /// Tear down the active session. A no-op when nothing is running.
    pub async fn stop(&mut self) -> Result<(), StreamError> {
        let Some(session) = self.session.take() else {
            log::debug!("stop requested with no active session");
            return Ok(());
        };

        log::info!("Stopping session {}", session.id);
        self.bridges.clear();
        session.bridges.close();
        session.aux_channel.clear();

        let result = session.peer_connection.close().await;
        match &result {
            Ok(()) => log::info!("Session {} stopped", session.id),
            Err(e) => log::warn!("Session {} stopped with close error: {}", session.id, e),
        }
        result
    }

    /// True when a session exists and its peer connection is connected
    pub fn is_control_channel_ready(&self) -> bool {
        self.connection_state() == Some(ConnectionState::Connected)
    }

    fn ready_control(&self, tag: &str) -> Option<&ControlChannel> {
        if !self.is_control_channel_ready() {
            log::debug!("skipping message because data channel is not ready: {}", tag);
            return None;
        }
        self.session.as_ref().map(|session| &session.control)
    }

    async fn send_message(&self, message: ControlMessage) {
        let Some(control) = self.ready_control(message.tag()) else {
            return;
        };
        if let Err(e) = control.send(&message).await {
            log::warn!("Failed to send {} message: {}", message.tag(), e);
        }
    }

    /// Send an arbitrary `{"type", "data"}` message
    pub async fn send_raw(&self, msg_type: &str, data: Value) {
        let Some(control) = self.ready_control(msg_type) else {
            return;
        };
        if let Err(e) = control.send_envelope(&ControlEnvelope::new(msg_type, data)).await {
            log::warn!("Failed to send {} message: {}", msg_type, e);
        }
    }

    pub async fn send_clipboard_data(&self, text: &str) {
        if let Some(message) = ControlMessage::clipboard(text) {
            self.send_message(message).await;
        }
    }

    /// Send a cursor descriptor. It is remembered even when the channel is
    /// not ready, so it can be replayed to a newly connected peer.
    pub async fn send_cursor_data(&mut self, cursor: Value) {
        self.last_cursor_sent = Some(cursor.clone());
        self.send_message(ControlMessage::Cursor(cursor)).await;
    }

    pub fn last_cursor_sent(&self) -> Option<&Value> {
        self.last_cursor_sent.as_ref()
    }

    pub async fn send_gpu_stats(&self, load: f64, memory_total: f64, memory_used: f64) {
        self.send_message(ControlMessage::GpuStats {
            load,
            memory_total,
            memory_used,
        })
        .await;
    }

    pub async fn send_reload_window(&self) {
        log::info!("Sending window reload");
        self.send_message(ControlMessage::system(SystemAction::Reload)).await;
    }

    pub async fn send_framerate(&self, framerate: u32) {
        log::info!("Sending framerate {}", framerate);
        self.send_message(ControlMessage::system(SystemAction::VideoFramerate(framerate)))
            .await;
    }

    pub async fn send_video_bitrate(&self, bitrate: u32) {
        log::info!("Sending video bitrate {}", bitrate);
        self.send_message(ControlMessage::system(SystemAction::VideoBitrate(bitrate)))
            .await;
    }

    pub async fn send_audio_bitrate(&self, bitrate: u32) {
        log::info!("Sending audio bitrate {}", bitrate);
        self.send_message(ControlMessage::system(SystemAction::AudioBitrate(bitrate)))
            .await;
    }

    pub async fn send_encoder(&self, encoder: &str) {
        log::info!("Sending encoder {}", encoder);
        self.send_message(ControlMessage::system(SystemAction::Encoder(
            encoder.to_string(),
        )))
        .await;
    }

    pub async fn send_resize_enabled(&self, enabled: bool) {
        log::info!("Sending resize enabled {}", enabled);
        self.send_message(ControlMessage::system(SystemAction::Resize(enabled)))
            .await;
    }

    pub async fn send_remote_resolution(&self, resolution: &str) {
        log::info!("Sending remote resolution {}", resolution);
        self.send_message(ControlMessage::system(SystemAction::Resolution(
            resolution.to_string(),
        )))
        .await;
    }

    /// `start_time` in seconds
    pub async fn send_ping(&self, start_time: f64) {
        self.send_message(ControlMessage::ping(start_time)).await;
    }

    pub async fn send_latency_time(&self, latency_ms: f64) {
        self.send_message(ControlMessage::LatencyMeasurement { latency_ms })
            .await;
    }

    pub async fn send_system_stats(&self, cpu_percent: f64, mem_total: u64, mem_used: u64) {
        self.send_message(ControlMessage::SystemStats {
            cpu_percent,
            mem_total,
            mem_used,
        })
        .await;
    }

    pub fn stats(&self) -> SessionStats {
        let session = self.session.as_ref();
        SessionStats {
            session_id: session.map(|s| s.id),
            started_at: session.map(|s| s.started_at),
            connection_state: self.connection_state(),
            control_channel_ready: self.is_control_channel_ready(),
            control_channel_label: session.map(|s| s.control.label().to_string()),
            aux_channel_label: session.and_then(|s| s.aux_channel.label()),
            video_codec: session.map(|s| s.codec.primary.mime_type.clone()),
            video_packets_overwritten: session.map_or(0, |s| s.bridges.video.overwritten()),
            audio_packets_overwritten: session.map_or(0, |s| s.bridges.audio.overwritten()),
        }
    }
}

fn register_control_handlers(channel: &dyn DataChannel, events: &Arc<dyn ChannelEvents>) {
    let on_open = Arc::clone(events);
    channel.on_open(Box::new(move |_: ()| -> HandlerFuture {
        on_open.on_open();
        Box::pin(async {})
    }));

    let on_close = Arc::clone(events);
    channel.on_close(Box::new(move |_: ()| -> HandlerFuture {
        on_close.on_close();
        Box::pin(async {})
    }));

    let on_error = Arc::clone(events);
    channel.on_error(Box::new(move |error: String| -> HandlerFuture {
        on_error.on_error(&error);
        Box::pin(async {})
    }));

    let on_message = Arc::clone(events);
    channel.on_message(Box::new(move |message: ChannelMessage| -> HandlerFuture {
        match message {
            ChannelMessage::Text(text) => on_message.on_message(text),
            ChannelMessage::Binary(data) => on_message.on_binary_message(data),
        }
        Box::pin(async {})
    }));
}

async fn handle_connection_state(state: ConnectionState, connection: Weak<dyn PeerConnection>) {
    log::info!("Peer connection state changed: {}", state);
    if state != ConnectionState::Failed {
        return;
    }
    let Some(connection) = connection.upgrade() else {
        return;
    };
    log::warn!("Peer connection failed, closing");
    if let Err(e) = connection.close().await {
        log::error!("Failed to close failed peer connection: {}", e);
    }
}

fn forward_local_candidate(signaling: &dyn SignalingEvents, candidate: &IceCandidateInit) {
    if candidate.candidate.is_empty() {
        // End-of-candidates marker
        return;
    }
    signaling.on_ice(candidate.sdp_mline_index.unwrap_or(0), &candidate.candidate);
}
