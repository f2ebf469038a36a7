//! webrtc-rs implementation of the transport traits.
//!
//! Outgoing tracks are `TrackLocalStaticSample`s; a pump task per track pulls
//! packets from the session's relay and writes them as samples, deriving the
//! sample duration from consecutive timestamps. Picture loss is detected by
//! reading RTCP on the video sender.

use crate::errors::StreamError;
use crate::webrtc::codec::CodecCapability;
use crate::webrtc::ice::IceCandidate;
use crate::webrtc::packet::MediaKind;
use crate::webrtc::peer::{
    ChannelMessage, ConnectionState, DataChannel, DataChannelInit, EventHandler, HandlerFuture,
    IceCandidateInit, PeerConnection, RtcConfiguration, RtpSender, RtpTransceiver, SdpType,
    SessionDescription, TransportEngine,
};
use crate::webrtc::relay::MediaRelay;
use ::webrtc::api::interceptor_registry::register_default_interceptors;
use ::webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use ::webrtc::api::{APIBuilder, API};
use ::webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use ::webrtc::data_channel::data_channel_message::DataChannelMessage;
use ::webrtc::data_channel::RTCDataChannel;
use ::webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use ::webrtc::ice_transport::ice_server::RTCIceServer;
use ::webrtc::interceptor::registry::Registry;
use ::webrtc::media::Sample;
use ::webrtc::peer_connection::configuration::RTCConfiguration;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use ::webrtc::peer_connection::RTCPeerConnection;
use ::webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use ::webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use ::webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use ::webrtc::rtp_transceiver::{RTCPFeedback, RTCRtpTransceiver};
use ::webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use ::webrtc::track::track_local::TrackLocal;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const STREAM_ID: &str = "crabstream";

/// Sample duration used until two timestamps are known
fn fallback_duration(kind: MediaKind) -> Duration {
    match kind {
        MediaKind::Video => Duration::from_millis(16),
        MediaKind::Audio => Duration::from_millis(20),
    }
}

fn no_op() -> HandlerFuture {
    Box::pin(async {})
}

const MIME_TYPE_VIDEO_RTX: &str = "video/rtx";

/// Video codecs offered by the engine as (mime type, fmtp, payload type,
/// retransmission payload type). Every primary codec has an rtx companion so
/// the session can pin `[codec, rtx]`.
const VIDEO_CODECS: &[(&str, &str, u8, u8)] = &[
    (
        MIME_TYPE_H264,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f",
        102,
        121,
    ),
    (
        MIME_TYPE_H264,
        "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=640032",
        123,
        118,
    ),
    (MIME_TYPE_VP8, "", 96, 97),
];

const OPUS_PAYLOAD_TYPE: u8 = 111;

fn video_rtcp_feedback() -> Vec<RTCPFeedback> {
    [("goog-remb", ""), ("ccm", "fir"), ("nack", ""), ("nack", "pli")]
        .into_iter()
        .map(|(typ, parameter)| RTCPFeedback {
            typ: typ.to_owned(),
            parameter: parameter.to_owned(),
        })
        .collect()
}

fn register(
    media_engine: &mut MediaEngine,
    codec: RTCRtpCodecParameters,
    typ: RTPCodecType,
) -> Result<(), StreamError> {
    let mime_type = codec.capability.mime_type.clone();
    let payload_type = codec.payload_type;
    media_engine.register_codec(codec, typ).map_err(|e| {
        StreamError::Transport(format!(
            "Failed to register {} (pt {}): {}",
            mime_type, payload_type, e
        ))
    })
}

/// Register the audio and video codecs, each video codec with its rtx pair.
fn register_codecs(media_engine: &mut MediaEngine) -> Result<(), StreamError> {
    for &(mime_type, fmtp, payload_type, rtx_payload_type) in VIDEO_CODECS {
        register(
            media_engine,
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: mime_type.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: fmtp.to_owned(),
                    rtcp_feedback: video_rtcp_feedback(),
                },
                payload_type,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;
        register(
            media_engine,
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VIDEO_RTX.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: format!("apt={}", payload_type),
                    rtcp_feedback: vec![],
                },
                payload_type: rtx_payload_type,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;
    }

    register(
        media_engine,
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )
}

/// Transport engine backed by webrtc-rs
pub struct WebRtcEngine {
    api: API,
    video_codec: RTCRtpCodecCapability,
    audio_codec: RTCRtpCodecCapability,
}

impl WebRtcEngine {
    /// Engine with H.264, VP8 (each with rtx) and Opus, plus the default
    /// interceptors (NACK, RTCP reports)
    pub fn new() -> Result<Self, StreamError> {
        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                StreamError::Transport(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            video_codec: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                ..Default::default()
            },
            audio_codec: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
        })
    }

    /// Codec the outgoing video track is created with. Must agree with
    /// the session's pinned video codec.
    pub fn with_video_mime_type(mut self, mime_type: &str) -> Self {
        self.video_codec.mime_type = mime_type.to_owned();
        self
    }
}

fn to_rtc_configuration(config: RtcConfiguration) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config
            .ice_servers
            .into_iter()
            .map(|server| RTCIceServer {
                urls: server.urls,
                username: server.username.unwrap_or_default(),
                credential: server.credential.unwrap_or_default(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn new_peer_connection(
        &self,
        config: RtcConfiguration,
    ) -> Result<Arc<dyn PeerConnection>, StreamError> {
        let inner = self
            .api
            .new_peer_connection(to_rtc_configuration(config))
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to create peer connection: {}", e)))?;

        Ok(Arc::new(WebRtcPeerConnection {
            inner: Arc::new(inner),
            video_codec: self.video_codec.clone(),
            audio_codec: self.audio_codec.clone(),
        }))
    }
}

fn connection_state(state: RTCPeerConnectionState) -> ConnectionState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => ConnectionState::New,
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
    }
}

fn from_rtc_description(desc: RTCSessionDescription) -> Option<SessionDescription> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => return None,
    };
    Some(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, StreamError> {
    let result = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(StreamError::SessionProtocol(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    result.map_err(|e| StreamError::SessionProtocol(format!("invalid sdp: {}", e)))
}

pub struct WebRtcPeerConnection {
    inner: Arc<RTCPeerConnection>,
    video_codec: RTCRtpCodecCapability,
    audio_codec: RTCRtpCodecCapability,
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    fn connection_state(&self) -> ConnectionState {
        connection_state(self.inner.connection_state())
    }

    async fn create_data_channel(
        &self,
        label: &str,
        init: DataChannelInit,
    ) -> Result<Arc<dyn DataChannel>, StreamError> {
        let options = RTCDataChannelInit {
            ordered: Some(init.ordered),
            max_retransmits: init.max_retransmits,
            ..Default::default()
        };
        let channel = self
            .inner
            .create_data_channel(label, Some(options))
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to create data channel: {}", e)))?;
        Ok(Arc::new(WebRtcDataChannel { inner: channel }))
    }

    fn on_data_channel(&self, handler: EventHandler<Arc<dyn DataChannel>>) {
        self.inner
            .on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
                handler(Arc::new(WebRtcDataChannel { inner: channel }) as Arc<dyn DataChannel>)
            }));
    }

    fn on_connection_state_change(&self, handler: EventHandler<ConnectionState>) {
        self.inner
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                handler(connection_state(state))
            }));
    }

    fn on_ice_candidate(&self, handler: EventHandler<IceCandidateInit>) {
        self.inner
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return no_op();
                };
                match candidate.to_json() {
                    Ok(init) => handler(IceCandidateInit {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    }),
                    Err(e) => {
                        log::warn!("Failed to serialize local candidate: {}", e);
                        no_op()
                    }
                }
            }));
    }

    async fn add_track(&self, relay: MediaRelay) -> Result<Arc<dyn RtpSender>, StreamError> {
        let kind = relay.kind();
        let capability = match kind {
            MediaKind::Video => self.video_codec.clone(),
            MediaKind::Audio => self.audio_codec.clone(),
        };
        let track = Arc::new(TrackLocalStaticSample::new(
            capability,
            format!("{}-{}", STREAM_ID, kind),
            STREAM_ID.to_owned(),
        ));

        let sender = self
            .inner
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to add {} track: {}", kind, e)))?;

        tokio::spawn(pump_samples(relay, track));

        let wrapped = Arc::new(WebRtcSender {
            id: format!("{}-{}", STREAM_ID, kind),
            kind,
            inner: Arc::clone(&sender),
            pli: Arc::new(Mutex::new(None)),
        });
        tokio::spawn(read_rtcp(sender, Arc::clone(&wrapped.pli)));

        Ok(wrapped)
    }

    async fn transceivers(&self) -> Vec<Arc<dyn RtpTransceiver>> {
        self.inner
            .get_transceivers()
            .await
            .into_iter()
            .map(|inner| Arc::new(WebRtcTransceiver { inner }) as Arc<dyn RtpTransceiver>)
            .collect()
    }

    async fn create_offer(&self) -> Result<SessionDescription, StreamError> {
        let offer = self
            .inner
            .create_offer(None)
            .await
            .map_err(|e| StreamError::Transport(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
            .ok_or_else(|| StreamError::Transport("offer has no sdp type".to_string()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        self.inner
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(StreamError::transport)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.inner
            .local_description()
            .await
            .and_then(from_rtc_description)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), StreamError> {
        self.inner
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(|e| StreamError::SessionProtocol(format!("remote description rejected: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), StreamError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.to_string(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.inner
            .add_ice_candidate(init)
            .await
            .map_err(|e| StreamError::CandidateParse(format!("candidate rejected: {}", e)))
    }

    async fn close(&self) -> Result<(), StreamError> {
        self.inner.close().await.map_err(StreamError::transport)
    }
}

/// Write packets from `relay` to `track` until the relay is closed
async fn pump_samples(relay: MediaRelay, track: Arc<TrackLocalStaticSample>) {
    let kind = relay.kind();
    let mut last_pts: Option<u64> = None;
    let mut written: u64 = 0;

    while let Some(packet) = relay.next().await {
        let duration = match (packet.pts, last_pts) {
            (Some(pts), Some(prev)) if pts > prev => packet.time_base.ticks_to_duration(pts - prev),
            _ => fallback_duration(kind),
        };
        if packet.pts.is_some() {
            last_pts = packet.pts;
        }

        let sample = Sample {
            data: packet.payload,
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            log::debug!("Failed to write {} sample: {}", kind, e);
            continue;
        }
        written += 1;
        if written == 1 {
            log::info!("First {} sample written", kind);
        }
    }

    log::debug!("{} relay closed after {} samples", kind, written);
}

type PliHandler = Arc<Mutex<Option<Arc<dyn Fn(()) -> HandlerFuture + Send + Sync>>>>;

/// Drain RTCP for `sender`, firing the PLI handler on picture loss
async fn read_rtcp(sender: Arc<RTCRtpSender>, pli: PliHandler) {
    while let Ok((packets, _)) = sender.read_rtcp().await {
        for packet in packets {
            if packet
                .as_any()
                .downcast_ref::<PictureLossIndication>()
                .is_none()
            {
                continue;
            }
            let handler = pli.lock().unwrap_or_else(PoisonError::into_inner).clone();
            if let Some(handler) = handler {
                handler(()).await;
            }
        }
    }
}

pub struct WebRtcSender {
    id: String,
    kind: MediaKind,
    inner: Arc<RTCRtpSender>,
    pli: PliHandler,
}

#[async_trait]
impl RtpSender for WebRtcSender {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    async fn codec_capabilities(&self) -> Vec<CodecCapability> {
        self.inner
            .get_parameters()
            .await
            .rtp_parameters
            .codecs
            .into_iter()
            .map(|codec| CodecCapability {
                mime_type: codec.capability.mime_type,
                clock_rate: codec.capability.clock_rate,
                channels: codec.capability.channels,
                sdp_fmtp_line: codec.capability.sdp_fmtp_line,
                payload_type: codec.payload_type,
            })
            .collect()
    }

    fn on_pli(&self, handler: EventHandler<()>) {
        *self.pli.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::from(handler));
    }
}

pub struct WebRtcTransceiver {
    inner: Arc<RTCRtpTransceiver>,
}

#[async_trait]
impl RtpTransceiver for WebRtcTransceiver {
    async fn sender_id(&self) -> Option<String> {
        self.inner
            .sender()
            .await
            .track()
            .await
            .map(|track| track.id().to_owned())
    }

    async fn set_codec_preferences(&self, codecs: Vec<CodecCapability>) -> Result<(), StreamError> {
        // Reuse the engine's parameters so RTCP feedback settings survive.
        let available: Vec<RTCRtpCodecParameters> = self
            .inner
            .sender()
            .await
            .get_parameters()
            .await
            .rtp_parameters
            .codecs;

        let mut preferred = Vec::with_capacity(codecs.len());
        for codec in &codecs {
            let params = available
                .iter()
                .find(|params| params.payload_type == codec.payload_type)
                .cloned()
                .ok_or_else(|| {
                    StreamError::CodecNegotiation(format!(
                        "{} (pt {}) is not registered",
                        codec.mime_type, codec.payload_type
                    ))
                })?;
            preferred.push(params);
        }

        self.inner
            .set_codec_preferences(preferred)
            .await
            .map_err(|e| StreamError::CodecNegotiation(e.to_string()))
    }
}

pub struct WebRtcDataChannel {
    inner: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn send_text(&self, text: String) -> Result<(), StreamError> {
        self.inner
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(StreamError::transport)
    }

    fn on_open(&self, handler: EventHandler<()>) {
        self.inner.on_open(Box::new(move || handler(())));
    }

    fn on_close(&self, handler: EventHandler<()>) {
        self.inner.on_close(Box::new(move || handler(())));
    }

    fn on_error(&self, handler: EventHandler<String>) {
        self.inner
            .on_error(Box::new(move |error: ::webrtc::Error| handler(error.to_string())));
    }

    fn on_message(&self, handler: EventHandler<ChannelMessage>) {
        self.inner
            .on_message(Box::new(move |message: DataChannelMessage| {
                let message = if message.is_string {
                    match String::from_utf8(message.data.to_vec()) {
                        Ok(text) => ChannelMessage::Text(text),
                        Err(_) => ChannelMessage::Binary(message.data),
                    }
                } else {
                    ChannelMessage::Binary(message.data)
                };
                handler(message)
            }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::peer::IceServer;

    #[test]
    fn test_ice_servers_are_mapped() {
        let config = RtcConfiguration {
            ice_servers: vec![
                IceServer {
                    urls: vec!["stun:stun.example.com:3478".to_string()],
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: vec!["turn:turn.example.com:3478".to_string()],
                    username: Some("crab".to_string()),
                    credential: Some("stream".to_string()),
                },
            ],
        };
        let rtc = to_rtc_configuration(config);
        assert_eq!(rtc.ice_servers.len(), 2);
        assert!(rtc.ice_servers[0].username.is_empty());
        assert_eq!(rtc.ice_servers[1].credential, "stream");
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(
            connection_state(RTCPeerConnectionState::Failed),
            ConnectionState::Failed
        );
        assert_eq!(
            connection_state(RTCPeerConnectionState::Unspecified),
            ConnectionState::New
        );
    }

    #[tokio::test]
    async fn test_engine_builds_offer_with_pinned_codec() {
        let engine = WebRtcEngine::new().unwrap();
        let pc = engine
            .new_peer_connection(RtcConfiguration::default())
            .await
            .unwrap();
        let sender = pc
            .add_track(MediaRelay::new(
                MediaKind::Video,
                Arc::new(crate::webrtc::bridge::Bridge::new()),
            ))
            .await
            .unwrap();

        let capabilities = sender.codec_capabilities().await;
        assert!(capabilities
            .iter()
            .any(|codec| codec.mime_type.eq_ignore_ascii_case("video/rtx")
                && codec.sdp_fmtp_line == "apt=102"));

        let preference =
            crate::webrtc::codec::force_codec(pc.as_ref(), &sender, "video/H264")
                .await
                .unwrap();
        assert_eq!(preference.primary.mime_type, "video/H264");
        assert!(preference.rtx.mime_type.eq_ignore_ascii_case("video/rtx"));

        let offer = pc.create_offer().await.unwrap();
        assert!(offer.sdp.contains("H264"));
        assert!(offer.sdp.contains("rtx/90000"));
        pc.close().await.unwrap();
    }

    #[test]
    fn test_every_video_codec_has_distinct_rtx_pair() {
        let mut payload_types: Vec<u8> = VIDEO_CODECS
            .iter()
            .flat_map(|&(_, _, pt, rtx)| [pt, rtx])
            .chain([OPUS_PAYLOAD_TYPE])
            .collect();
        let total = payload_types.len();
        payload_types.sort_unstable();
        payload_types.dedup();
        assert_eq!(payload_types.len(), total);

        let mut media_engine = MediaEngine::default();
        register_codecs(&mut media_engine).unwrap();
    }
}
