//! Conversion of encoded capture samples into timestamped media packets.
//!
//! Ingestion never fails outward: a bad sample is logged and dropped so the
//! capture loop keeps running.

use crate::errors::StreamError;
use crate::timing::{self, TimeBase, DEFAULT_AUDIO_CLOCK_RATE, RTP_VIDEO_CLOCK_RATE};
use crate::webrtc::bridge::BridgeSlot;
use crate::webrtc::packet::{MediaKind, MediaPacket};
use crate::webrtc::scheduler::{TaskDone, TaskSubmitter};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Signal returned to the capture pipeline after each sample.
///
/// Bad samples are dropped, never reported upstream, so the pipeline is
/// always told to keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    /// Keep producing samples
    Ok,
}

/// Media capabilities attached to a capture sample
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleCaps {
    /// e.g. `video/x-h264` or `audio/x-opus`
    pub media_type: String,
    /// Declared clock rate; only meaningful for audio
    pub rate: Option<u32>,
    pub channels: Option<u32>,
}

impl SampleCaps {
    pub fn video(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            rate: None,
            channels: None,
        }
    }

    pub fn audio(media_type: impl Into<String>, rate: Option<u32>, channels: u32) -> Self {
        Self {
            media_type: media_type.into(),
            rate,
            channels: Some(channels),
        }
    }
}

/// Encoded buffer as delivered by the capture pipeline
pub trait SampleBuffer {
    /// Map the buffer for reading
    fn map_readable(&self) -> Result<&[u8], StreamError>;

    /// Presentation timestamp in nanoseconds, `None` when unset
    fn pts(&self) -> Option<u64>;
}

/// One sample from the capture pipeline
pub trait CaptureSample {
    type Buffer: SampleBuffer;

    fn buffer(&self) -> Option<&Self::Buffer>;
    fn caps(&self) -> Option<&SampleCaps>;
}

/// In-memory buffer for pipelines that already hand over owned bytes
#[derive(Debug, Clone)]
pub struct EncodedBuffer {
    pub data: Bytes,
    pub pts_ns: Option<u64>,
}

impl EncodedBuffer {
    /// `raw_pts_ns` may be [`timing::CLOCK_TIME_NONE`]
    pub fn new(data: impl Into<Bytes>, raw_pts_ns: u64) -> Self {
        Self {
            data: data.into(),
            pts_ns: timing::defined_timestamp(raw_pts_ns),
        }
    }
}

impl SampleBuffer for EncodedBuffer {
    fn map_readable(&self) -> Result<&[u8], StreamError> {
        Ok(&self.data)
    }

    fn pts(&self) -> Option<u64> {
        self.pts_ns
    }
}

#[derive(Debug, Clone, Default)]
pub struct EncodedSample {
    pub buffer: Option<EncodedBuffer>,
    pub caps: Option<SampleCaps>,
}

impl EncodedSample {
    pub fn new(buffer: EncodedBuffer, caps: SampleCaps) -> Self {
        Self {
            buffer: Some(buffer),
            caps: Some(caps),
        }
    }
}

impl CaptureSample for EncodedSample {
    type Buffer = EncodedBuffer;

    fn buffer(&self) -> Option<&EncodedBuffer> {
        self.buffer.as_ref()
    }

    fn caps(&self) -> Option<&SampleCaps> {
        self.caps.as_ref()
    }
}

/// Feeds capture samples into the current session's bridges.
#[derive(Clone)]
pub struct SampleIngest {
    bridges: BridgeSlot,
    submitter: TaskSubmitter,
    default_audio_clock_rate: u32,
}

impl SampleIngest {
    pub fn new(bridges: BridgeSlot, submitter: TaskSubmitter) -> Self {
        Self {
            bridges,
            submitter,
            default_audio_clock_rate: DEFAULT_AUDIO_CLOCK_RATE,
        }
    }

    pub fn with_default_audio_clock_rate(mut self, clock_rate: u32) -> Self {
        if clock_rate > 0 {
            self.default_audio_clock_rate = clock_rate;
        }
        self
    }

    /// True while a session has bridges installed
    pub fn is_active(&self) -> bool {
        self.bridges.is_installed()
    }

    /// Hand a sample over from the capture thread.
    ///
    /// The sample is processed on the event loop; this returns as soon as
    /// the work is queued. Samples submitted from one thread reach the
    /// bridge in submission order.
    pub fn submit<S>(&self, sample: S, kind: MediaKind) -> TaskDone
    where
        S: CaptureSample + Send + 'static,
    {
        let ingest = self.clone();
        self.submitter.submit(async move {
            ingest.ingest(&sample, kind);
        })
    }

    /// Convert `sample` and store it in the bridge for `kind`.
    pub fn ingest<S: CaptureSample>(&self, sample: &S, kind: MediaKind) -> FlowStatus {
        let (Some(buffer), Some(caps)) = (sample.buffer(), sample.caps()) else {
            log::warn!("ingest: {} sample is missing its buffer or caps", kind);
            return FlowStatus::Ok;
        };

        let data = match buffer.map_readable() {
            Ok(data) => data,
            Err(e) => {
                log::error!("ingest: failed to map {} buffer, dropping sample: {}", kind, e);
                return FlowStatus::Ok;
            }
        };

        match self.packetize(data, buffer.pts(), caps, kind) {
            Ok(packet) => self.route(packet, kind),
            Err(e) => log::error!("error processing {} sample: {}", kind, e),
        }

        FlowStatus::Ok
    }

    fn packetize(
        &self,
        data: &[u8],
        pts_ns: Option<u64>,
        caps: &SampleCaps,
        kind: MediaKind,
    ) -> Result<MediaPacket, StreamError> {
        if let Some((caps_kind, _)) = caps.media_type.split_once('/') {
            if caps_kind != kind.as_str() {
                return Err(StreamError::SampleProcessing(format!(
                    "caps '{}' do not describe {} data",
                    caps.media_type, kind
                )));
            }
        }

        let clock_rate = self.clock_rate(caps, kind);
        let packet = MediaPacket::new(
            Bytes::copy_from_slice(data),
            TimeBase::from_clock_rate(clock_rate),
        );

        Ok(match pts_ns {
            Some(ns) => packet.with_timestamp(timing::ns_to_ticks(ns, clock_rate)),
            None => packet,
        })
    }

    fn clock_rate(&self, caps: &SampleCaps, kind: MediaKind) -> u32 {
        match kind {
            MediaKind::Video => RTP_VIDEO_CLOCK_RATE,
            MediaKind::Audio => match caps.rate {
                Some(rate) if rate > 0 => rate,
                _ => {
                    log::warn!(
                        "could not get clock rate from caps, falling back to {}",
                        self.default_audio_clock_rate
                    );
                    self.default_audio_clock_rate
                }
            },
        }
    }

    fn route(&self, packet: MediaPacket, kind: MediaKind) {
        match self.bridges.get(kind) {
            Some(bridge) => bridge.set(packet),
            None => log::trace!("no {} bridge, dropping packet", kind),
        }
    }
}
