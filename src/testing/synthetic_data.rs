//! Synthetic encoded samples
//!
//! Mimics what a capture pipeline hands to the session: H.264 access units
//! in Annex B framing and 20 ms Opus packets, each with a nanosecond
//! presentation timestamp.

use crate::timing::NANOS_PER_SECOND;
use crate::webrtc::ingest::{EncodedBuffer, EncodedSample, SampleCaps};

/// Characteristics of the synthetic stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticStreamProfile {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// A key frame every this many frames
    pub key_frame_interval: u64,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub audio_frame_ms: u64,
}

impl SyntheticStreamProfile {
    pub const fn hd_60fps() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 60,
            key_frame_interval: 60,
            audio_sample_rate: 48_000,
            audio_channels: 2,
            audio_frame_ms: 20,
        }
    }

    /// Presentation time of video frame `frame_number`
    pub fn video_pts_ns(&self, frame_number: u64) -> u64 {
        frame_number * NANOS_PER_SECOND / self.frame_rate as u64
    }

    /// Presentation time of audio packet `frame_number`
    pub fn audio_pts_ns(&self, frame_number: u64) -> u64 {
        frame_number * self.audio_frame_ms * 1_000_000
    }
}

impl Default for SyntheticStreamProfile {
    fn default() -> Self {
        Self::hd_60fps()
    }
}

/// Annex B access unit: an IDR slice on key frames, a non-IDR slice otherwise.
/// The slice body varies per frame so consecutive packets are distinguishable.
pub fn synthetic_video_sample(profile: &SyntheticStreamProfile, frame_number: u64) -> EncodedSample {
    let key_frame = frame_number % profile.key_frame_interval == 0;
    let mut data = Vec::with_capacity(64);

    if key_frame {
        // SPS and PPS ahead of the IDR slice
        data.extend_from_slice(&[0, 0, 0, 1, 0x67, 0x42, 0xe0, 0x1f]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x68, 0xce, 0x3c, 0x80]);
        data.extend_from_slice(&[0, 0, 0, 1, 0x65]);
    } else {
        data.extend_from_slice(&[0, 0, 0, 1, 0x41]);
    }
    data.extend_from_slice(&frame_number.to_be_bytes());
    data.extend((0..32u8).map(|i| i.wrapping_add(frame_number as u8)));

    EncodedSample::new(
        EncodedBuffer::new(data, profile.video_pts_ns(frame_number)),
        SampleCaps::video("video/x-h264"),
    )
}

/// Opus packet with a CELT fullband 20 ms TOC byte
pub fn synthetic_audio_sample(profile: &SyntheticStreamProfile, frame_number: u64) -> EncodedSample {
    let toc = if profile.audio_channels > 1 { 0xfc } else { 0xf8 };
    let mut data = vec![toc];
    data.extend((0..40u8).map(|i| i ^ frame_number as u8));

    EncodedSample::new(
        EncodedBuffer::new(data, profile.audio_pts_ns(frame_number)),
        SampleCaps::audio(
            "audio/x-opus",
            Some(profile.audio_sample_rate),
            profile.audio_channels,
        ),
    )
}
