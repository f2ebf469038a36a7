//! Timestamp-domain conversion for media packets
//!
//! Capture pipelines stamp buffers in nanoseconds; RTP wants ticks of the
//! media clock. Everything here is integer math so conversions are exact
//! floors, never rounded.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// RTP video clock rate, independent of the capture source
pub const RTP_VIDEO_CLOCK_RATE: u32 = 90_000;

/// Audio clock rate used when a sample does not declare one
pub const DEFAULT_AUDIO_CLOCK_RATE: u32 = 48_000;

/// Sentinel some capture pipelines use for "no timestamp"
pub const CLOCK_TIME_NONE: u64 = u64::MAX;

/// Rational time base `numerator / denominator` seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeBase {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeBase {
    /// Time base of a clock running at `clock_rate` Hz, i.e. `1/clock_rate`
    pub const fn from_clock_rate(clock_rate: u32) -> Self {
        Self {
            numerator: 1,
            denominator: clock_rate,
        }
    }

    /// Ticks per second, or `None` for a degenerate time base
    pub fn clock_rate(&self) -> Option<u32> {
        if self.numerator == 0 || self.denominator == 0 {
            return None;
        }
        Some(self.denominator / self.numerator)
    }

    /// Duration of `ticks` in this time base
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        if self.denominator == 0 {
            return Duration::ZERO;
        }
        let nanos = ticks as u128 * self.numerator as u128 * NANOS_PER_SECOND as u128
            / self.denominator as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

impl std::fmt::Display for TimeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Convert a nanosecond timestamp to clock ticks.
///
/// `floor(timestamp_ns * clock_rate / 1e9)`; the intermediate product is
/// 128-bit so no realistic timestamp overflows.
#[inline]
pub fn ns_to_ticks(timestamp_ns: u64, clock_rate: u32) -> u64 {
    let ticks = timestamp_ns as u128 * clock_rate as u128 / NANOS_PER_SECOND as u128;
    ticks.min(u64::MAX as u128) as u64
}

/// Map a raw pipeline timestamp to `Some(ns)` unless it is the "unset" sentinel
#[inline]
pub fn defined_timestamp(raw_ns: u64) -> Option<u64> {
    (raw_ns != CLOCK_TIME_NONE).then_some(raw_ns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_second_is_90000_ticks() {
        assert_eq!(ns_to_ticks(1_000_000_000, RTP_VIDEO_CLOCK_RATE), 90_000);
    }

    #[test]
    fn test_audio_half_second() {
        assert_eq!(ns_to_ticks(500_000_000, 44_100), 22_050);
        assert_eq!(ns_to_ticks(500_000_000, 48_000), 24_000);
    }

    #[test]
    fn test_conversion_floors() {
        // 1 tick of 90kHz is 11111.1ns
        assert_eq!(ns_to_ticks(11_111, RTP_VIDEO_CLOCK_RATE), 0);
        assert_eq!(ns_to_ticks(11_112, RTP_VIDEO_CLOCK_RATE), 1);
    }

    #[test]
    fn test_large_timestamps_do_not_overflow() {
        let ten_years_ns = 10 * 365 * 24 * 3600 * NANOS_PER_SECOND;
        assert_eq!(
            ns_to_ticks(ten_years_ns, RTP_VIDEO_CLOCK_RATE),
            10 * 365 * 24 * 3600 * 90_000
        );
    }

    #[test]
    fn test_sentinel_is_undefined() {
        assert_eq!(defined_timestamp(CLOCK_TIME_NONE), None);
        assert_eq!(defined_timestamp(0), Some(0));
    }

    #[test]
    fn test_time_base() {
        let tb = TimeBase::from_clock_rate(RTP_VIDEO_CLOCK_RATE);
        assert_eq!(tb.clock_rate(), Some(90_000));
        assert_eq!(tb.to_string(), "1/90000");
        assert_eq!(tb.ticks_to_duration(90_000), Duration::from_secs(1));
        assert_eq!(tb.ticks_to_duration(3_000), Duration::from_nanos(33_333_333));
        assert_eq!(TimeBase::from_clock_rate(0).clock_rate(), None);
    }
}
