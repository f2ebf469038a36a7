//! Property-Based Tests for CrabStream
//!
//! These tests verify invariants of the packet path and the wire formats
//! using proptest for input generation and shrinking.
//!
//! Run with: cargo test --test stream_props

use crabstream::timing::{ns_to_ticks, TimeBase, NANOS_PER_SECOND};
use crabstream::webrtc::bridge::Bridge;
use crabstream::webrtc::ice::IceCandidate;
use crabstream::webrtc::protocol::{ControlMessage, CLIPBOARD_LIMIT};
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════
// BRIDGE INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: Only the most recent item survives a burst of sets
    #[test]
    fn bridge_keeps_newest_item(items in prop::collection::vec(any::<u32>(), 1..64)) {
        let bridge = Bridge::new();
        for item in &items {
            bridge.set(*item);
        }

        prop_assert_eq!(bridge.try_get(), items.last().copied());
        prop_assert_eq!(bridge.try_get(), None);
        prop_assert_eq!(bridge.overwritten(), items.len() as u64 - 1);
    }

    /// INVARIANT: Nothing set after close is ever observed
    #[test]
    fn closed_bridge_ignores_sets(before in prop::option::of(any::<u8>()), after in any::<u8>()) {
        let bridge = Bridge::new();
        if let Some(item) = before {
            bridge.set(item);
        }
        bridge.close();
        bridge.set(after);

        prop_assert_eq!(bridge.try_get(), before);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TIMESTAMP CONVERSION
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: ticks = floor(ns * rate / 1e9)
    #[test]
    fn ticks_are_floored(
        ns in 0u64..(1u64 << 62),
        rate in prop::sample::select(vec![8_000u32, 16_000, 44_100, 48_000, 90_000]),
    ) {
        let ticks = ns_to_ticks(ns, rate);
        let lower = ticks as u128 * NANOS_PER_SECOND as u128;
        let upper = (ticks as u128 + 1) * NANOS_PER_SECOND as u128;
        let scaled = ns as u128 * rate as u128;
        prop_assert!(lower <= scaled && scaled < upper);
    }

    /// INVARIANT: Conversion never runs backwards
    #[test]
    fn ticks_are_monotonic(a in any::<u32>(), b in any::<u32>(), rate in 1u32..200_000) {
        let (lo, hi) = if a <= b { (a as u64, b as u64) } else { (b as u64, a as u64) };
        prop_assert!(ns_to_ticks(lo * 1000, rate) <= ns_to_ticks(hi * 1000, rate));
    }

    /// INVARIANT: Whole seconds convert exactly
    #[test]
    fn whole_seconds_are_exact(seconds in 0u64..1_000_000, rate in 1u32..200_000) {
        prop_assert_eq!(ns_to_ticks(seconds * NANOS_PER_SECOND, rate), seconds * rate as u64);
        prop_assert_eq!(
            TimeBase::from_clock_rate(rate).ticks_to_duration(seconds * rate as u64).as_secs(),
            seconds
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// WIRE FORMATS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    /// INVARIANT: Clipboard content is sent iff its base64 form fits the limit
    #[test]
    fn clipboard_respects_limit(len in 48_000usize..50_000) {
        let text = "a".repeat(len);
        let encoded_len = len.div_ceil(3) * 4;
        let message = ControlMessage::clipboard(&text);
        prop_assert_eq!(message.is_some(), encoded_len <= CLIPBOARD_LIMIT);
    }

    /// INVARIANT: Parsed candidates re-serialize to an equivalent candidate
    #[test]
    fn candidate_reparses(
        foundation in "[0-9a-zA-Z+/]{1,32}",
        component in 1u16..3,
        priority in any::<u32>(),
        octets in prop::array::uniform4(any::<u8>()),
        port in any::<u16>(),
        typ in prop::sample::select(vec!["host", "srflx", "prflx", "relay"]),
        generation in prop::option::of(0u32..10),
    ) {
        let mut line = format!(
            "candidate:{} {} udp {} {}.{}.{}.{} {} typ {}",
            foundation, component, priority, octets[0], octets[1], octets[2], octets[3], port, typ
        );
        if let Some(generation) = generation {
            line.push_str(&format!(" generation {}", generation));
        }

        let parsed = IceCandidate::from_sdp(&line).unwrap();
        prop_assert_eq!(parsed.to_string(), line);
        prop_assert_eq!(IceCandidate::from_sdp(&parsed.to_sdp()).unwrap(), parsed);
    }

    /// INVARIANT: Arbitrary input never panics the candidate parser
    #[test]
    fn candidate_parser_total(line in ".{0,200}") {
        let _ = IceCandidate::from_sdp(&line);
    }
}
