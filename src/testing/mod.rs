//! Testing utilities for CrabStream
//!
//! Provides an in-memory transport and synthetic encoded samples so sessions
//! can be exercised end to end without a network or a capture pipeline.

pub mod mock_transport;
pub mod synthetic_data;

use crate::config::CrabStreamConfig;

pub use mock_transport::{
    default_audio_capabilities, default_video_capabilities, MockDataChannel, MockEngine,
    MockPeerConnection, MockRtpSender, MockTransceiver,
};
pub use synthetic_data::{synthetic_audio_sample, synthetic_video_sample, SyntheticStreamProfile};

/// Default configuration with a TURN relay, enough for `start` to succeed
pub fn test_config() -> CrabStreamConfig {
    let mut config = CrabStreamConfig::default();
    config.ice.turn_servers = vec!["turn:crab@turn.example.com:3478".to_string()];
    config.ice.turn_username = "crab".to_string();
    config.ice.turn_password = "stream".to_string();
    config
}
