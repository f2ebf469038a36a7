//! CrabStream: WebRTC session orchestration for live desktop streaming
//!
//! This crate drives one outgoing streaming session to a remote peer:
//! encoded audio and video from a capture pipeline go out as media tracks,
//! and a JSON control channel carries clipboard, cursor, statistics and
//! display-setting messages.
//!
//! # Features
//! - SDP offer/answer and trickle ICE handling
//! - Low-latency newest-wins handoff from capture to transport
//! - Pinned video codec with retransmission support
//! - Picture loss driven key frame requests
//! - Pluggable transport, with a webrtc-rs backend behind the `webrtc` feature
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! crabstream = { version = "0.1", features = ["webrtc"] }
//! ```
//!
//! Then drive a session:
//! ```rust,ignore
//! use crabstream::{CrabStreamConfig, SessionController, TaskSubmitter, WebRtcEngine};
//! use std::sync::Arc;
//!
//! let config = CrabStreamConfig::load_or_default();
//! let engine = Arc::new(WebRtcEngine::new()?);
//! let mut session = SessionController::new(config, engine, TaskSubmitter::current()?)
//!     .with_signaling_events(signaling);
//! session.start().await?;
//! let ingest = session.sample_ingest();
//! ```
pub mod config;
pub mod errors;
pub mod timing;
pub mod webrtc;

// Testing utilities - in-memory transport and synthetic samples
pub mod testing;

// Re-exports for convenience
pub use config::{CrabStreamConfig, IceConfig, SessionConfig};
pub use errors::StreamError;
pub use crate::webrtc::{
    ChannelEvents, ConnectionState, ControlMessage, EncodedBuffer, EncodedSample, FlowStatus,
    MediaKind, SampleCaps, SampleIngest, SessionController, SessionStats, SignalingEvents,
    TaskSubmitter,
};

#[cfg(feature = "webrtc")]
pub use crate::webrtc::WebRtcEngine;

/// Initialize logging for the streaming session
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabstream=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        webrtc_backend: cfg!(feature = "webrtc"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the webrtc-rs transport is compiled in
    pub webrtc_backend: bool,
}
