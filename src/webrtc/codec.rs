//! Pinning of the outgoing video codec.

use crate::errors::StreamError;
use crate::webrtc::packet::MediaKind;
use crate::webrtc::peer::{PeerConnection, RtpSender};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Codec descriptor as exposed by a sender's capability list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
    pub payload_type: u8,
}

impl CodecCapability {
    pub fn new(mime_type: impl Into<String>, clock_rate: u32, payload_type: u8) -> Self {
        Self {
            mime_type: mime_type.into(),
            clock_rate,
            channels: 0,
            sdp_fmtp_line: String::new(),
            payload_type,
        }
    }

    pub fn with_fmtp(mut self, fmtp: impl Into<String>) -> Self {
        self.sdp_fmtp_line = fmtp.into();
        self
    }
}

/// Primary codec and its retransmission companion, bound to one sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecPreference {
    pub primary: CodecCapability,
    pub rtx: CodecCapability,
}

impl CodecPreference {
    /// Select `mime_type` (exact match) and the `<kind>/rtx` codec
    /// (case-insensitive) from `capabilities`. First match wins for both.
    pub fn select(
        capabilities: &[CodecCapability],
        kind: MediaKind,
        mime_type: &str,
    ) -> Result<Self, StreamError> {
        let primary = capabilities
            .iter()
            .find(|codec| codec.mime_type == mime_type)
            .cloned()
            .ok_or_else(|| {
                StreamError::CodecNegotiation(format!(
                    "codec {} not found in capabilities",
                    mime_type
                ))
            })?;

        let rtx_mime = kind.rtx_mime_type();
        let rtx = capabilities
            .iter()
            .find(|codec| codec.mime_type.eq_ignore_ascii_case(&rtx_mime))
            .cloned()
            .ok_or_else(|| {
                StreamError::CodecNegotiation(format!("RTX codec for {} not found", mime_type))
            })?;

        Ok(Self { primary, rtx })
    }

    /// Preference list in the order handed to the transceiver
    pub fn to_list(&self) -> Vec<CodecCapability> {
        vec![self.primary.clone(), self.rtx.clone()]
    }
}

/// Restrict the transceiver owning `sender` to `[mime_type, <kind>/rtx]`.
///
/// One-time pin at session start; never renegotiated.
pub async fn force_codec(
    connection: &dyn PeerConnection,
    sender: &Arc<dyn RtpSender>,
    mime_type: &str,
) -> Result<CodecPreference, StreamError> {
    let capabilities = sender.codec_capabilities().await;
    let preference = CodecPreference::select(&capabilities, sender.kind(), mime_type)?;

    let mut owner = None;
    for transceiver in connection.transceivers().await {
        if transceiver.sender_id().await.as_deref() == Some(sender.id()) {
            owner = Some(transceiver);
            break;
        }
    }
    let transceiver = owner.ok_or_else(|| {
        StreamError::CodecNegotiation(format!("no transceiver owns sender {}", sender.id()))
    })?;

    log::info!(
        "Forcing codec preferences to: [{}, {}]",
        preference.primary.mime_type,
        preference.rtx.mime_type
    );
    transceiver.set_codec_preferences(preference.to_list()).await?;

    Ok(preference)
}
