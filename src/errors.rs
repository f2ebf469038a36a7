use thiserror::Error;

/// Errors raised by the streaming session core.
///
/// Protocol errors (`SessionProtocol`, `CandidateParse`) originate from the
/// remote peer and must be surfaced to the signaling layer by the caller.
/// `SampleProcessing` is internal to sample ingestion and is only ever logged.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Session protocol error: {0}")]
    SessionProtocol(String),
    #[error("ICE candidate parse error: {0}")]
    CandidateParse(String),
    #[error("Codec negotiation error: {0}")]
    CodecNegotiation(String),
    #[error("Sample processing error: {0}")]
    SampleProcessing(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("session has not been started")]
    NotStarted,
    #[error("session is already started")]
    AlreadyStarted,
}

impl StreamError {
    pub fn transport(error: impl std::fmt::Display) -> Self {
        StreamError::Transport(error.to_string())
    }

    /// True for errors caused by malformed input from the remote peer.
    pub fn is_peer_protocol_error(&self) -> bool {
        matches!(
            self,
            StreamError::SessionProtocol(_) | StreamError::CandidateParse(_)
        )
    }
}
