//! Error types for the Lingya voice client

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the realtime voice client.
///
/// Capture-permission, transport and peer errors are session-fatal and drive a
/// full teardown. Malformed messages and rejected role switches are absorbed by
/// the component that sees them.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Capture permission denied: {0}")]
    CapturePermission(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connect timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("Transport is not open")]
    TransportClosed,

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Peer reported error: {0}")]
    PeerError(String),

    #[error("Role switch to {role_id} failed: {message}")]
    RoleSwitch { role_id: String, message: String },

    #[error("Operation not allowed in phase {0}")]
    InvalidPhase(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    /// True for errors that must tear the session down: capture permission,
    /// transport failure, a protocol violation, or a peer-reported error.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::CapturePermission(_)
                | VoiceError::Transport(_)
                | VoiceError::ConnectTimeout(_)
                | VoiceError::TransportClosed
                | VoiceError::Protocol(_)
                | VoiceError::PeerError(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for VoiceError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        VoiceError::Transport(err.to_string())
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(err: reqwest::Error) -> Self {
        VoiceError::Tts(err.to_string())
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::MalformedMessage(format!("base64: {}", err))
    }
}
