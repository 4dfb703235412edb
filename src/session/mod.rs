//! Live voice session module
//!
//! WebSocket-based bidirectional streaming to the hosted conversational
//! endpoint: microphone audio up, assistant audio and interruption flags
//! down.
//!
//! # Architecture
//!
//! ```text
//! Capture frames (16kHz f32) ──▶ codec::encode_frame ──▶ LiveSession
//!                                                           (WebSocket)
//!                                                              │
//!                     PlaybackScheduler ◀── codec::decode ◀────┘
//! ```
//!
//! A session is opened with a behavior configuration built once from the
//! current screen context; failures at any point surface as a
//! [`SessionError`] and the session returns to idle. There is no automatic
//! retry or reconnect.

pub mod codec;
mod live_client;
mod protocol;

pub use codec::{CodecError, CAPTURE_MIME_TYPE, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
pub use live_client::{LiveEvent, LiveEventReceiver, LiveSession};
pub use protocol::{ClientMessage, ServerMessage, LIVE_MODEL};

/// Errors that can occur while opening or streaming a live session.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// API key not configured
    MissingApiKey,
    /// Failed to establish the WebSocket connection
    ConnectFailed(String),
    /// The endpoint rejected the setup configuration
    SetupRejected(String),
    /// WebSocket protocol error
    ProtocolError(String),
    /// Connection was closed unexpectedly
    Disconnected(String),
    /// Failed to send an audio chunk
    SendFailed(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::MissingApiKey => {
                write!(
                    f,
                    "API key not configured. Set the GEMINI_API_KEY environment variable."
                )
            }
            SessionError::ConnectFailed(e) => {
                write!(f, "Failed to connect to the live endpoint: {}", e)
            }
            SessionError::SetupRejected(e) => {
                write!(f, "Live endpoint rejected session setup: {}", e)
            }
            SessionError::ProtocolError(e) => write!(f, "WebSocket protocol error: {}", e),
            SessionError::Disconnected(e) => write!(f, "WebSocket disconnected: {}", e),
            SessionError::SendFailed(e) => write!(f, "Failed to send audio: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        let err = SessionError::MissingApiKey;
        assert!(err.to_string().contains("GEMINI_API_KEY"));

        let err = SessionError::ConnectFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = SessionError::SetupRejected("bad model".to_string());
        assert!(err.to_string().contains("bad model"));
    }
}
