//! Live endpoint WebSocket client
//!
//! Manages the WebSocket connection lifecycle for one voice session.
//!
//! # Connection Flow
//!
//! 1. `connect()` - Establish WebSocket, send `setup`, wait for `setupComplete`
//! 2. `send_realtime_input()` - Stream encoded audio chunks (non-blocking)
//! 3. Events arrive on the receiver taken via `take_events()`
//! 4. `close()` - Clean shutdown
//!
//! Connect failures surface immediately; there are no retries and no
//! mid-session reconnects — a dropped session is torn down and the user
//! starts a new one.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config, tungstenite::client::IntoClientRequest, tungstenite::Message,
    MaybeTlsStream, WebSocketStream,
};

use super::protocol::{ClientMessage, ServerMessage, LIVE_API_URL};
use super::SessionError;

/// Timeout for the initial WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the setup/setupComplete exchange
const SETUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Event channel capacity; inbound messages are processed one at a time
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// An event from the live connection, delivered in arrival order.
#[derive(Debug)]
pub enum LiveEvent {
    /// A parsed server message (audio parts, interruption flag, ...)
    Message(ServerMessage),
    /// The connection failed mid-session
    Error(SessionError),
    /// The endpoint closed the connection
    Closed,
}

/// Receiver for live connection events.
pub type LiveEventReceiver = mpsc::Receiver<LiveEvent>;

/// Handle to an open live session.
///
/// Owns the WebSocket write half; the read half is drained by a background
/// task that forwards events through the channel returned by `take_events()`.
pub struct LiveSession {
    write: futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>,
    /// Wrapped in Option so it can be taken for concurrent processing
    events_rx: Option<LiveEventReceiver>,
    receiver_task: tokio::task::JoinHandle<()>,
}

impl LiveSession {
    /// Connect to the live endpoint and complete the setup handshake.
    ///
    /// The behavior configuration (voice, persona and screen-context hint)
    /// is fixed here for the lifetime of the session.
    pub async fn connect(
        api_key: &str,
        voice_name: &str,
        system_instruction: &str,
    ) -> Result<Self, SessionError> {
        if api_key.is_empty() {
            return Err(SessionError::MissingApiKey);
        }

        let url = format!("{}?key={}", LIVE_API_URL, api_key);
        let request = url
            .into_client_request()
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        log::info!("Connecting to live endpoint...");

        let (ws_stream, _response) = timeout(
            CONNECTION_TIMEOUT,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| SessionError::ConnectFailed("Connection timeout".to_string()))?
        .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        // Send setup and wait for the endpoint to accept it
        let setup = ClientMessage::setup(voice_name, system_instruction);
        let json = serde_json::to_string(&setup)
            .map_err(|e| SessionError::ProtocolError(e.to_string()))?;
        write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::ConnectFailed(e.to_string()))?;

        timeout(SETUP_TIMEOUT, async {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) if msg.is_setup_complete() => {
                            log::info!("Live session setup complete");
                            return Ok(());
                        }
                        Ok(_) => {
                            log::debug!("Ignoring message while waiting for setupComplete");
                        }
                        Err(e) => {
                            log::warn!("Failed to parse message during setup: {}", e);
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        // The endpoint reports a rejected setup (bad key, bad
                        // model) by closing with a reason
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "connection closed".to_string());
                        return Err(SessionError::SetupRejected(reason));
                    }
                    Err(e) => {
                        return Err(SessionError::ProtocolError(e.to_string()));
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            Err(SessionError::Disconnected("Stream ended".to_string()))
        })
        .await
        .map_err(|_| SessionError::ConnectFailed("Setup timeout".to_string()))??;

        // Background task drains the read half for the rest of the session
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let receiver_task = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if events_tx.send(LiveEvent::Message(msg)).await.is_err() {
                                log::debug!("Live event channel closed");
                                return;
                            }
                        }
                        Err(e) => {
                            log::warn!("Failed to parse server message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        log::info!("Live session closed by endpoint");
                        let _ = events_tx.send(LiveEvent::Closed).await;
                        return;
                    }
                    Err(e) => {
                        log::warn!("Live session error: {}", e);
                        let _ = events_tx
                            .send(LiveEvent::Error(SessionError::Disconnected(e.to_string())))
                            .await;
                        return;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }
            log::debug!("Live receiver task exiting");
        });

        Ok(Self {
            write,
            events_rx: Some(events_rx),
            receiver_task,
        })
    }

    /// Send one already-encoded audio chunk.
    ///
    /// Each call transmits one network message; no batching across frames.
    pub async fn send_realtime_input(&mut self, encoded: String) -> Result<(), SessionError> {
        let msg = ClientMessage::realtime_audio(encoded);
        let json =
            serde_json::to_string(&msg).map_err(|e| SessionError::ProtocolError(e.to_string()))?;

        self.write
            .send(Message::Text(json))
            .await
            .map_err(|e| SessionError::SendFailed(e.to_string()))
    }

    /// Take ownership of the event receiver for concurrent processing.
    ///
    /// Returns `None` if already taken.
    pub fn take_events(&mut self) -> Option<LiveEventReceiver> {
        self.events_rx.take()
    }

    /// Gracefully close the session.
    pub async fn close(mut self) {
        log::info!("Closing live session");
        self.receiver_task.abort();
        if let Err(e) = self.write.close().await {
            log::warn!("Error closing WebSocket: {}", e);
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        // Ensure the receiver task dies if the session is dropped without close()
        self.receiver_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_empty_api_key() {
        let result = LiveSession::connect("", "Zephyr", "oi").await;
        assert!(matches!(result, Err(SessionError::MissingApiKey)));
    }

    #[tokio::test]
    #[ignore] // Requires a valid API key and network access
    async fn test_live_connect_and_close() {
        let api_key = std::env::var("GEMINI_API_KEY").expect("GEMINI_API_KEY required");

        let session = LiveSession::connect(&api_key, "Zephyr", "Você é um assistente de teste.")
            .await
            .expect("connect failed");
        session.close().await;
    }
}
