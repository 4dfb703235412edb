//! Live API protocol types
//!
//! JSON message types for the bidirectional generate-content WebSocket used
//! by the voice widget.
//!
//! # Protocol Overview
//!
//! 1. Connect to the bidi endpoint with the API key
//! 2. Send `setup` with model, behavior config and system instruction
//! 3. Receive `setupComplete`
//! 4. Stream microphone audio via `realtimeInput` media chunks
//! 5. Receive `serverContent` messages carrying inline audio parts and/or an
//!    `interrupted` flag (barge-in)

use serde::{Deserialize, Serialize};

use super::codec::CAPTURE_MIME_TYPE;

/// Bidi generate-content WebSocket endpoint (API key appended as query param).
pub const LIVE_API_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Live model spoken to by the voice widget.
pub const LIVE_MODEL: &str = "models/gemini-2.5-flash-native-audio-preview-09-2025";

// ============================================================================
// Client Messages (sent TO the endpoint)
// ============================================================================

/// Messages sent from the widget to the live endpoint.
///
/// The wire format has no type tag; each message is identified by its single
/// top-level key, so the enum serializes untagged.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Session behavior configuration, sent once after connecting
    Setup {
        setup: SetupConfig,
    },
    /// A chunk of live microphone audio
    RealtimeInput {
        #[serde(rename = "realtimeInput")]
        realtime_input: RealtimeInput,
    },
}

/// Session-wide behavior configuration. Fixed at setup time; changing the
/// screen mid-session does not update it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupConfig {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// One base64 audio chunk tagged with its wire MIME descriptor.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Build the setup message for a session.
    pub fn setup(voice_name: &str, system_instruction: &str) -> Self {
        Self::Setup {
            setup: SetupConfig {
                model: LIVE_MODEL.to_string(),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice_name.to_string(),
                            },
                        },
                    }),
                },
                system_instruction: Some(Content {
                    parts: vec![TextPart {
                        text: system_instruction.to_string(),
                    }],
                }),
            },
        }
    }

    /// Wrap an already-encoded audio payload as a realtime input chunk.
    pub fn realtime_audio(encoded: String) -> Self {
        Self::RealtimeInput {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: CAPTURE_MIME_TYPE.to_string(),
                    data: encoded,
                }],
            },
        }
    }
}

// ============================================================================
// Server Messages (received FROM the endpoint)
// ============================================================================

/// A message from the live endpoint.
///
/// The wire uses one optional top-level field per message kind; messages with
/// none of the known fields set are tolerated and ignored by callers.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    /// Set when the user barged in over the assistant; all queued playback
    /// must be cut immediately.
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPart {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl ServerMessage {
    /// True once the endpoint has accepted the setup config.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// True if this message signals a barge-in interruption.
    pub fn is_interrupted(&self) -> bool {
        self.server_content
            .as_ref()
            .map(|c| c.interrupted)
            .unwrap_or(false)
    }

    /// Base64 audio payloads carried by this message, in part order.
    pub fn audio_payloads(&self) -> Vec<&str> {
        let Some(content) = &self.server_content else {
            return Vec::new();
        };
        let Some(turn) = &content.model_turn else {
            return Vec::new();
        };
        turn.parts
            .iter()
            .filter_map(|p| p.inline_data.as_ref())
            .filter(|d| d.mime_type.starts_with("audio/pcm"))
            .map(|d| d.data.as_str())
            .collect()
    }
}
