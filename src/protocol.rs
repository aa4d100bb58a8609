//! # WebSocket Wire Protocol
//!
//! JSON message types exchanged with clients over the `/ws` endpoint, tagged
//! by a `"type"` field on both directions. Field names follow the client
//! convention (camelCase) where the two differ.
//!
//! ## Compatibility rules:
//! - Unrecognized inbound `type` values deserialize to [`ClientMessage::Unknown`]
//!   and are silently dropped, so older servers tolerate newer clients.
//! - Session settings may ride along on *any* inbound message, not just
//!   `configure`; absent fields never clobber previously-set values.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Settings fields a client may supply on any inbound message. `None` means
/// "leave the current value alone".
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SettingsPatch {
    #[serde(rename = "voiceId")]
    pub voice_id: Option<String>,

    #[serde(rename = "customInstructions")]
    pub custom_instructions: Option<String>,

    #[serde(rename = "openaiApiKey")]
    pub openai_api_key: Option<String>,

    #[serde(rename = "elevenlabsApiKey")]
    pub elevenlabs_api_key: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.voice_id.is_none()
            && self.custom_instructions.is_none()
            && self.openai_api_key.is_none()
            && self.elevenlabs_api_key.is_none()
    }
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Update session settings without triggering any processing
    Configure {
        #[serde(flatten)]
        settings: SettingsPatch,
    },

    /// One chunk of base64-encoded little-endian float32 PCM
    AudioStream {
        data: String,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        #[serde(flatten)]
        settings: SettingsPatch,
    },

    /// A typed text message; processed as a full turn, skipping transcription
    Message {
        text: String,
        #[serde(flatten)]
        settings: SettingsPatch,
    },

    /// Any type tag this server does not understand
    #[serde(other)]
    Unknown,
}

/// Events the server pushes to a client.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Progress note for UI display ("Transcribing...", "Thinking...")
    Status { message: String },

    /// What the user was heard to say
    Transcription { text: String },

    /// The assistant's final reply text
    Response { text: String },

    /// Playable reply audio as a data URL
    AudioReady {
        #[serde(rename = "audioUrl")]
        audio_url: String,
    },

    /// Stop any in-progress playback immediately (user interrupted)
    CancelAudio,

    /// Something went wrong with the last request
    Error { message: String },
}

impl ServerEvent {
    pub fn status(message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wrap synthesized MP3 bytes as a self-contained data URL the client
    /// can hand straight to an audio element.
    pub fn audio_ready(mp3_bytes: &[u8]) -> Self {
        Self::AudioReady {
            audio_url: format!("data:audio/mp3;base64,{}", BASE64.encode(mp3_bytes)),
        }
    }
}

/// Delivery seam between turn processing and the WebSocket connection.
///
/// The production sink forwards to the connection actor's mailbox; tests use
/// a recording sink to assert on emitted events.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ServerEvent);
}
