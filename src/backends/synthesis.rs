//! # Speech Synthesis Backend
//!
//! Turns final reply text into MP3 audio. The ElevenLabs implementation
//! requests `mp3_22050_32` output with fixed voice settings tuned for the
//! assistant's delivery; only the voice id varies per session.

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::resolve_key;

/// Converts reply text to playable audio bytes.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize `text` with the given voice. Returns encoded MP3 bytes.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        api_key_override: Option<&str>,
    ) -> Result<Vec<u8>, AppError>;
}

/// ElevenLabs text-to-speech client.
pub struct ElevenLabsSynthesis {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl ElevenLabsSynthesis {
    pub fn new(client: reqwest::Client, model: String, api_key: Option<String>) -> Self {
        Self {
            client,
            model,
            api_key,
            base_url: "https://api.elevenlabs.io/v1".to_string(),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ElevenLabsSynthesis {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        api_key_override: Option<&str>,
    ) -> Result<Vec<u8>, AppError> {
        let key = resolve_key(api_key_override, self.api_key.as_deref(), "ElevenLabs")?;

        let body = json!({
            "text": text,
            "model_id": self.model,
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.8,
                "style": 0.1,
                "use_speaker_boost": true,
                "speed": 1.1
            }
        });

        debug!(voice_id = voice_id, chars = text.len(), "synthesizing reply audio");

        let response = self
            .client
            .post(format!(
                "{}/text-to-speech/{}?output_format=mp3_22050_32",
                self.base_url, voice_id
            ))
            .header("xi-api-key", key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Synthesis(format!("synthesis request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Synthesis(format!(
                "synthesis backend returned {}: {}",
                status, body
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| AppError::Synthesis(format!("failed to read audio body: {}", e)))?;

        if audio.is_empty() {
            return Err(AppError::Synthesis("synthesis returned no audio".to_string()));
        }

        Ok(audio.to_vec())
    }
}
