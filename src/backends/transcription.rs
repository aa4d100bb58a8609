//! # Speech Transcription Backend
//!
//! Turns a finalized utterance (float32 mono samples) into text. The OpenAI
//! implementation uploads the audio as a 16-bit PCM WAV via multipart form,
//! which is the container Whisper accepts without an extra decode step.

use crate::error::AppError;
use async_trait::async_trait;
use std::io::Cursor;
use tracing::debug;

use super::resolve_key;

/// Converts recorded speech to text.
#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    /// Transcribe mono float32 samples at the given rate. Returns the raw
    /// transcript; an empty or whitespace-only result means no usable speech.
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        api_key_override: Option<&str>,
    ) -> Result<String, AppError>;
}

/// Encode float32 samples as a mono 16-bit PCM WAV file in memory.
///
/// Samples are clamped to [-1.0, 1.0] before scaling so out-of-range input
/// can't wrap around to the opposite sign.
pub fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, AppError> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();

    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut cursor)
        .map_err(|e| AppError::Transcription(format!("WAV encoding failed: {}", e)))?;

    Ok(cursor.into_inner())
}

/// OpenAI audio transcription client (Whisper).
pub struct OpenAiTranscription {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiTranscription {
    pub fn new(client: reqwest::Client, model: String, api_key: Option<String>) -> Self {
        Self {
            client,
            model,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }
}

#[async_trait]
impl TranscriptionBackend for OpenAiTranscription {
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        api_key_override: Option<&str>,
    ) -> Result<String, AppError> {
        let key = resolve_key(api_key_override, self.api_key.as_deref(), "OpenAI")?;
        let wav_bytes = encode_wav_pcm16(samples, sample_rate)?;

        debug!(
            bytes = wav_bytes.len(),
            secs = samples.len() as f32 / sample_rate as f32,
            "uploading utterance for transcription"
        );

        let file_part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| AppError::Transcription(format!("invalid mime type: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "text");

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::Transcription(format!("transcription request failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::Transcription(format!(
                "transcription backend returned {}: {}",
                status, body
            )));
        }

        Ok(body.trim().to_string())
    }
}
