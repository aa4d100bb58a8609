//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! Secrets (OpenAI / ElevenLabs API keys) are deliberately kept out of the serializable
//! config structs; they are read straight from the environment via [`Credentials::from_env`]
//! so they never end up in a config dump or the `/api/v1/config` response.
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, backends, audio, performance)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backends: BackendConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// External backend configuration (completion, transcription, synthesis).
///
/// ## Fields:
/// - `openai_model`: Chat model used for reply generation and tool calling
/// - `transcription_model`: Speech-to-text model (Whisper family)
/// - `elevenlabs_model`: Text-to-speech model identifier
/// - `default_voice_id`: Voice used when a session has no voice override
/// - `request_timeout_secs`: Hard timeout applied to every backend call
/// - `max_retries`: Additional attempts after the first failure
/// - `retry_backoff_ms`: Base delay between attempts (doubled each retry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub openai_model: String,
    pub transcription_model: String,
    pub elevenlabs_model: String,
    pub default_voice_id: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

/// Audio pipeline tuning.
///
/// ## Fields:
/// - `max_window_seconds`: Rolling buffer cap; samples older than this are dropped
/// - `trailing_silence_secs`: Silence tail required before an utterance is finalized
/// - `interruption_speech_secs`: Cumulative speech needed to interrupt a spoken reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub max_window_seconds: u32,
    pub trailing_silence_secs: f32,
    pub interruption_speech_secs: f32,
}

/// Performance tuning configuration.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Maximum simultaneous WebSocket connections
/// - `cpu_worker_threads`: Size of the dedicated pool for CPU-bound tool work
/// - `history_limit`: Per-session conversation history cap (entries)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    pub cpu_worker_threads: usize,
    pub history_limit: usize,
}

/// API credentials read from the process environment.
///
/// Per-session overrides (sent over the wire in `configure` messages) take
/// precedence over these process-wide values at call time.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
}

impl Credentials {
    /// Read `OPENAI_API_KEY` / `ELEVENLABS_API_KEY` from the environment.
    /// Missing keys are tolerated here; a backend call fails with a clear
    /// error if no key is available from either the process or the session.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            elevenlabs_api_key: env::var("ELEVENLABS_API_KEY").ok(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8765,
            },
            backends: BackendConfig {
                openai_model: "gpt-4.1".to_string(),
                transcription_model: "whisper-1".to_string(),
                elevenlabs_model: "eleven_flash_v2_5".to_string(),
                default_voice_id: "1F0HEz1i7DetoXlB32Yy".to_string(),
                request_timeout_secs: 30,
                max_retries: 2,
                retry_backoff_ms: 500,
            },
            audio: AudioConfig {
                max_window_seconds: 15,
                trailing_silence_secs: 0.8,
                interruption_speech_secs: 2.0,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 32,
                cpu_worker_threads: 2,
                history_limit: 100,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_BACKENDS_OPENAI_MODEL=gpt-4.1-mini`: Override completion model
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.cpu_worker_threads == 0 {
            return Err(anyhow::anyhow!("CPU worker thread count must be greater than 0"));
        }

        if self.performance.history_limit == 0 {
            return Err(anyhow::anyhow!("History limit must be greater than 0"));
        }

        if self.audio.max_window_seconds == 0 {
            return Err(anyhow::anyhow!("Audio window must be at least 1 second"));
        }

        if self.audio.trailing_silence_secs <= 0.0 {
            return Err(anyhow::anyhow!("Trailing silence threshold must be positive"));
        }

        if self.audio.interruption_speech_secs <= 0.0 {
            return Err(anyhow::anyhow!("Interruption speech threshold must be positive"));
        }

        if self.backends.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Backend request timeout must be at least 1 second"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed. For example,
    /// `{"server": {"port": 9000}}` updates the port and nothing else.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(backends) = partial.get("backends") {
            if let Some(model) = backends.get("openai_model").and_then(|v| v.as_str()) {
                self.backends.openai_model = model.to_string();
            }
            if let Some(model) = backends.get("transcription_model").and_then(|v| v.as_str()) {
                self.backends.transcription_model = model.to_string();
            }
            if let Some(model) = backends.get("elevenlabs_model").and_then(|v| v.as_str()) {
                self.backends.elevenlabs_model = model.to_string();
            }
            if let Some(voice) = backends.get("default_voice_id").and_then(|v| v.as_str()) {
                self.backends.default_voice_id = voice.to_string();
            }
            if let Some(timeout) = backends.get("request_timeout_secs").and_then(|v| v.as_u64()) {
                self.backends.request_timeout_secs = timeout;
            }
            if let Some(retries) = backends.get("max_retries").and_then(|v| v.as_u64()) {
                self.backends.max_retries = retries as u32;
            }
            if let Some(backoff) = backends.get("retry_backoff_ms").and_then(|v| v.as_u64()) {
                self.backends.retry_backoff_ms = backoff;
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(window) = audio.get("max_window_seconds").and_then(|v| v.as_u64()) {
                self.audio.max_window_seconds = window as u32;
            }
            if let Some(silence) = audio.get("trailing_silence_secs").and_then(|v| v.as_f64()) {
                self.audio.trailing_silence_secs = silence as f32;
            }
            if let Some(speech) = audio.get("interruption_speech_secs").and_then(|v| v.as_f64()) {
                self.audio.interruption_speech_secs = speech as f32;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
            if let Some(threads) = performance.get("cpu_worker_threads").and_then(|v| v.as_u64()) {
                self.performance.cpu_worker_threads = threads as usize;
            }
            if let Some(limit) = performance.get("history_limit").and_then(|v| v.as_u64()) {
                self.performance.history_limit = limit as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.audio.max_window_seconds, 15);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.trailing_silence_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"backends": {"default_voice_id": "abc123"}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.backends.default_voice_id, "abc123");
        // Untouched fields keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.backends.openai_model, "gpt-4.1");
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let mut config = AppConfig::default();
        let json = r#"{"performance": {"max_concurrent_sessions": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
