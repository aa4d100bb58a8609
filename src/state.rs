//! # Application State Management
//!
//! Shared state handed to every HTTP handler and WebSocket connection. The
//! mutable pieces (runtime-updatable config, request metrics) live behind
//! `Arc<RwLock<T>>` so many requests can read concurrently while updates
//! stay exclusive; the heavyweight collaborators (backends, segmenter,
//! session registry) are built once at startup and shared as `Arc`s.

use crate::audio::segmenter::SpeechSegmenter;
use crate::audio::vad::EarshotDetector;
use crate::backends::{
    ElevenLabsSynthesis, OpenAiCompletion, OpenAiTranscription, RetryPolicy,
};
use crate::config::{AppConfig, Credentials};
use crate::session::ConnectionManager;
use crate::tools::ToolRegistry;
use crate::turn::TurnOrchestrator;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration; updatable through the config endpoint
    pub config: Arc<RwLock<AppConfig>>,

    /// Request counters, updated by middleware on every request
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// Registry of live WebSocket sessions
    pub connections: Arc<ConnectionManager>,

    /// Segmentation over inbound audio, shared by all sessions
    pub segmenter: Arc<SpeechSegmenter>,

    /// Turn pipeline against the real backends
    pub orchestrator: Arc<TurnOrchestrator>,
}

/// Counters collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request statistics.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up the full application: backend clients from the config and
    /// environment credentials, the VAD segmenter, the tool registry, and
    /// the session registry.
    pub fn new(config: AppConfig, credentials: Credentials) -> Self {
        let http = reqwest::Client::new();
        let retry = RetryPolicy::from_config(&config.backends);

        let transcription = Arc::new(OpenAiTranscription::new(
            http.clone(),
            config.backends.transcription_model.clone(),
            credentials.openai_api_key.clone(),
        ));
        let completion = Arc::new(OpenAiCompletion::new(
            http.clone(),
            config.backends.openai_model.clone(),
            credentials.openai_api_key.clone(),
        ));
        let synthesis = Arc::new(ElevenLabsSynthesis::new(
            http,
            config.backends.elevenlabs_model.clone(),
            credentials.elevenlabs_api_key,
        ));

        let tools = Arc::new(ToolRegistry::with_builtins(
            config.performance.cpu_worker_threads,
        ));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            transcription,
            completion,
            synthesis,
            tools,
            retry,
        ));

        let segmenter = Arc::new(SpeechSegmenter::new(
            Arc::new(EarshotDetector::new()),
            config.audio.trailing_silence_secs,
            config.audio.interruption_speech_secs,
        ));

        let connections = Arc::new(ConnectionManager::new(
            config.performance.max_concurrent_sessions,
            config.backends.default_voice_id.clone(),
            config.performance.history_limit,
            config.audio.max_window_seconds,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            connections,
            segmenter,
            orchestrator,
        }
    }

    /// Copy of the current configuration. Cloning releases the read lock
    /// immediately so writers are never blocked behind a handler.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Replace the configuration after validating it, so the stored config
    /// is always valid.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Record one request against its endpoint's counters.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Consistent copy of the metrics, taken under the read lock so nothing
    /// shifts while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.connections.active_count()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
