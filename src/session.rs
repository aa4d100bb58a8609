//! # Session Management
//!
//! Per-connection state and the registry that tracks every live WebSocket
//! session. A session owns everything that must not leak between users: the
//! audio buffer, conversation history, settings, the speaking flag, and the
//! turn lock.
//!
//! ## Concurrency model:
//! A [`Session`] is shared between the connection actor and the tasks it
//! spawns, so all interior state is behind its own lock. The turn lock is an
//! async mutex held for a whole turn; it is what guarantees a session never
//! runs two turns at once, while leaving other sessions unaffected.

use crate::audio::buffer::AudioBuffer;
use crate::error::AppError;
use crate::history::ConversationHistory;
use crate::protocol::SettingsPatch;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

/// Effective per-session settings, built from server defaults and updated by
/// client-supplied patches.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub voice_id: String,
    pub custom_instructions: Option<String>,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
}

impl SessionSettings {
    pub fn with_default_voice(default_voice_id: &str) -> Self {
        Self {
            voice_id: default_voice_id.to_string(),
            custom_instructions: None,
            openai_api_key: None,
            elevenlabs_api_key: None,
        }
    }

    /// Apply a patch. Absent fields leave the current value untouched, so a
    /// client sending only a voice change can't wipe its earlier settings.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(voice_id) = &patch.voice_id {
            self.voice_id = voice_id.clone();
        }
        if let Some(instructions) = &patch.custom_instructions {
            self.custom_instructions = Some(instructions.clone());
        }
        if let Some(key) = &patch.openai_api_key {
            self.openai_api_key = Some(key.clone());
        }
        if let Some(key) = &patch.elevenlabs_api_key {
            self.elevenlabs_api_key = Some(key.clone());
        }
    }
}

/// State for one live WebSocket connection.
pub struct Session {
    pub id: Uuid,

    /// Audio buffer, created lazily when the first chunk declares its
    /// sample rate. The rate is then pinned for the connection's lifetime.
    buffer: Mutex<Option<Arc<AudioBuffer>>>,

    /// True while reply audio is (presumed) playing on the client
    speaking: AtomicBool,

    /// Guards against overlapping segmentation passes for this session
    evaluating: AtomicBool,

    /// Held for the duration of a turn; serializes turns within the session
    pub turn_lock: tokio::sync::Mutex<()>,

    pub history: Mutex<ConversationHistory>,

    pub settings: Mutex<SessionSettings>,

    /// Window length used when a buffer is created
    max_window_seconds: u32,
}

impl Session {
    fn new(default_voice_id: &str, history_limit: usize, max_window_seconds: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            buffer: Mutex::new(None),
            speaking: AtomicBool::new(false),
            evaluating: AtomicBool::new(false),
            turn_lock: tokio::sync::Mutex::new(()),
            history: Mutex::new(ConversationHistory::new(history_limit)),
            settings: Mutex::new(SessionSettings::with_default_voice(default_voice_id)),
            max_window_seconds,
        }
    }

    /// Buffer for this connection, created on first use. Returns an error if
    /// a later chunk declares a different rate than the one pinned.
    pub fn buffer_for_rate(&self, sample_rate: u32) -> Result<Arc<AudioBuffer>, AppError> {
        let mut slot = self.buffer.lock().unwrap();
        match slot.as_ref() {
            Some(buffer) if buffer.sample_rate() == sample_rate => Ok(Arc::clone(buffer)),
            Some(buffer) => Err(AppError::BadRequest(format!(
                "sample rate is pinned at {} Hz for this connection, got {} Hz",
                buffer.sample_rate(),
                sample_rate
            ))),
            None => {
                info!(session_id = %self.id, sample_rate = sample_rate, "pinning session sample rate");
                let buffer = Arc::new(AudioBuffer::new(sample_rate, self.max_window_seconds));
                *slot = Some(Arc::clone(&buffer));
                Ok(buffer)
            }
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    /// Claim the evaluation slot. At most one segmentation pass runs per
    /// session; when a pass is already running the new chunk is buffered and
    /// the next chunk re-triggers evaluation.
    pub fn begin_evaluation(&self) -> bool {
        self.evaluating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn end_evaluation(&self) {
        self.evaluating.store(false, Ordering::SeqCst);
    }

    pub fn apply_settings(&self, patch: &SettingsPatch) {
        if !patch.is_empty() {
            self.settings.lock().unwrap().apply(patch);
        }
    }

    pub fn settings_snapshot(&self) -> SessionSettings {
        self.settings.lock().unwrap().clone()
    }
}

/// Registry of live sessions, shared through application state.
pub struct ConnectionManager {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    max_sessions: usize,
    default_voice_id: String,
    history_limit: usize,
    max_window_seconds: u32,
}

impl ConnectionManager {
    pub fn new(
        max_sessions: usize,
        default_voice_id: String,
        history_limit: usize,
        max_window_seconds: u32,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            default_voice_id,
            history_limit,
            max_window_seconds,
        }
    }

    /// Register a new session, enforcing the concurrent-session cap.
    pub fn create_session(&self) -> Result<Arc<Session>, AppError> {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.len() >= self.max_sessions {
            warn!(
                active = sessions.len(),
                max = self.max_sessions,
                "rejecting connection, session capacity reached"
            );
            return Err(AppError::Internal(format!(
                "session capacity reached ({} active)",
                self.max_sessions
            )));
        }

        let session = Arc::new(Session::new(
            &self.default_voice_id,
            self.history_limit,
            self.max_window_seconds,
        ));
        sessions.insert(session.id, Arc::clone(&session));
        info!(session_id = %session.id, active = sessions.len(), "session created");
        Ok(session)
    }

    pub fn remove_session(&self, id: &Uuid) {
        let mut sessions = self.sessions.write().unwrap();
        if sessions.remove(id).is_some() {
            info!(session_id = %id, active = sessions.len(), "session removed");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}
