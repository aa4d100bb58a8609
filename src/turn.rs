//! # Turn Orchestration
//!
//! Drives one complete conversational turn: user input (finalized speech or
//! typed text) through transcription, completion with at most one round of
//! tool calls, and speech synthesis, emitting progress and result events to
//! the client along the way.
//!
//! ## Exclusivity:
//! The session's turn lock is taken before any work starts. A turn that
//! arrives while another is running waits its turn; turns in *different*
//! sessions run freely in parallel.
//!
//! ## Failure boundary:
//! Any backend failure inside a turn is caught here: the client gets one
//! generic error event, the full cause goes to the log, and the speaking
//! flag is left false so the next utterance is processed normally.

use crate::backends::{
    call_with_retry, CompletionBackend, RetryPolicy, SynthesisBackend, TranscriptionBackend,
};
use crate::error::AppError;
use crate::history::{HistoryEntry, COMPLETION_WINDOW};
use crate::persona;
use crate::protocol::{EventSink, ServerEvent};
use crate::session::Session;
use crate::tools::ToolRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What kicked off the turn.
pub enum TurnInput {
    /// A finalized utterance from the audio pipeline
    Audio { samples: Vec<f32>, sample_rate: u32 },

    /// Text typed directly by the client; skips transcription
    Text(String),
}

/// Runs turns against the configured backends. One instance is shared by
/// every session.
pub struct TurnOrchestrator {
    transcription: Arc<dyn TranscriptionBackend>,
    completion: Arc<dyn CompletionBackend>,
    synthesis: Arc<dyn SynthesisBackend>,
    tools: Arc<ToolRegistry>,
    retry: RetryPolicy,
}

impl TurnOrchestrator {
    pub fn new(
        transcription: Arc<dyn TranscriptionBackend>,
        completion: Arc<dyn CompletionBackend>,
        synthesis: Arc<dyn SynthesisBackend>,
        tools: Arc<ToolRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            transcription,
            completion,
            synthesis,
            tools,
            retry,
        }
    }

    /// Run one turn under the session's turn lock. Never returns an error;
    /// failures are reported to the client and logged here, except for
    /// transcription failures, which skip the turn silently.
    pub async fn run_turn(&self, session: &Session, input: TurnInput, sink: &dyn EventSink) {
        let _turn = session.turn_lock.lock().await;

        if let Err(e) = self.process(session, input, sink).await {
            match e {
                // A failed transcription ends the turn the same way an empty
                // transcript does: logged, nothing sent to the client.
                AppError::Transcription(_) => {
                    warn!(session_id = %session.id, error = %e, "transcription failed, skipping turn");
                }
                _ => {
                    error!(session_id = %session.id, error = %e, "turn failed");
                    sink.send(ServerEvent::error(
                        "Something went wrong processing that request",
                    ));
                    session.set_speaking(false);
                }
            }
        }
    }

    async fn process(
        &self,
        session: &Session,
        input: TurnInput,
        sink: &dyn EventSink,
    ) -> Result<(), AppError> {
        let settings = session.settings_snapshot();
        let openai_key = settings.openai_api_key.as_deref();

        let user_text = match input {
            TurnInput::Text(text) => text,
            TurnInput::Audio {
                samples,
                sample_rate,
            } => {
                sink.send(ServerEvent::status("Transcribing..."));
                let text = call_with_retry(
                    "transcription",
                    &self.retry,
                    AppError::Transcription,
                    || self.transcription.transcribe(&samples, sample_rate, openai_key),
                )
                .await?;

                if text.trim().is_empty() {
                    // Breathing or background noise made it past the
                    // detector; drop the turn without bothering the client.
                    debug!(session_id = %session.id, "empty transcript, skipping turn");
                    return Ok(());
                }

                sink.send(ServerEvent::Transcription { text: text.clone() });
                text
            }
        };

        info!(session_id = %session.id, chars = user_text.len(), "running turn");
        sink.send(ServerEvent::status("Thinking..."));

        let system = persona::system_prompt(settings.custom_instructions.as_deref());
        let window = {
            let mut history = session.history.lock().unwrap();
            history.push_user(user_text);
            history.window(COMPLETION_WINDOW)
        };

        let schemas = self.tools.schemas();
        let first = call_with_retry("completion", &self.retry, AppError::Completion, || {
            self.completion
                .complete(&system, &window, &schemas, openai_key)
        })
        .await?;

        let reply = if first.tool_calls.is_empty() {
            first.text
        } else {
            // Exactly one round of tool calls: record each call and its
            // result (keyed by call id), then ask for a final reply with no
            // tools on offer so the model cannot request another round.
            for call in &first.tool_calls {
                {
                    let mut history = session.history.lock().unwrap();
                    history.push(HistoryEntry::ToolCall {
                        call_id: call.call_id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    });
                }

                let output = self.tools.execute(call).await;
                debug!(session_id = %session.id, tool = %call.name, "tool call completed");

                let mut history = session.history.lock().unwrap();
                history.push(HistoryEntry::ToolResult {
                    call_id: call.call_id.clone(),
                    output,
                });
            }

            let window = session.history.lock().unwrap().window(COMPLETION_WINDOW);
            let second = call_with_retry("completion", &self.retry, AppError::Completion, || {
                self.completion.complete(&system, &window, &[], openai_key)
            })
            .await?;
            second.text
        };

        session.history.lock().unwrap().push_assistant(reply.clone());
        sink.send(ServerEvent::Response { text: reply.clone() });

        if reply.trim().is_empty() {
            debug!(session_id = %session.id, "empty reply, nothing to synthesize");
            return Ok(());
        }

        sink.send(ServerEvent::status("Generating audio..."));
        let elevenlabs_key = settings.elevenlabs_api_key.as_deref();
        let audio = call_with_retry("synthesis", &self.retry, AppError::Synthesis, || {
            self.synthesis
                .synthesize(&reply, &settings.voice_id, elevenlabs_key)
        })
        .await?;

        sink.send(ServerEvent::audio_ready(&audio));
        // From here on, inbound speech can interrupt playback
        session.set_speaking(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{CompletionResponse, ToolCallRequest};
    use crate::protocol::SettingsPatch;
    use crate::session::ConnectionManager;
    use crate::tools::{ExecutionAffinity, Tool};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSink {
        events: Mutex<Vec<ServerEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
            }
        }

        fn events(&self) -> Vec<ServerEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, event: ServerEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    struct StubTranscription {
        transcript: String,
    }

    #[async_trait]
    impl TranscriptionBackend for StubTranscription {
        async fn transcribe(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _api_key_override: Option<&str>,
        ) -> Result<String, AppError> {
            Ok(self.transcript.clone())
        }
    }

    struct FailingTranscription;

    #[async_trait]
    impl TranscriptionBackend for FailingTranscription {
        async fn transcribe(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _api_key_override: Option<&str>,
        ) -> Result<String, AppError> {
            Err(AppError::Transcription("backend down".into()))
        }
    }

    struct StubCompletion {
        responses: Mutex<Vec<CompletionResponse>>,
        requests: Mutex<Vec<Vec<HistoryEntry>>>,
    }

    impl StubCompletion {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, n: usize) -> Vec<HistoryEntry> {
            self.requests.lock().unwrap()[n].clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for StubCompletion {
        async fn complete(
            &self,
            _system_prompt: &str,
            messages: &[HistoryEntry],
            _tool_schemas: &[Value],
            _api_key_override: Option<&str>,
        ) -> Result<CompletionResponse, AppError> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(CompletionResponse::default())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    struct StubSynthesis {
        fail: bool,
        voices_seen: Mutex<Vec<String>>,
    }

    impl StubSynthesis {
        fn ok() -> Self {
            Self {
                fail: false,
                voices_seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                voices_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SynthesisBackend for StubSynthesis {
        async fn synthesize(
            &self,
            _text: &str,
            voice_id: &str,
            _api_key_override: Option<&str>,
        ) -> Result<Vec<u8>, AppError> {
            self.voices_seen.lock().unwrap().push(voice_id.to_string());
            if self.fail {
                Err(AppError::Synthesis("voice service down".into()))
            } else {
                Ok(vec![0xFF, 0xFB, 0x90])
            }
        }
    }

    struct EchoTool;

    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }
        fn affinity(&self) -> ExecutionAffinity {
            ExecutionAffinity::Async
        }
        fn run(&self, arguments: &Value) -> Result<String, AppError> {
            Ok(format!("echoed {}", arguments["text"].as_str().unwrap_or("")))
        }
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff: Duration::from_millis(1),
        }
    }

    fn orchestrator(
        transcript: &str,
        completion: Arc<StubCompletion>,
        synthesis: Arc<StubSynthesis>,
    ) -> TurnOrchestrator {
        let mut tools = ToolRegistry::new(1);
        tools.register(Arc::new(EchoTool));
        TurnOrchestrator::new(
            Arc::new(StubTranscription {
                transcript: transcript.to_string(),
            }),
            completion,
            synthesis,
            Arc::new(tools),
            quick_retry(),
        )
    }

    fn session() -> Arc<Session> {
        ConnectionManager::new(4, "voice-default".to_string(), 100, 15)
            .create_session()
            .unwrap()
    }

    fn text_reply(text: &str) -> CompletionResponse {
        CompletionResponse {
            text: text.to_string(),
            tool_calls: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_text_turn_without_tools() {
        let completion = Arc::new(StubCompletion::new(vec![text_reply("hi yourself")]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = orchestrator("", completion.clone(), synthesis.clone());
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(&session, TurnInput::Text("hello".into()), &sink)
            .await;

        // No tool calls means exactly one completion request
        assert_eq!(completion.request_count(), 1);

        let events = sink.events();
        assert!(events.contains(&ServerEvent::Response {
            text: "hi yourself".into()
        }));
        match events.last().unwrap() {
            ServerEvent::AudioReady { audio_url } => {
                assert!(audio_url.starts_with("data:audio/mp3;base64,"));
            }
            other => panic!("expected AudioReady last, got {:?}", other),
        }

        assert!(session.is_speaking());
        assert_eq!(session.history.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_one_tool_round_then_final_reply() {
        let completion = Arc::new(StubCompletion::new(vec![
            CompletionResponse {
                text: String::new(),
                tool_calls: vec![ToolCallRequest {
                    call_id: "call_9".into(),
                    name: "echo".into(),
                    arguments: r#"{"text":"ping"}"#.into(),
                }],
            },
            text_reply("the echo says ping"),
        ]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = orchestrator("", completion.clone(), synthesis);
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(&session, TurnInput::Text("run echo".into()), &sink)
            .await;

        assert_eq!(completion.request_count(), 2);

        // Second request carries the tool result keyed by the call id
        let second = completion.request(1);
        assert!(second.iter().any(|entry| matches!(
            entry,
            HistoryEntry::ToolResult { call_id, output }
                if call_id == "call_9" && output == "echoed ping"
        )));

        let events = sink.events();
        assert!(events.contains(&ServerEvent::Response {
            text: "the echo says ping".into()
        }));
    }

    #[tokio::test]
    async fn test_synthesis_failure_reports_once_and_stays_silent() {
        let completion = Arc::new(StubCompletion::new(vec![text_reply("doomed reply")]));
        let synthesis = Arc::new(StubSynthesis::failing());
        let orch = orchestrator("", completion, synthesis);
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(&session, TurnInput::Text("hello".into()), &sink)
            .await;

        let events = sink.events();
        let errors = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, ServerEvent::AudioReady { .. })));
        assert!(!session.is_speaking());
    }

    #[tokio::test]
    async fn test_empty_transcript_aborts_silently() {
        let completion = Arc::new(StubCompletion::new(vec![]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = orchestrator("   ", completion.clone(), synthesis);
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(
            &session,
            TurnInput::Audio {
                samples: vec![0.0; 16_000],
                sample_rate: 16_000,
            },
            &sink,
        )
        .await;

        assert_eq!(completion.request_count(), 0);
        let events = sink.events();
        assert!(!events.iter().any(|e| matches!(
            e,
            ServerEvent::Transcription { .. } | ServerEvent::Response { .. } | ServerEvent::Error { .. }
        )));
        assert!(session.history.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transcription_failure_skips_turn_silently() {
        let completion = Arc::new(StubCompletion::new(vec![]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = TurnOrchestrator::new(
            Arc::new(FailingTranscription),
            completion.clone(),
            synthesis,
            Arc::new(ToolRegistry::new(1)),
            quick_retry(),
        );
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(
            &session,
            TurnInput::Audio {
                samples: vec![0.1; 16_000],
                sample_rate: 16_000,
            },
            &sink,
        )
        .await;

        // Turn is dropped entirely: no completion call, no history entry,
        // and crucially no error event reaches the client
        assert_eq!(completion.request_count(), 0);
        assert!(session.history.lock().unwrap().is_empty());
        let events = sink.events();
        assert!(!events.iter().any(|e| matches!(
            e,
            ServerEvent::Error { .. }
                | ServerEvent::Transcription { .. }
                | ServerEvent::Response { .. }
        )));
    }

    #[tokio::test]
    async fn test_audio_turn_emits_transcription_first() {
        let completion = Arc::new(StubCompletion::new(vec![text_reply("heard you")]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = orchestrator("turn on the lights", completion, synthesis);
        let session = session();
        let sink = RecordingSink::new();

        orch.run_turn(
            &session,
            TurnInput::Audio {
                samples: vec![0.1; 16_000],
                sample_rate: 16_000,
            },
            &sink,
        )
        .await;

        let events = sink.events();
        let transcription_pos = events
            .iter()
            .position(|e| matches!(e, ServerEvent::Transcription { .. }))
            .expect("transcription event");
        let response_pos = events
            .iter()
            .position(|e| matches!(e, ServerEvent::Response { .. }))
            .expect("response event");
        assert!(transcription_pos < response_pos);
    }

    #[tokio::test]
    async fn test_configured_voice_reaches_synthesis() {
        let completion = Arc::new(StubCompletion::new(vec![text_reply("bonjour")]));
        let synthesis = Arc::new(StubSynthesis::ok());
        let orch = orchestrator("", completion, synthesis.clone());
        let session = session();
        session.apply_settings(&SettingsPatch {
            voice_id: Some("abc".into()),
            ..Default::default()
        });
        let sink = RecordingSink::new();

        orch.run_turn(&session, TurnInput::Text("hello".into()), &sink)
            .await;

        assert_eq!(*synthesis.voices_seen.lock().unwrap(), vec!["abc".to_string()]);
    }
}
