//! # External Backend Interfaces
//!
//! The three external collaborators the turn pipeline depends on: completion
//! (chat + tool calling), transcription (speech-to-text), and synthesis
//! (text-to-speech). Each sits behind an async trait so the orchestrator and
//! its tests never touch a real network client.
//!
//! ## Resilience policy:
//! Every production backend call goes through [`call_with_retry`]: a hard
//! per-attempt timeout plus a bounded retry with exponential backoff. A
//! session can therefore never hang forever on a flaky dependency; the final
//! failure surfaces as a normal backend error on the turn boundary.
//!
//! ## Credentials:
//! Each call takes an optional per-session API key override (clients may send
//! their own keys in `configure` messages); the process-wide key from the
//! environment is the fallback.

pub mod completion;
pub mod synthesis;
pub mod transcription;

use crate::config::BackendConfig;
use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub use completion::{CompletionBackend, CompletionResponse, OpenAiCompletion, ToolCallRequest};
pub use synthesis::{ElevenLabsSynthesis, SynthesisBackend};
pub use transcription::{OpenAiTranscription, TranscriptionBackend};

/// Timeout + bounded-retry policy applied to every backend call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.max_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Run `attempt` under the retry policy.
///
/// Each attempt gets its own timeout; failures are retried up to
/// `max_retries` extra times with a doubling backoff delay between attempts.
/// The last error (or a timeout, wrapped through `mk_err`) is returned once
/// attempts are exhausted.
pub async fn call_with_retry<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    mk_err: fn(String) -> AppError,
    attempt: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut backoff = policy.backoff;
    let mut last_error = mk_err(format!("{}: no attempts made", label));

    for round in 0..=policy.max_retries {
        match tokio::time::timeout(policy.timeout, attempt()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => {
                warn!(backend = label, attempt = round + 1, error = %err, "backend call failed");
                last_error = err;
            }
            Err(_) => {
                warn!(backend = label, attempt = round + 1, "backend call timed out");
                last_error = mk_err(format!(
                    "{} timed out after {}s",
                    label,
                    policy.timeout.as_secs()
                ));
            }
        }

        if round < policy.max_retries {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    Err(last_error)
}

/// Pick the API key for a call: session override first, process key second.
pub(crate) fn resolve_key<'a>(
    override_key: Option<&'a str>,
    process_key: Option<&'a str>,
    backend: &str,
) -> Result<&'a str, AppError> {
    override_key
        .filter(|k| !k.is_empty())
        .or(process_key)
        .ok_or_else(|| {
            AppError::ConfigError(format!(
                "no API key configured for {} (set it in the environment or send one in a configure message)",
                backend
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = call_with_retry("test", &quick_policy(), AppError::Completion, move || {
            let calls = calls_in.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result = call_with_retry("test", &quick_policy(), AppError::Completion, move || {
            let calls = calls_in.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(AppError::Completion("transient".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = calls.clone();
        let result: Result<u32, _> =
            call_with_retry("test", &quick_policy(), AppError::Completion, move || {
                let calls = calls_in.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::Completion("always down".into()))
                }
            })
            .await;

        assert!(result.is_err());
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(10),
            max_retries: 0,
            backoff: Duration::from_millis(1),
        };
        let result: Result<u32, _> =
            call_with_retry("slow", &policy, AppError::Synthesis, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;

        match result {
            Err(AppError::Synthesis(msg)) => assert!(msg.contains("timed out")),
            other => panic!("expected synthesis timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_resolve_key_prefers_override() {
        assert_eq!(
            resolve_key(Some("session"), Some("process"), "openai").unwrap(),
            "session"
        );
        assert_eq!(resolve_key(None, Some("process"), "openai").unwrap(), "process");
        assert_eq!(resolve_key(Some(""), Some("process"), "openai").unwrap(), "process");
        assert!(resolve_key(None, None, "openai").is_err());
    }
}
