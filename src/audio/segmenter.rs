//! # Speech Segmentation
//!
//! Decides, after every inbound audio chunk, whether the user has (a)
//! interrupted an in-progress spoken reply and (b) finished an utterance
//! that is ready for transcription.
//!
//! ## Two passes, two operating points:
//! The same detector runs twice over the same window with deliberately
//! different settings. The *sensitive* pass (interruption) fires fast on
//! short bursts of speech while the assistant is talking; the *finalization*
//! pass demands longer speech and a long silence tail so users are not cut
//! off mid-sentence. These are different operating points of one detector,
//! not a single threshold.
//!
//! ## Failure handling:
//! A detector failure is returned to the caller, which logs it, clears the
//! buffer and carries on: the ambiguous window is dropped rather than
//! risking reprocessing corrupt state. The client is never notified.

use crate::audio::buffer::AudioBuffer;
use crate::audio::vad::{DetectionOptions, SpeechDetector};
use crate::error::AppError;
use std::sync::Arc;
use tracing::debug;

/// Sensitive pass used while the assistant is speaking: low threshold,
/// very short minimum speech so brief bursts register.
const INTERRUPTION_PASS: DetectionOptions = DetectionOptions {
    threshold: 0.5,
    min_speech_ms: 80,
    min_silence_ms: 100,
};

/// Finalization pass: stricter minimum speech, long internal silence so a
/// mid-sentence pause doesn't split one utterance into two.
const FINALIZATION_PASS: DetectionOptions = DetectionOptions {
    threshold: 0.4,
    min_speech_ms: 250,
    min_silence_ms: 700,
};

/// Below `sample_rate / MIN_BUFFER_DIVISOR` buffered samples, evaluation is
/// an unconditional no-op.
const MIN_BUFFER_DIVISOR: u32 = 3;

/// What the segmenter concluded about the buffered audio.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentDecision {
    /// Not enough audio buffered to say anything yet
    InsufficientData,

    /// No speech intervals found; nothing to finalize
    NoSpeech,

    /// Speech found but the silence tail is too short; keep accumulating
    StillSpeaking,

    /// A complete utterance, extracted from first speech start to last
    /// speech end. The caller must clear the buffer.
    Finalized(Vec<f32>),
}

/// Result of one buffer evaluation.
///
/// `interrupted` is decided by the sensitive pass *before* the finalization
/// pass runs and is independent of the decision: the caller must tell the
/// client to cancel playback and drop the speaking flag when it is set.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    pub interrupted: bool,
    pub decision: SegmentDecision,
}

impl SegmentationResult {
    fn quiet(decision: SegmentDecision) -> Self {
        Self {
            interrupted: false,
            decision,
        }
    }
}

/// Evaluates a connection's audio buffer after each appended chunk.
pub struct SpeechSegmenter {
    detector: Arc<dyn SpeechDetector>,

    /// Silence tail (seconds) required after the last speech interval
    trailing_silence_secs: f32,

    /// Cumulative speech (seconds) that counts as a clear interruption
    interruption_speech_secs: f32,
}

impl SpeechSegmenter {
    pub fn new(
        detector: Arc<dyn SpeechDetector>,
        trailing_silence_secs: f32,
        interruption_speech_secs: f32,
    ) -> Self {
        Self {
            detector,
            trailing_silence_secs,
            interruption_speech_secs,
        }
    }

    /// Evaluate the buffer. Never mutates the buffer or any session state;
    /// the caller acts on the returned result.
    ///
    /// ## Order of checks:
    /// 1. Minimum-data gate (`sample_rate / 3` samples)
    /// 2. Interruption (only when `assistant_speaking`)
    /// 3. Finalization (always, regardless of step 2's outcome)
    pub fn evaluate(
        &self,
        buffer: &AudioBuffer,
        assistant_speaking: bool,
    ) -> Result<SegmentationResult, AppError> {
        let sample_rate = buffer.sample_rate();
        let window = buffer.snapshot();

        if window.len() < (sample_rate / MIN_BUFFER_DIVISOR) as usize {
            return Ok(SegmentationResult::quiet(SegmentDecision::InsufficientData));
        }

        let mut interrupted = false;
        if assistant_speaking {
            let intervals = self
                .detector
                .detect(&window, sample_rate, &INTERRUPTION_PASS)?;

            let speech_samples: usize = intervals.iter().map(|iv| iv.len()).sum();
            let speech_secs = speech_samples as f32 / sample_rate as f32;

            if speech_secs >= self.interruption_speech_secs {
                debug!(
                    speech_secs = speech_secs,
                    "user speech long enough to interrupt assistant playback"
                );
                interrupted = true;
            }
        }

        let intervals = self
            .detector
            .detect(&window, sample_rate, &FINALIZATION_PASS)?;

        let decision = match (intervals.first(), intervals.last()) {
            (Some(first), Some(last)) => {
                let trailing_silence = window.len() - last.end;
                let required = (self.trailing_silence_secs * sample_rate as f32) as usize;

                if trailing_silence >= required {
                    let utterance = window[first.start..last.end].to_vec();
                    debug!(
                        utterance_secs = utterance.len() as f32 / sample_rate as f32,
                        "utterance finalized"
                    );
                    SegmentDecision::Finalized(utterance)
                } else {
                    SegmentDecision::StillSpeaking
                }
            }
            _ => SegmentDecision::NoSpeech,
        };

        Ok(SegmentationResult {
            interrupted,
            decision,
        })
    }
}
