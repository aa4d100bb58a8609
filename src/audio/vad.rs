//! # Voice Activity Detection
//!
//! Wraps the `earshot` WebRTC-style voice activity detector behind a small
//! trait so the segmenter (and its tests) never depend on a concrete model.
//!
//! The detector contract mirrors what the segmenter needs: given a window of
//! normalized samples, return the speech intervals found in it, honoring a
//! sensitivity threshold, a minimum speech duration, and a minimum silence
//! gap between separate intervals.
//!
//! ## How intervals are built:
//! earshot classifies fixed-size frames (30 ms) as speech/silence. Raw frame
//! runs are then assembled into intervals in two steps:
//! 1. Runs separated by less than `min_silence_ms` of silence are merged
//! 2. Runs shorter than `min_speech_ms` are discarded
//!
//! Interval offsets are sample indices into the evaluated window, not wall
//! clock time, and are only meaningful for that one evaluation call.

use crate::error::AppError;
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// Frame length used for classification. 30 ms is the largest frame WebRTC
/// VAD supports and gives the most stable per-frame decisions.
const FRAME_MS: usize = 30;

/// A contiguous span of detected speech, as sample offsets into the
/// evaluated window (`start < end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechInterval {
    pub start: usize,
    pub end: usize,
}

impl SpeechInterval {
    pub fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Operating point for one detection pass.
///
/// The segmenter runs the same detector at two different operating points:
/// a sensitive pass for interruption detection (short bursts matter) and a
/// stricter pass for utterance finalization (don't cut users off).
#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    /// Confidence threshold in `[0, 1]`; higher filters more aggressively
    pub threshold: f32,

    /// Speech runs shorter than this are discarded
    pub min_speech_ms: u32,

    /// Silence gaps shorter than this merge adjacent speech runs
    pub min_silence_ms: u32,
}

/// Abstraction over a voice-activity model.
///
/// Production uses [`EarshotDetector`]; tests substitute synthetic detectors
/// that return scripted intervals.
pub trait SpeechDetector: Send + Sync {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &DetectionOptions,
    ) -> Result<Vec<SpeechInterval>, AppError>;
}

/// `earshot`-backed detector.
///
/// A fresh model instance is built per call: the underlying detector keeps
/// internal smoothing state, and each evaluation here is over a standalone
/// window, so carrying state across calls would skew results.
#[derive(Debug, Default)]
pub struct EarshotDetector;

impl EarshotDetector {
    pub fn new() -> Self {
        Self
    }

    /// Map a confidence threshold onto the discrete earshot profiles.
    /// Lower thresholds accept more marginal audio as speech.
    fn profile_for_threshold(threshold: f32) -> VoiceActivityProfile {
        match threshold {
            t if t <= 0.40 => VoiceActivityProfile::QUALITY,
            t if t <= 0.55 => VoiceActivityProfile::LBR,
            t if t <= 0.70 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        }
    }
}

impl SpeechDetector for EarshotDetector {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
        options: &DetectionOptions,
    ) -> Result<Vec<SpeechInterval>, AppError> {
        let frame_samples = (sample_rate as usize * FRAME_MS) / 1000;
        if frame_samples == 0 || samples.is_empty() {
            return Ok(Vec::new());
        }

        let mut model = VoiceActivityDetector::new(Self::profile_for_threshold(options.threshold));

        // Classify each 30ms frame; the last partial frame is zero-padded.
        let mut decisions = Vec::with_capacity(samples.len() / frame_samples + 1);
        let mut scratch = vec![0i16; frame_samples];

        for frame in samples.chunks(frame_samples) {
            for (dst, src) in scratch.iter_mut().zip(frame.iter()) {
                *dst = (src.clamp(-1.0, 1.0) * 32_767.0) as i16;
            }
            for dst in scratch.iter_mut().skip(frame.len()) {
                *dst = 0;
            }

            let is_speech = match sample_rate {
                8_000 => model.predict_8khz(&scratch),
                16_000 => model.predict_16khz(&scratch),
                32_000 => model.predict_32khz(&scratch),
                48_000 => model.predict_48khz(&scratch),
                other => {
                    return Err(AppError::Segmentation(format!(
                        "unsupported sample rate for VAD: {} Hz",
                        other
                    )))
                }
            }
            .map_err(|e| AppError::Segmentation(format!("VAD model failure: {:?}", e)))?;

            decisions.push(is_speech);
        }

        let min_speech_samples = (sample_rate as usize * options.min_speech_ms as usize) / 1000;
        let min_silence_samples = (sample_rate as usize * options.min_silence_ms as usize) / 1000;

        Ok(assemble_intervals(
            &decisions,
            frame_samples,
            samples.len(),
            min_speech_samples,
            min_silence_samples,
        ))
    }
}

/// Turn per-frame speech decisions into sample-offset intervals.
///
/// ## Steps:
/// 1. Collect raw runs of consecutive speech frames
/// 2. Merge runs whose silence gap is below `min_silence_samples`
/// 3. Drop merged runs shorter than `min_speech_samples`
///
/// `total_len` clamps the final interval so zero-padding of the last frame
/// never extends an interval past the real audio.
fn assemble_intervals(
    decisions: &[bool],
    frame_samples: usize,
    total_len: usize,
    min_speech_samples: usize,
    min_silence_samples: usize,
) -> Vec<SpeechInterval> {
    // Step 1: raw runs
    let mut raw: Vec<SpeechInterval> = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, &is_speech) in decisions.iter().enumerate() {
        match (is_speech, run_start) {
            (true, None) => run_start = Some(i * frame_samples),
            (false, Some(start)) => {
                raw.push(SpeechInterval {
                    start,
                    end: i * frame_samples,
                });
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        raw.push(SpeechInterval {
            start,
            end: (decisions.len() * frame_samples).min(total_len),
        });
    }

    // Step 2: merge across short silence gaps
    let mut merged: Vec<SpeechInterval> = Vec::new();
    for interval in raw {
        match merged.last_mut() {
            Some(prev) if interval.start.saturating_sub(prev.end) < min_silence_samples => {
                prev.end = interval.end;
            }
            _ => merged.push(interval),
        }
    }

    // Step 3: discard runs too short to count as speech
    merged.retain(|iv| iv.len() >= min_speech_samples);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: usize = 480; // 30ms at 16kHz

    fn intervals(decisions: &[bool], min_speech: usize, min_silence: usize) -> Vec<SpeechInterval> {
        assemble_intervals(decisions, FRAME, decisions.len() * FRAME, min_speech, min_silence)
    }

    #[test]
    fn test_single_run_becomes_interval() {
        let decisions = [false, true, true, true, false, false];
        let got = intervals(&decisions, FRAME, FRAME);
        assert_eq!(got, vec![SpeechInterval { start: FRAME, end: 4 * FRAME }]);
    }

    #[test]
    fn test_short_runs_are_dropped() {
        // One-frame blip, below a two-frame minimum speech duration
        let decisions = [false, true, false, false, false, false];
        let got = intervals(&decisions, 2 * FRAME, FRAME);
        assert!(got.is_empty());
    }

    #[test]
    fn test_short_gaps_are_merged() {
        // speech, 1-frame gap, speech; the gap is below a two-frame silence minimum
        let decisions = [true, true, false, true, true];
        let got = intervals(&decisions, FRAME, 2 * FRAME);
        assert_eq!(got, vec![SpeechInterval { start: 0, end: 5 * FRAME }]);
    }

    #[test]
    fn test_long_gaps_split_intervals() {
        let decisions = [true, true, false, false, false, true, true];
        let got = intervals(&decisions, FRAME, 2 * FRAME);
        assert_eq!(
            got,
            vec![
                SpeechInterval { start: 0, end: 2 * FRAME },
                SpeechInterval { start: 5 * FRAME, end: 7 * FRAME },
            ]
        );
    }

    #[test]
    fn test_trailing_run_clamped_to_total_len() {
        let decisions = [false, true, true];
        // Real audio ends mid-way through the last frame
        let total = 2 * FRAME + FRAME / 2;
        let got = assemble_intervals(&decisions, FRAME, total, FRAME, FRAME);
        assert_eq!(got, vec![SpeechInterval { start: FRAME, end: total }]);
    }

    #[test]
    fn test_unsupported_rate_is_an_error() {
        let detector = EarshotDetector::new();
        let options = DetectionOptions {
            threshold: 0.4,
            min_speech_ms: 250,
            min_silence_ms: 700,
        };
        let result = detector.detect(&vec![0.0; 44_100], 44_100, &options);
        assert!(result.is_err());
    }

    #[test]
    fn test_silence_yields_no_intervals() {
        let detector = EarshotDetector::new();
        let options = DetectionOptions {
            threshold: 0.4,
            min_speech_ms: 250,
            min_silence_ms: 700,
        };
        let got = detector.detect(&vec![0.0; 16_000], 16_000, &options).unwrap();
        assert!(got.is_empty());
    }
}
