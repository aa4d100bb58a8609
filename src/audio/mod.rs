//! # Audio Pipeline Module
//!
//! Realtime audio handling for the voice assistant: per-connection sample
//! buffering, voice-activity detection, and the segmentation logic that
//! turns a continuous microphone stream into discrete utterances (and
//! interruption signals while the assistant is speaking).
//!
//! ## Key Components:
//! - **AudioBuffer**: Rolling 15-second window of normalized mono samples
//! - **SpeechDetector / EarshotDetector**: VAD behind a trait seam
//! - **SpeechSegmenter**: Interruption + utterance-finalization decisions
//!
//! ## Audio Format:
//! Clients stream base64-encoded little-endian float32 PCM, mono, at a
//! sample rate they declare with the first chunk (8/16/32/48 kHz supported
//! by the detector). The rate is pinned for the connection's lifetime.

pub mod buffer;    // Rolling per-connection sample window
pub mod segmenter; // Interruption + finalization state machine
pub mod vad;       // Voice-activity detection trait + earshot impl
