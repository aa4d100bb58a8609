//! # Audio Buffer Management
//!
//! Implements the per-connection rolling sample store that feeds voice-activity
//! segmentation. The buffer keeps a bounded time window of normalized mono
//! samples; once the window is full, the oldest samples are dropped so memory
//! stays constant no matter how long a client streams.
//!
//! ## Key Features:
//! - **Sliding window**: Never holds more than `sample_rate * max_window_seconds` samples
//! - **FIFO truncation**: Overflow always removes the oldest samples first
//! - **Thread safety**: The WebSocket actor appends while spawned segmentation
//!   tasks read snapshots
//!
//! ## Rust Concepts:
//! - **VecDeque**: Double-ended queue, efficient push_back/pop_front for the window
//! - **Mutex**: The buffer is shared between the connection actor and turn tasks

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

/// Rolling buffer of normalized mono `f32` samples for one connection.
///
/// ## Lifecycle:
/// Created when the first audio chunk arrives (which pins the connection's
/// sample rate), appended to on every chunk, fully cleared after an utterance
/// is finalized or on a segmentation error, and destroyed with the session.
pub struct AudioBuffer {
    samples: Mutex<VecDeque<f32>>,

    /// Sample rate pinned for the lifetime of this buffer
    sample_rate: u32,

    /// Hard cap on buffered samples (`sample_rate * max_window_seconds`)
    max_samples: usize,
}

impl AudioBuffer {
    /// Create a buffer holding at most `max_window_seconds` of audio.
    pub fn new(sample_rate: u32, max_window_seconds: u32) -> Self {
        let max_samples = sample_rate as usize * max_window_seconds as usize;
        Self {
            samples: Mutex::new(VecDeque::with_capacity(max_samples.min(sample_rate as usize))),
            sample_rate,
            max_samples,
        }
    }

    /// The sample rate this buffer was created with.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Append a chunk of samples, truncating from the front when the window
    /// overflows. Always succeeds; there are no error conditions.
    pub fn append(&self, chunk: &[f32]) {
        let mut samples = self.samples.lock().unwrap();
        samples.extend(chunk.iter().copied());

        // Oldest samples go first (FIFO truncation)
        while samples.len() > self.max_samples {
            samples.pop_front();
        }
    }

    /// Reset to empty. Any in-flight evaluation of the previous contents is
    /// stale after this and must be discarded by the caller.
    pub fn clear(&self) {
        self.samples.lock().unwrap().clear();
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().unwrap().is_empty()
    }

    /// Copy of the whole window, used for a segmentation pass.
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.lock().unwrap().iter().copied().collect()
    }
}

/// Decode a base64 chunk of little-endian float32 PCM into samples.
///
/// ## Wire format:
/// `audio_stream` messages carry `data` as base64 over raw f32 LE bytes, the
/// format the browser's AudioWorklet produces. A payload whose byte length is
/// not a multiple of 4 is rejected as malformed.
pub fn decode_f32_chunk(data_base64: &str) -> Result<Vec<f32>, String> {
    let bytes = BASE64
        .decode(data_base64)
        .map_err(|e| format!("invalid base64 audio payload: {}", e))?;

    if bytes.len() % 4 != 0 {
        return Err("audio payload length must be a multiple of 4 bytes".to_string());
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut samples = Vec::with_capacity(bytes.len() / 4);
    while let Ok(sample) = cursor.read_f32::<LittleEndian>() {
        samples.push(sample);
    }

    Ok(samples)
}
