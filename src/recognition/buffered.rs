//! Buffered recognition session
//!
//! Two-state machine: frames accumulate in memory while voice is
//! present, then the whole utterance is submitted once for batch
//! transcription. No partials. The buffer is capped; overflow drops the
//! oldest frames with a warning rather than growing unbounded.

use std::collections::VecDeque;

use tokio::time::Instant;

use crate::audio::AudioFrame;
use crate::backends::Recognizer;

/// A per-utterance buffered recognition session
pub struct BufferedRecognitionSession {
    frames: VecDeque<Vec<u8>>,
    buffered_bytes: usize,
    cap_bytes: usize,
    dropped_frames: u64,
    started_at: Instant,
}

impl BufferedRecognitionSession {
    /// Start accumulating a new utterance
    #[must_use]
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            buffered_bytes: 0,
            cap_bytes,
            dropped_frames: 0,
            started_at: Instant::now(),
        }
    }

    /// Append one voice frame, evicting oldest frames if the cap is hit
    pub fn append(&mut self, frame: &AudioFrame) {
        self.frames.push_back(frame.payload.clone());
        self.buffered_bytes += frame.payload.len();

        while self.buffered_bytes > self.cap_bytes {
            let Some(oldest) = self.frames.pop_front() else {
                break;
            };
            self.buffered_bytes -= oldest.len();
            self.dropped_frames += 1;
            tracing::warn!(
                dropped_total = self.dropped_frames,
                cap_bytes = self.cap_bytes,
                "utterance buffer full, dropping oldest frame"
            );
        }
    }

    /// Submit the accumulated utterance for transcription.
    ///
    /// Consuming `self` makes the `Accumulating -> Submitted` transition
    /// structural: an utterance is submitted exactly once. Backend
    /// errors yield an empty transcript.
    pub async fn submit(self, recognizer: &dyn Recognizer) -> String {
        let mut audio = Vec::with_capacity(self.buffered_bytes);
        for frame in &self.frames {
            audio.extend_from_slice(frame);
        }

        if audio.is_empty() {
            tracing::debug!("empty utterance buffer, skipping transcription");
            return String::new();
        }

        tracing::debug!(
            frames = self.frames.len(),
            bytes = audio.len(),
            elapsed_ms = self.started_at.elapsed().as_millis(),
            "submitting utterance for batch transcription"
        );

        match recognizer.transcribe(&audio).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "batch transcription failed, returning empty transcript");
                String::new()
            }
        }
    }

    /// Number of buffered frames
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Buffered payload size in bytes
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.buffered_bytes
    }

    /// Frames dropped to the cap so far
    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}
