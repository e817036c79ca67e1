//! Streaming recognition session
//!
//! Per-utterance state machine over an open backend channel:
//! `Open -> Streaming -> Closing -> Closed`. Frames keep being forwarded
//! while the session is Closing, because frames can legitimately arrive
//! with some delay relative to the decision to close; discarding them is
//! the most consequential correctness bug in this subsystem.

use std::time::Duration;

use tokio::time::Instant;

use crate::Result;
use crate::audio::AudioFrame;
use crate::backends::{Recognizer, RecognizerStream};

/// Session state. `Idle` is represented by the absence of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Channel established, no audio forwarded yet
    Open,
    /// Audio flowing; backend may emit partials at any point
    Streaming,
    /// Close requested; late frames still drain until the grace deadline
    Closing,
    /// Finalized; the session object is discarded after this
    Closed,
}

/// A per-utterance streaming recognition session
pub struct StreamingRecognitionSession {
    stream: Option<Box<dyn RecognizerStream>>,
    state: StreamState,
    partial: Option<String>,
    started_at: Instant,
    close_deadline: Option<Instant>,
    grace: Duration,
    failed: bool,
}

impl StreamingRecognitionSession {
    /// Establish the backend streaming channel
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be opened.
    pub async fn open(recognizer: &dyn Recognizer, grace: Duration) -> Result<Self> {
        let stream = recognizer.open_stream().await?;
        tracing::debug!("streaming recognition session opened");
        Ok(Self {
            stream: Some(stream),
            state: StreamState::Open,
            partial: None,
            started_at: Instant::now(),
            close_deadline: None,
            grace,
            failed: false,
        })
    }

    /// Forward one frame to the backend. Legal in `Open`, `Streaming`,
    /// and `Closing`; any partial transcript the backend emits becomes
    /// the session's current best guess (not yet acted upon).
    pub async fn push(&mut self, frame: &AudioFrame) {
        if self.state == StreamState::Closed || self.failed {
            return;
        }
        if self.state == StreamState::Open {
            self.state = StreamState::Streaming;
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        match stream.push_chunk(&frame.payload).await {
            Ok(Some(partial)) => {
                tracing::trace!(partial = %partial, "partial transcript");
                self.partial = Some(partial);
            }
            Ok(None) => {}
            Err(e) => {
                // Backend channel failure surfaces as an empty final
                // transcript at close; the connection survives.
                tracing::error!(error = %e, "recognition channel error");
                self.failed = true;
            }
        }
    }

    /// Request close. The session enters `Closing` and tolerates
    /// delayed-arriving frames until the grace deadline.
    pub fn request_close(&mut self, now: Instant) {
        if matches!(self.state, StreamState::Closing | StreamState::Closed) {
            return;
        }
        self.state = StreamState::Closing;
        self.close_deadline = Some(now + self.grace);
        tracing::debug!(grace_ms = self.grace.as_millis(), "recognition close requested");
    }

    /// Whether the grace window has elapsed and the session can finalize
    #[must_use]
    pub fn ready_to_finalize(&self, now: Instant) -> bool {
        self.state == StreamState::Closing
            && self.close_deadline.is_some_and(|deadline| now >= deadline)
    }

    /// Deadline the connection event loop should wake at, if any
    #[must_use]
    pub const fn close_deadline(&self) -> Option<Instant> {
        if matches!(self.state, StreamState::Closing) {
            self.close_deadline
        } else {
            None
        }
    }

    /// Close the backend channel and return the final transcript.
    /// Backend errors yield an empty transcript, never a crash.
    pub async fn finalize(mut self) -> String {
        self.state = StreamState::Closed;
        let Some(stream) = self.stream.take() else {
            return String::new();
        };
        if self.failed {
            tracing::error!("finalizing failed recognition session with empty transcript");
            return String::new();
        }
        match stream.close().await {
            Ok(text) => {
                tracing::debug!(
                    transcript = %text,
                    elapsed_ms = self.started_at.elapsed().as_millis(),
                    "recognition session finalized"
                );
                text
            }
            Err(e) => {
                tracing::error!(error = %e, "recognition close failed, returning empty transcript");
                String::new()
            }
        }
    }

    /// Drop the session without finalizing
    pub fn abandon(mut self) {
        self.stream = None;
        tracing::debug!("abandoning streaming session");
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Whether the session is draining toward close
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state == StreamState::Closing
    }

    /// Current best-guess partial transcript
    #[must_use]
    pub fn partial(&self) -> Option<&str> {
        self.partial.as_deref()
    }
}
