//! Recognition routing
//!
//! The router inspects the configured recognizer's declared mode once at
//! connection setup and binds all subsequent voice frames to either a
//! streaming or a buffered session. The choice is fixed for the
//! connection lifetime: mixing both paths for one connection produces
//! duplicate or empty transcripts, so there is no dynamic fallback.

mod buffered;
mod streaming;

use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::backends::{Recognizer, RecognizerMode};

pub use buffered::BufferedRecognitionSession;
pub use streaming::{StreamState, StreamingRecognitionSession};

/// The per-utterance session currently owned by a connection.
/// At most one exists per connection at any instant; the connection
/// event loop is its only writer.
pub enum ActiveSession {
    /// Direct streaming path (`Stream` mode)
    Streaming(StreamingRecognitionSession),
    /// Buffered batch path (`Batch`/`Local` modes)
    Buffered(BufferedRecognitionSession),
}

impl ActiveSession {
    /// Drop the session without producing a transcript. Used when the
    /// wake-word suppression window discards a spurious utterance.
    pub fn abandon(self) {
        match self {
            Self::Streaming(session) => session.abandon(),
            Self::Buffered(session) => {
                tracing::debug!(frames = session.frame_count(), "abandoning buffered session");
            }
        }
    }
}

/// Binds voice frames to the recognition path declared by the backend
pub struct RecognitionRouter {
    recognizer: Arc<dyn Recognizer>,
    mode: RecognizerMode,
    close_grace: Duration,
    buffer_cap: usize,
}

impl RecognitionRouter {
    /// Fix the routing decision for this connection
    #[must_use]
    pub fn new(recognizer: Arc<dyn Recognizer>, close_grace: Duration, buffer_cap: usize) -> Self {
        let mode = recognizer.mode();
        tracing::debug!(?mode, "recognition path fixed for connection");
        Self {
            recognizer,
            mode,
            close_grace,
            buffer_cap,
        }
    }

    /// The mode this router was fixed to
    #[must_use]
    pub const fn mode(&self) -> RecognizerMode {
        self.mode
    }

    /// Open a new per-utterance session on the fixed path
    ///
    /// # Errors
    ///
    /// Returns an error if the streaming channel cannot be established.
    pub async fn open_session(&self) -> Result<ActiveSession> {
        match self.mode {
            RecognizerMode::Stream => {
                let session =
                    StreamingRecognitionSession::open(self.recognizer.as_ref(), self.close_grace)
                        .await?;
                Ok(ActiveSession::Streaming(session))
            }
            RecognizerMode::Batch | RecognizerMode::Local => Ok(ActiveSession::Buffered(
                BufferedRecognitionSession::new(self.buffer_cap),
            )),
        }
    }

    /// The recognizer backend, for buffered submission
    #[must_use]
    pub fn recognizer(&self) -> &Arc<dyn Recognizer> {
        &self.recognizer
    }
}
