//! Backend boundary contracts
//!
//! The recognizer, language model, and synthesizer are external
//! collaborators; the gateway core only depends on these traits. The
//! OpenAI-compatible adapter in `openai.rs` is the shipped
//! implementation; tests substitute mocks.

mod openai;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::conversation::DialogueMessage;
use crate::{Error, Result};

pub use openai::{OpenAiChat, OpenAiRecognizer, OpenAiSpeech};

/// Declared operating mode of a recognizer backend.
///
/// Fixed per connection at setup: `Stream` binds voice frames to a
/// streaming session, `Batch` and `Local` to a buffered one. There is no
/// dynamic fallback; mixing both paths on one connection produces
/// duplicate or empty transcripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerMode {
    /// Cloud streaming API: chunks in, partials out
    Stream,
    /// Cloud batch API: whole utterance in, one transcript out
    Batch,
    /// Local batch model
    Local,
}

impl RecognizerMode {
    /// Parse a config string ("stream" / "batch" / "local")
    ///
    /// # Errors
    ///
    /// Returns a config error for unknown mode names.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "stream" => Ok(Self::Stream),
            "batch" => Ok(Self::Batch),
            "local" => Ok(Self::Local),
            other => Err(Error::Config(format!("unknown recognizer mode: {other}"))),
        }
    }
}

/// An open streaming recognition channel for one utterance
#[async_trait]
pub trait RecognizerStream: Send {
    /// Push one audio chunk; may yield an updated partial transcript
    ///
    /// # Errors
    ///
    /// Returns an error if the backend channel fails; the session maps
    /// this to an empty final transcript, never a crash.
    async fn push_chunk(&mut self, chunk: &[u8]) -> Result<Option<String>>;

    /// Close the channel and return the final transcript
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails to finalize.
    async fn close(self: Box<Self>) -> Result<String>;
}

/// Speech recognizer backend
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Declared interface mode; fixed for the process lifetime
    fn mode(&self) -> RecognizerMode;

    /// Open a streaming session (`Stream` mode only)
    ///
    /// # Errors
    ///
    /// Returns an error if the channel cannot be established, or if the
    /// backend does not support streaming.
    async fn open_stream(&self) -> Result<Box<dyn RecognizerStream>> {
        Err(Error::Recognition(
            "backend does not support streaming".to_string(),
        ))
    }

    /// Transcribe a complete utterance (`Batch`/`Local` modes only)
    ///
    /// # Errors
    ///
    /// Returns an error if transcription fails, or if the backend does
    /// not support batch transcription.
    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let _ = audio;
        Err(Error::Recognition(
            "backend does not support batch transcription".to_string(),
        ))
    }
}

/// One unit of a streamed language-model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyChunk {
    /// A text fragment
    Fragment(String),
    /// Explicit end-of-stream marker
    End,
}

/// Language-model backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Stream a reply to the given dialogue. The receiver yields
    /// fragments terminated by [`ReplyChunk::End`].
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be started; the worker
    /// substitutes the configured fallback line.
    async fn stream_reply(
        &self,
        system_prompt: &str,
        history: &[DialogueMessage],
    ) -> Result<mpsc::Receiver<ReplyChunk>>;

    /// One-shot non-streaming reply, used by the wakeup-cache refresh
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails.
    async fn reply(&self, system_prompt: &str, user_text: &str) -> Result<String>;
}

/// Speech synthesis backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize text to audio bytes
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis fails; callers substitute silence
    /// or a cached clip.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}
