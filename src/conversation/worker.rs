//! Conversation worker pool
//!
//! Replies run on a bounded pool so audio ingestion is never blocked by
//! model latency. A worker appends the transcript to dialogue history,
//! streams the model reply, splits it into sentences, synthesizes each
//! one, and enqueues playback segments in FIRST/MIDDLE/LAST order. Each
//! reply carries its own generation; cancellation is checked against it
//! at every fragment boundary, so an aborted worker can never resume
//! after a later reply has started.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::backends::{LanguageModel, ReplyChunk, SpeechSynthesizer};
use crate::connection::ConnectionShared;
use crate::conversation::Role;
use crate::playback::{PlaybackSegment, SentenceType};

/// Everything one reply needs, captured at submission time
pub struct ReplyContext {
    /// Shared connection state (queue, dialogue, flags)
    pub shared: Arc<ConnectionShared>,
    /// Language-model backend
    pub llm: Arc<dyn LanguageModel>,
    /// Synthesis backend
    pub tts: Arc<dyn SpeechSynthesizer>,
    /// System prompt for the model
    pub system_prompt: String,
    /// Line spoken when the model fails
    pub fallback_text: String,
    /// Line spoken when the pool is saturated
    pub busy_text: String,
}

/// Bounded pool gating concurrent language-model replies
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a pool with the given number of concurrent reply slots
    #[must_use]
    pub fn new(pool_size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// Submit a transcript for an asynchronous reply.
    ///
    /// When the pool is saturated the submission is rejected immediately
    /// and a fixed busy line plays instead; unbounded queuing would make
    /// latency unpredictable.
    pub fn submit(&self, cx: ReplyContext, transcript: String) {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => {
                let generation = cx.shared.begin_reply();
                tokio::spawn(async move {
                    run_reply(&cx, generation, transcript).await;
                    cx.shared.finish_reply(generation);
                    drop(permit);
                });
            }
            Err(_) => {
                tracing::warn!("worker pool saturated, rejecting submission");
                tokio::spawn(async move {
                    let line = cx.busy_text.clone();
                    speak_single(&cx, &line).await;
                });
            }
        }
    }

    /// Remaining reply slots, for observability
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Produce one full reply
async fn run_reply(cx: &ReplyContext, generation: u64, transcript: String) {
    let history = {
        let mut dialogue = cx.shared.dialogue.lock().await;
        dialogue.push(Role::User, transcript);
        dialogue.messages().to_vec()
    };

    let mut rx = match cx.llm.stream_reply(&cx.system_prompt, &history).await {
        Ok(rx) => rx,
        Err(e) => {
            tracing::error!(error = %e, "language model unavailable");
            let line = cx.fallback_text.clone();
            speak_single(cx, &line).await;
            return;
        }
    };

    let mut splitter = SentenceSplitter::new();
    let mut reply_text = String::new();
    let mut sent_any = false;
    let mut aborted = false;

    'stream: while let Some(chunk) = rx.recv().await {
        if cx.shared.reply_aborted(generation) {
            aborted = true;
            break;
        }
        match chunk {
            ReplyChunk::Fragment(fragment) => {
                reply_text.push_str(&fragment);
                for sentence in splitter.push(&fragment) {
                    if cx.shared.reply_aborted(generation) {
                        aborted = true;
                        break 'stream;
                    }
                    speak_sentence(cx, &sentence, &mut sent_any).await;
                }
            }
            ReplyChunk::End => break,
        }
    }

    if aborted {
        tracing::debug!("reply aborted, no further segments");
    } else {
        if let Some(rest) = splitter.flush() {
            speak_sentence(cx, &rest, &mut sent_any).await;
        }
        if sent_any {
            cx.shared.queue.enqueue(PlaybackSegment::end_marker()).await;
        } else {
            // The model produced nothing speakable.
            tracing::warn!("empty model reply, speaking fallback line");
            let line = cx.fallback_text.clone();
            speak_single(cx, &line).await;
            return;
        }
    }

    if !reply_text.trim().is_empty() {
        cx.shared
            .dialogue
            .lock()
            .await
            .push(Role::Assistant, reply_text.clone());
        cx.shared
            .add_output_chars(reply_text.chars().count() as u64);
    }
}

/// Synthesize one sentence and enqueue it with the right marker;
/// synthesis failure substitutes silence so the markers stay intact.
async fn speak_sentence(cx: &ReplyContext, sentence: &str, sent_any: &mut bool) {
    let audio = match cx.tts.synthesize(sentence).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, "synthesis failed, substituting silence");
            Vec::new()
        }
    };
    let marker = if *sent_any {
        SentenceType::Middle
    } else {
        SentenceType::First
    };
    *sent_any = true;
    cx.shared
        .queue
        .enqueue(PlaybackSegment::new(marker, audio, Some(sentence.to_string())))
        .await;
}

/// Speak one short scripted line as a lone LAST segment
async fn speak_single(cx: &ReplyContext, line: &str) {
    let audio = match cx.tts.synthesize(line).await {
        Ok(audio) => audio,
        Err(e) => {
            tracing::warn!(error = %e, "synthesis failed, substituting silence");
            Vec::new()
        }
    };
    cx.shared
        .queue
        .enqueue(PlaybackSegment::new(
            SentenceType::Last,
            audio,
            Some(line.to_string()),
        ))
        .await;
    cx.shared
        .dialogue
        .lock()
        .await
        .push(Role::Assistant, line.to_string());
}

/// Accumulates streamed fragments and yields complete sentences
pub struct SentenceSplitter {
    buffer: String,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl SentenceSplitter {
    /// Empty splitter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Feed a fragment, returning any sentences it completed
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.buffer.push_str(fragment);
        let mut sentences = Vec::new();
        loop {
            let Some((idx, c)) = self
                .buffer
                .char_indices()
                .find(|(_, c)| is_sentence_break(*c))
            else {
                break;
            };
            let end = idx + c.len_utf8();
            let sentence: String = self.buffer.drain(..end).collect();
            let trimmed = sentence.trim();
            if trimmed.chars().any(char::is_alphanumeric) {
                sentences.push(trimmed.to_string());
            }
        }
        sentences
    }

    /// Drain whatever remains as a final sentence, if speakable
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let trimmed = rest.trim();
        if trimmed.chars().any(char::is_alphanumeric) {
            Some(trimmed.to_string())
        } else {
            None
        }
    }
}

/// Sentence boundary characters, Latin and CJK
const fn is_sentence_break(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | ';' | '\n' | '。' | '！' | '？' | '；')
}
