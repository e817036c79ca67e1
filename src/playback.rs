//! Sentence-ordered playback queue
//!
//! Segments for one reply are enqueued in production order and drained
//! strictly FIFO by the per-connection sender loop. `flush` drops every
//! pending segment of the in-flight reply; since the gateway runs one
//! reply per connection at a time, the pending backlog always belongs to
//! the current reply.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

/// Position marker on a synthesized segment so the device knows when a
/// reply begins and ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentenceType {
    /// First segment of a reply
    First,
    /// Interior segment
    Middle,
    /// Terminal segment; may carry empty audio
    Last,
}

/// One synthesized speech segment
#[derive(Debug, Clone)]
pub struct PlaybackSegment {
    /// Ordering marker
    pub sentence_type: SentenceType,

    /// Raw audio payload; empty audio is legal (silence substitution,
    /// bare end markers)
    pub audio: Vec<u8>,

    /// Source text, when there is one, for device UI feedback
    pub text: Option<String>,
}

impl PlaybackSegment {
    /// Convenience constructor
    #[must_use]
    pub const fn new(sentence_type: SentenceType, audio: Vec<u8>, text: Option<String>) -> Self {
        Self {
            sentence_type,
            audio,
            text,
        }
    }

    /// Bare end-of-reply marker
    #[must_use]
    pub const fn end_marker() -> Self {
        Self {
            sentence_type: SentenceType::Last,
            audio: Vec::new(),
            text: None,
        }
    }
}

struct QueueInner {
    segments: Mutex<VecDeque<PlaybackSegment>>,
    notify: Notify,
    closed: AtomicBool,
}

/// FIFO queue of playback segments shared between producers
/// (conversation worker, scripted flows) and the sender loop
#[derive(Clone)]
pub struct PlaybackQueue {
    inner: Arc<QueueInner>,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    /// Create an empty open queue
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(QueueInner {
                segments: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Append a segment. Enqueueing after close is a no-op.
    pub async fn enqueue(&self, segment: PlaybackSegment) {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::debug!("discarding segment enqueued after queue close");
            return;
        }
        self.inner.segments.lock().await.push_back(segment);
        self.inner.notify.notify_one();
    }

    /// Drop all pending segments, returning how many were dropped.
    /// Used on abort; the segment currently being sent is unaffected.
    pub async fn flush(&self) -> usize {
        let mut segments = self.inner.segments.lock().await;
        let dropped = segments.len();
        segments.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "flushed playback queue");
        }
        dropped
    }

    /// Wait for the next segment in FIFO order. Returns `None` once the
    /// queue is closed and drained.
    pub async fn next(&self) -> Option<PlaybackSegment> {
        loop {
            // Register for notification before checking, so a concurrent
            // enqueue between the check and the await is not missed.
            let notified = self.inner.notify.notified();
            if let Some(segment) = self.inner.segments.lock().await.pop_front() {
                return Some(segment);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue; pending segments remain drainable
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of pending segments
    pub async fn len(&self) -> usize {
        self.inner.segments.lock().await.len()
    }

    /// Whether there are no pending segments
    pub async fn is_empty(&self) -> bool {
        self.inner.segments.lock().await.is_empty()
    }
}
