//! Per-connection conversation orchestrator
//!
//! One device link owns one [`Connection`]: a cooperative event loop that
//! consumes inbound frames and control messages in arrival order, drives
//! VAD gating, recognition routing, intent short-circuiting, worker
//! handoff, and the idle/quota lifecycle. A separate sender task drains
//! the playback queue to the device. Everything here is connection-local;
//! the only cross-connection shared mutable state is the wakeup refresh
//! lock.

mod lifecycle;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::Instant;

use crate::audio::{AudioFrame, CannedAudio, VadDecision, VadGate};
use crate::backends::{LanguageModel, Recognizer, SpeechSynthesizer};
use crate::config::Config;
use crate::conversation::{Dialogue, ReplyContext, Role, WorkerPool};
use crate::intent::{IntentContext, IntentOutcome, IntentRouter, normalize_phrase};
use crate::playback::{PlaybackQueue, PlaybackSegment, SentenceType};
use crate::recognition::{ActiveSession, RecognitionRouter};
use crate::transport::{DeviceSink, Inbound, Outbound};
use crate::Result;
use crate::wakeup::WakeupCache;

pub use lifecycle::{IdleTimer, OutputCounter};

/// Identity of the device behind a connection
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Stable device identifier
    pub device_id: String,
    /// Whether the device has been bound to an account
    pub bound: bool,
    /// Binding code to speak for unbound devices
    pub bind_code: Option<String>,
}

/// Backend set handed to each connection
#[derive(Clone)]
pub struct Backends {
    /// Speech recognizer
    pub recognizer: Arc<dyn Recognizer>,
    /// Language model
    pub llm: Arc<dyn LanguageModel>,
    /// Speech synthesizer
    pub tts: Arc<dyn SpeechSynthesizer>,
}

/// Connection state shared with the worker pool and the sender loop
pub struct ConnectionShared {
    /// Gateway-assigned session identifier
    pub session_id: String,
    /// Device identifier
    pub device_id: String,
    /// Ordered playback queue for this connection
    pub queue: PlaybackQueue,
    /// Outbound device transport
    pub sink: Arc<dyn DeviceSink>,
    /// Append-only dialogue history
    pub dialogue: Mutex<Dialogue>,
    reply_seq: AtomicU64,
    aborted_through: AtomicU64,
    finished_through: AtomicU64,
    speaking: AtomicBool,
    close_after_reply: AtomicBool,
    output: std::sync::Mutex<OutputCounter>,
    closed_tx: watch::Sender<bool>,
}

impl ConnectionShared {
    fn new(
        session_id: String,
        device_id: String,
        sink: Arc<dyn DeviceSink>,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Self {
            session_id,
            device_id,
            queue: PlaybackQueue::new(),
            sink,
            dialogue: Mutex::new(Dialogue::new()),
            reply_seq: AtomicU64::new(0),
            aborted_through: AtomicU64::new(0),
            finished_through: AtomicU64::new(0),
            speaking: AtomicBool::new(false),
            close_after_reply: AtomicBool::new(false),
            output: std::sync::Mutex::new(OutputCounter::new(today())),
            closed_tx,
        });
        (shared, closed_rx)
    }

    /// Allocate the generation for a newly submitted reply. Generations
    /// are strictly increasing, so an abort recorded before this call can
    /// never cancel the new reply.
    #[must_use]
    pub fn begin_reply(&self) -> u64 {
        self.reply_seq.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Abort every reply submitted so far. Later generations are
    /// untouched; an aborted worker stays aborted no matter what starts
    /// after it.
    pub fn abort_active_reply(&self) {
        let latest = self.reply_seq.load(Ordering::Acquire);
        self.aborted_through.fetch_max(latest, Ordering::AcqRel);
    }

    /// Whether the given reply generation has been aborted
    #[must_use]
    pub fn reply_aborted(&self, generation: u64) -> bool {
        generation <= self.aborted_through.load(Ordering::Acquire)
    }

    /// Record that a reply's worker has finished producing segments
    pub fn finish_reply(&self, generation: u64) {
        self.finished_through.fetch_max(generation, Ordering::AcqRel);
    }

    /// Whether a submitted reply is still being produced. One reply runs
    /// per connection at a time, so only the latest generation can be
    /// outstanding.
    #[must_use]
    pub fn reply_pending(&self) -> bool {
        let latest = self.reply_seq.load(Ordering::Acquire);
        latest > self.aborted_through.load(Ordering::Acquire)
            && latest > self.finished_through.load(Ordering::Acquire)
    }

    /// Whether a reply is currently playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Mark reply playback state
    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Release);
    }

    /// Whether the connection should close once the current reply ends
    #[must_use]
    pub fn close_after_reply(&self) -> bool {
        self.close_after_reply.load(Ordering::Acquire)
    }

    /// Mark the connection for closure after the current reply
    pub fn set_close_after_reply(&self, close: bool) {
        self.close_after_reply.store(close, Ordering::Release);
    }

    /// Request connection teardown
    pub fn request_close(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Whether teardown has been requested
    #[must_use]
    pub fn is_close_requested(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Count synthesized output toward the daily quota
    pub fn add_output_chars(&self, chars: u64) {
        self.output
            .lock()
            .expect("output counter lock poisoned")
            .add(chars, today());
    }

    /// Whether the daily cap is exhausted; zero disables the cap
    #[must_use]
    pub fn output_exceeded(&self, cap: u64) -> bool {
        self.output
            .lock()
            .expect("output counter lock poisoned")
            .is_exceeded(cap, today())
    }

    /// Accumulated output for today
    #[must_use]
    pub fn output_total(&self) -> u64 {
        self.output
            .lock()
            .expect("output counter lock poisoned")
            .total(today())
    }
}

fn today() -> chrono::NaiveDate {
    chrono::Utc::now().date_naive()
}

/// Per-connection conversation orchestrator
pub struct Connection {
    config: Arc<Config>,
    shared: Arc<ConnectionShared>,
    closed_rx: watch::Receiver<bool>,
    backends: Backends,
    sink: Arc<dyn DeviceSink>,
    vad: VadGate,
    router: RecognitionRouter,
    active: Option<ActiveSession>,
    silence_frames: u32,
    idle: IdleTimer,
    wake_suppress_until: Option<Instant>,
    wake_phrases: Vec<String>,
    device: DeviceInfo,
    intent: IntentRouter,
    wakeup: Arc<WakeupCache>,
    canned: Arc<CannedAudio>,
    workers: WorkerPool,
}

impl Connection {
    /// Assemble a connection for one device link
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        backends: Backends,
        sink: Arc<dyn DeviceSink>,
        wakeup: Arc<WakeupCache>,
        workers: WorkerPool,
        canned: Arc<CannedAudio>,
        device: DeviceInfo,
    ) -> Self {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (shared, closed_rx) =
            ConnectionShared::new(session_id, device.device_id.clone(), Arc::clone(&sink));

        let router = RecognitionRouter::new(
            Arc::clone(&backends.recognizer),
            config.recognition.close_grace(),
            config.recognition.buffer_cap_bytes,
        );
        let intent = IntentRouter::new(
            Arc::clone(&canned),
            &config.speech.exit_phrases,
            config.speech.quota_text.clone(),
            config.speech.farewell_text.clone(),
        );
        let wake_phrases = config
            .speech
            .wake_phrases
            .iter()
            .map(|p| normalize_phrase(p))
            .collect();

        Self {
            vad: VadGate::new(config.vad.energy_threshold),
            idle: IdleTimer::new(config.session.idle_timeout()),
            config,
            shared,
            closed_rx,
            backends,
            sink,
            router,
            active: None,
            silence_frames: 0,
            wake_suppress_until: None,
            wake_phrases,
            device,
            intent,
            wakeup,
            canned,
            workers,
        }
    }

    /// Shared state handle, for the gateway and tests
    #[must_use]
    pub fn shared(&self) -> Arc<ConnectionShared> {
        Arc::clone(&self.shared)
    }

    /// Run the connection to completion: hello handshake, inbound event
    /// loop, and the playback sender task.
    ///
    /// # Errors
    ///
    /// Returns an error if the device transport fails during the
    /// handshake; later transport failures tear the connection down
    /// gracefully instead.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<Inbound>) -> Result<()> {
        self.sink
            .send(Outbound::Hello {
                session_id: self.shared.session_id.clone(),
                audio_format: self.config.audio_format.clone(),
            })
            .await?;
        tracing::info!(
            session_id = %self.shared.session_id,
            device_id = %self.shared.device_id,
            mode = ?self.router.mode(),
            "connection established"
        );

        let sender = tokio::spawn(sender_loop(Arc::clone(&self.shared)));
        let mut closed_rx = self.closed_rx.clone();

        loop {
            if self.shared.is_close_requested() {
                break;
            }
            let deadline = self.next_deadline();
            let step = tokio::select! {
                message = inbound.recv() => match message {
                    Some(Inbound::Frame(payload)) => self.handle_frame(payload).await,
                    Some(Inbound::Abort) => self.handle_abort().await,
                    Some(Inbound::Close) | None => break,
                },
                _ = closed_rx.changed() => break,
                () = tokio::time::sleep_until(deadline) => self.on_tick().await,
            };
            // Handler errors mean the transport is gone; tear down
            // instead of bubbling past cleanup.
            if let Err(e) = step {
                tracing::warn!(error = %e, "connection handler failed, closing");
                break;
            }
        }

        if let Some(session) = self.active.take() {
            session.abandon();
        }
        self.shared.queue.close();
        self.shared.request_close();
        let _ = sender.await;
        tracing::info!(session_id = %self.shared.session_id, "connection closed");
        Ok(())
    }

    /// Earliest pending deadline: idle timeout, wake-suppression expiry,
    /// or a streaming-session grace window.
    fn next_deadline(&self) -> Instant {
        let mut deadline = self.idle.deadline();
        if let Some(until) = self.wake_suppress_until {
            deadline = deadline.min(until);
        }
        if let Some(ActiveSession::Streaming(session)) = &self.active
            && let Some(close) = session.close_deadline()
        {
            deadline = deadline.min(close);
        }
        deadline
    }

    /// Process one inbound audio frame
    async fn handle_frame(&mut self, payload: Vec<u8>) -> Result<()> {
        let frame = AudioFrame::new(payload);
        let decision = self.vad.evaluate(&frame);

        // Just woke up: the device is playing our own greeting, so the
        // gate self-mutes and buffered audio for the new utterance is
        // discarded.
        if decision == VadDecision::Voice && self.wake_suppressed() {
            if let Some(session) = self.active.take() {
                session.abandon();
            }
            self.silence_frames = 0;
            return Ok(());
        }

        match decision {
            VadDecision::Voice => self.handle_voice_frame(frame).await,
            VadDecision::Silence => self.handle_silence_frame(frame).await,
        }
    }

    async fn handle_voice_frame(&mut self, frame: AudioFrame) -> Result<()> {
        self.idle.touch();
        self.silence_frames = 0;

        if self.shared.is_speaking() {
            self.handle_abort().await?;
        }

        if self.active.is_none() {
            match self.router.open_session().await {
                Ok(session) => self.active = Some(session),
                Err(e) => {
                    tracing::error!(error = %e, "failed to open recognition session");
                    return Ok(());
                }
            }
        }

        match self.active.as_mut() {
            Some(ActiveSession::Streaming(session)) => session.push(&frame).await,
            Some(ActiveSession::Buffered(session)) => session.append(&frame),
            None => {}
        }
        Ok(())
    }

    async fn handle_silence_frame(&mut self, frame: AudioFrame) -> Result<()> {
        let stop_threshold = self.config.vad.stop_silence_frames;
        let mut finalize_streaming = false;
        let mut submit_buffered = false;

        match self.active.as_mut() {
            Some(ActiveSession::Streaming(session)) => {
                // Streaming backends see trailing silence too; frames
                // arriving while Closing drain into the channel.
                session.push(&frame).await;
                if !session.is_closing() {
                    self.silence_frames += 1;
                    if self.silence_frames >= stop_threshold {
                        session.request_close(Instant::now());
                    }
                }
                finalize_streaming = session.ready_to_finalize(Instant::now());
            }
            Some(ActiveSession::Buffered(_)) => {
                self.silence_frames += 1;
                submit_buffered = self.silence_frames >= stop_threshold;
            }
            None => {}
        }

        if finalize_streaming
            && let Some(ActiveSession::Streaming(session)) = self.active.take()
        {
            let text = session.finalize().await;
            self.on_final_transcript(text).await?;
        }
        if submit_buffered
            && let Some(ActiveSession::Buffered(session)) = self.active.take()
        {
            let text = session.submit(self.router.recognizer().as_ref()).await;
            self.on_final_transcript(text).await?;
        }
        Ok(())
    }

    /// Timer-driven work: wake-suppression expiry, streaming grace
    /// expiry, idle timeout.
    async fn on_tick(&mut self) -> Result<()> {
        let now = Instant::now();

        if let Some(until) = self.wake_suppress_until
            && now >= until
        {
            self.wake_suppress_until = None;
            tracing::debug!("vad suppression lifted");
        }

        let ready = matches!(
            &self.active,
            Some(ActiveSession::Streaming(session)) if session.ready_to_finalize(now)
        );
        if ready && let Some(ActiveSession::Streaming(session)) = self.active.take() {
            let text = session.finalize().await;
            self.on_final_transcript(text).await?;
        }

        if self.idle.is_expired(Instant::now()) {
            if self.shared.is_speaking() || self.shared.close_after_reply() {
                // Re-arm; closure is already in motion or a reply is
                // still playing.
                self.idle.touch();
            } else {
                self.handle_idle_timeout().await?;
            }
        }
        Ok(())
    }

    fn wake_suppressed(&self) -> bool {
        self.wake_suppress_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Act on a finalized transcript
    async fn on_final_transcript(&mut self, text: String) -> Result<()> {
        self.silence_frames = 0;
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::info!("empty final transcript, nothing to do");
            return Ok(());
        }
        tracing::info!(transcript = %text, "final transcript");

        if self.is_wake_phrase(&text) {
            return self.handle_wake_phrase(text).await;
        }

        let quota_exceeded = self
            .shared
            .output_exceeded(self.config.session.max_daily_output_chars);
        let outcome = self
            .intent
            .classify(
                IntentContext {
                    queue: &self.shared.queue,
                    sink: self.sink.as_ref(),
                    tts: self.backends.tts.as_ref(),
                    device_bound: self.device.bound,
                    bind_code: self.device.bind_code.as_deref(),
                    quota_exceeded,
                },
                &text,
            )
            .await?;
        if let IntentOutcome::Handled { close_after_reply } = outcome {
            if close_after_reply {
                self.shared.set_close_after_reply(true);
            }
            return Ok(());
        }

        if self.shared.is_speaking() {
            self.handle_abort().await?;
        }

        self.sink
            .send(Outbound::HeardText { text: text.clone() })
            .await?;
        self.workers.submit(
            ReplyContext {
                shared: Arc::clone(&self.shared),
                llm: Arc::clone(&self.backends.llm),
                tts: Arc::clone(&self.backends.tts),
                system_prompt: self.config.speech.system_prompt.clone(),
                fallback_text: self.config.speech.fallback_text.clone(),
                busy_text: self.config.speech.busy_text.clone(),
            },
            text,
        );
        Ok(())
    }

    fn is_wake_phrase(&self, text: &str) -> bool {
        let normalized = normalize_phrase(text);
        self.wake_phrases.iter().any(|p| *p == normalized)
    }

    /// Wake-phrase fast path: play the cached greeting immediately,
    /// bypassing the conversation worker entirely.
    async fn handle_wake_phrase(&mut self, text: String) -> Result<()> {
        tracing::info!(phrase = %text, "wake phrase matched, serving cached greeting");
        self.sink.send(Outbound::HeardText { text }).await?;

        let voice = self.config.speech.voice.clone();
        let cached = self.wakeup.lookup(&voice).await;
        let (audio, greeting, stale) = match &cached {
            Some(entry) => (
                entry.audio.clone(),
                entry.text.clone(),
                self.wakeup.is_stale(entry),
            ),
            None => (
                self.canned.wakeup_default.clone(),
                self.config.speech.default_greeting.clone(),
                true,
            ),
        };

        self.shared
            .queue
            .enqueue(PlaybackSegment::new(
                SentenceType::First,
                audio,
                Some(greeting.clone()),
            ))
            .await;
        self.shared.queue.enqueue(PlaybackSegment::end_marker()).await;
        self.shared
            .dialogue
            .lock()
            .await
            .push(Role::Assistant, greeting);

        // Self-mute while our own greeting plays back at the device.
        self.wake_suppress_until = Some(Instant::now() + self.config.vad.wake_suppress());

        if stale {
            self.wakeup.schedule_refresh(
                voice,
                Arc::clone(&self.backends.llm),
                Arc::clone(&self.backends.tts),
                self.config.speech.system_prompt.clone(),
            );
        }
        Ok(())
    }

    /// Abort the in-flight reply: flag the worker, flush pending
    /// segments, and tell the device to stop playback. With nothing
    /// playing or pending the abort is a no-op.
    async fn handle_abort(&mut self) -> Result<()> {
        if !self.shared.is_speaking()
            && !self.shared.reply_pending()
            && self.shared.queue.is_empty().await
        {
            tracing::debug!("abort with no reply in flight, ignoring");
            return Ok(());
        }
        self.shared.abort_active_reply();
        let dropped = self.shared.queue.flush().await;
        self.shared.set_speaking(false);
        tracing::info!(dropped_segments = dropped, "reply aborted");
        self.sink.send(Outbound::ReplyStopped).await?;
        Ok(())
    }

    /// Idle timeout: speak the scripted farewell, then close once it has
    /// played (not before).
    async fn handle_idle_timeout(&mut self) -> Result<()> {
        tracing::info!(
            idle_secs = self.config.session.idle_timeout_secs,
            "idle timeout, saying goodbye"
        );
        self.shared.set_close_after_reply(true);

        if let Some(session) = self.active.take() {
            session.abandon();
        }

        let farewell = self.config.speech.farewell_text.clone();
        let audio = match self.backends.tts.synthesize(&farewell).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "farewell synthesis failed, substituting silence");
                Vec::new()
            }
        };
        self.shared
            .queue
            .enqueue(PlaybackSegment::new(
                SentenceType::First,
                audio,
                Some(farewell.clone()),
            ))
            .await;
        self.shared.queue.enqueue(PlaybackSegment::end_marker()).await;
        self.shared
            .dialogue
            .lock()
            .await
            .push(Role::Assistant, farewell);
        self.idle.touch();
        Ok(())
    }
}

/// Drain the playback queue to the device in FIFO order. Marks the
/// speaking flag around each reply and performs the close-after-reply
/// handoff once a LAST segment has been delivered.
async fn sender_loop(shared: Arc<ConnectionShared>) {
    while let Some(segment) = shared.queue.next().await {
        if segment.sentence_type == SentenceType::First {
            shared.set_speaking(true);
        }
        let is_last = segment.sentence_type == SentenceType::Last;

        let sent = shared
            .sink
            .send(Outbound::Audio {
                marker: segment.sentence_type,
                payload: segment.audio,
                text: segment.text,
            })
            .await;
        if let Err(e) = sent {
            tracing::warn!(error = %e, "device transport gone, closing connection");
            shared.request_close();
            break;
        }

        if is_last {
            shared.set_speaking(false);
            if shared.close_after_reply() {
                let _ = shared.sink.send(Outbound::Goodbye).await;
                shared.queue.close();
                shared.request_close();
                break;
            }
        }
    }
}
