//! Shared test utilities: mock backends and a connection harness
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use parley_gateway::audio::CannedAudio;
use parley_gateway::backends::{
    LanguageModel, Recognizer, RecognizerMode, RecognizerStream, ReplyChunk, SpeechSynthesizer,
};
use parley_gateway::connection::ConnectionShared;
use parley_gateway::conversation::{DialogueMessage, WorkerPool};
use parley_gateway::playback::SentenceType;
use parley_gateway::transport::{DeviceSink, Inbound, Outbound};
use parley_gateway::wakeup::WakeupCache;
use parley_gateway::{Backends, Config, Connection, DeviceInfo, Error};

/// One 10ms frame of loud speech (constant 8000 amplitude, s16le)
#[must_use]
pub fn voice_frame() -> Vec<u8> {
    [0x40, 0x1F].repeat(160)
}

/// One 10ms frame of digital silence
#[must_use]
pub fn silence_frame() -> Vec<u8> {
    vec![0u8; 320]
}

/// Yield repeatedly so spawned tasks make progress without advancing time
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

/// Recognizer mock: records traffic, serves scripted transcripts
pub struct MockRecognizer {
    mode: RecognizerMode,
    transcripts: std::sync::Mutex<VecDeque<String>>,
    streams_opened: AtomicUsize,
    streams_closed: Arc<AtomicUsize>,
    batch_calls: AtomicUsize,
    chunks: Arc<std::sync::Mutex<Vec<usize>>>,
}

impl MockRecognizer {
    #[must_use]
    pub fn new(mode: RecognizerMode) -> Self {
        Self {
            mode,
            transcripts: std::sync::Mutex::new(VecDeque::new()),
            streams_opened: AtomicUsize::new(0),
            streams_closed: Arc::new(AtomicUsize::new(0)),
            batch_calls: AtomicUsize::new(0),
            chunks: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Queue the transcript the next finalized utterance will produce
    pub fn push_transcript(&self, text: &str) {
        self.transcripts.lock().unwrap().push_back(text.to_string());
    }

    fn next_transcript(&self) -> String {
        self.transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closed(&self) -> usize {
        self.streams_closed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }
}

struct MockStream {
    transcript: String,
    chunks: Arc<std::sync::Mutex<Vec<usize>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl RecognizerStream for MockStream {
    async fn push_chunk(&mut self, chunk: &[u8]) -> parley_gateway::Result<Option<String>> {
        self.chunks.lock().unwrap().push(chunk.len());
        Ok(None)
    }

    async fn close(self: Box<Self>) -> parley_gateway::Result<String> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    fn mode(&self) -> RecognizerMode {
        self.mode
    }

    async fn open_stream(&self) -> parley_gateway::Result<Box<dyn RecognizerStream>> {
        self.streams_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            transcript: self.next_transcript(),
            chunks: Arc::clone(&self.chunks),
            closed: Arc::clone(&self.streams_closed),
        }))
    }

    async fn transcribe(&self, _audio: &[u8]) -> parley_gateway::Result<String> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.next_transcript())
    }
}

/// Language-model mock fed by test-controlled reply channels
pub struct MockLlm {
    replies: std::sync::Mutex<VecDeque<mpsc::Receiver<ReplyChunk>>>,
    stream_calls: AtomicUsize,
    reply_text: String,
}

impl MockLlm {
    #[must_use]
    pub fn new() -> Self {
        Self {
            replies: std::sync::Mutex::new(VecDeque::new()),
            stream_calls: AtomicUsize::new(0),
            reply_text: "A short scripted greeting.".to_string(),
        }
    }

    /// Queue a complete scripted reply (fragments then end-of-stream)
    pub fn push_scripted(&self, fragments: &[&str]) {
        let (tx, rx) = mpsc::channel(64);
        for fragment in fragments {
            tx.try_send(ReplyChunk::Fragment((*fragment).to_string()))
                .expect("scripted reply overflow");
        }
        tx.try_send(ReplyChunk::End).expect("scripted reply overflow");
        self.replies.lock().unwrap().push_back(rx);
    }

    /// Queue a reply the test drives fragment by fragment
    #[must_use]
    pub fn push_channel(&self) -> mpsc::Sender<ReplyChunk> {
        let (tx, rx) = mpsc::channel(64);
        self.replies.lock().unwrap().push_back(rx);
        tx
    }

    /// Number of streamed replies started
    #[must_use]
    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for MockLlm {
    async fn stream_reply(
        &self,
        _system_prompt: &str,
        _history: &[DialogueMessage],
    ) -> parley_gateway::Result<mpsc::Receiver<ReplyChunk>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Model("no scripted reply queued".to_string()))
    }

    async fn reply(&self, _system_prompt: &str, _user_text: &str) -> parley_gateway::Result<String> {
        Ok(self.reply_text.clone())
    }
}

/// Synthesizer mock: audio is the text prefixed with "pcm:"
pub struct MockTts {
    pub fail: AtomicBool,
}

impl MockTts {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for MockTts {
    async fn synthesize(&self, text: &str) -> parley_gateway::Result<Vec<u8>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Synthesis("scripted failure".to_string()));
        }
        Ok(format!("pcm:{text}").into_bytes())
    }
}

/// Device sink mock recording everything the gateway sends
pub struct MockSink {
    sent: std::sync::Mutex<Vec<Outbound>>,
    pub fail: AtomicBool,
}

impl MockSink {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// Snapshot of everything sent so far
    #[must_use]
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    /// Sentence markers of all audio segments, in send order
    #[must_use]
    pub fn audio_markers(&self) -> Vec<SentenceType> {
        self.sent()
            .iter()
            .filter_map(|m| match m {
                Outbound::Audio { marker, .. } => Some(*marker),
                _ => None,
            })
            .collect()
    }

    /// Texts attached to audio segments, in send order
    #[must_use]
    pub fn audio_texts(&self) -> Vec<Option<String>> {
        self.sent()
            .iter()
            .filter_map(|m| match m {
                Outbound::Audio { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Transcript echoes, in send order
    #[must_use]
    pub fn heard_texts(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|m| match m {
                Outbound::HeardText { text } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn reply_stopped_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::ReplyStopped))
            .count()
    }

    #[must_use]
    pub fn goodbye_sent(&self) -> bool {
        self.sent().iter().any(|m| matches!(m, Outbound::Goodbye))
    }
}

#[async_trait]
impl DeviceSink for MockSink {
    async fn send(&self, message: Outbound) -> parley_gateway::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted transport failure".to_string()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// A running connection plus handles to everything around it
pub struct Harness {
    pub tx: mpsc::Sender<Inbound>,
    pub shared: Arc<ConnectionShared>,
    pub sink: Arc<MockSink>,
    pub recognizer: Arc<MockRecognizer>,
    pub llm: Arc<MockLlm>,
    pub tts: Arc<MockTts>,
    pub task: JoinHandle<parley_gateway::Result<()>>,
}

impl Harness {
    /// Spawn a connection event loop over mock backends
    #[must_use]
    pub fn spawn(config: Config, recognizer: Arc<MockRecognizer>) -> Self {
        let config = Arc::new(config);
        let llm = Arc::new(MockLlm::new());
        let tts = Arc::new(MockTts::new());
        let sink = Arc::new(MockSink::new());

        let backends = Backends {
            recognizer: Arc::clone(&recognizer) as Arc<dyn Recognizer>,
            llm: Arc::clone(&llm) as Arc<dyn LanguageModel>,
            tts: Arc::clone(&tts) as Arc<dyn SpeechSynthesizer>,
        };
        let wakeup = Arc::new(WakeupCache::new(
            config.speech.wakeup_refresh(),
            config.speech.wake_phrases.clone(),
        ));
        let workers = WorkerPool::new(config.workers.pool_size);
        let device = DeviceInfo {
            device_id: "test-device".to_string(),
            bound: !config.binding.required,
            bind_code: config.binding.code.clone(),
        };

        let connection = Connection::new(
            config,
            backends,
            Arc::clone(&sink) as Arc<dyn DeviceSink>,
            wakeup,
            workers,
            Arc::new(CannedAudio::silent()),
            device,
        );
        let shared = connection.shared();
        let (tx, rx) = mpsc::channel(64);
        let task = tokio::spawn(connection.run(rx));

        Self {
            tx,
            shared,
            sink,
            recognizer,
            llm,
            tts,
            task,
        }
    }

    /// Send one inbound audio frame
    pub async fn frame(&self, payload: Vec<u8>) {
        self.tx
            .send(Inbound::Frame(payload))
            .await
            .expect("connection gone");
    }

    /// Send a run of voice frames followed by a run of silence frames
    pub async fn speak(&self, voice: usize, silence: usize) {
        for _ in 0..voice {
            self.frame(voice_frame()).await;
        }
        for _ in 0..silence {
            self.frame(silence_frame()).await;
        }
        settle().await;
    }
}
