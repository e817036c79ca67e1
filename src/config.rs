//! Configuration for Parley gateway
//!
//! All knobs are loadable from a TOML file; every section has sensible
//! defaults so a bare `parley` invocation works against an
//! OpenAI-compatible backend configured via environment variables.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::Result;

/// Top-level gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Port the websocket endpoint listens on
    pub listen_port: u16,

    /// Audio format announced to devices in the hello handshake
    pub audio_format: String,

    /// Voice-activity gate settings
    pub vad: VadConfig,

    /// Recognition session settings
    pub recognition: RecognitionConfig,

    /// Session lifecycle settings (idle timeout, daily quota)
    pub session: SessionConfig,

    /// Spoken-content settings (wake phrases, scripted lines, voice)
    pub speech: SpeechConfig,

    /// Device binding settings
    pub binding: BindingConfig,

    /// Conversation worker pool settings
    pub workers: WorkerConfig,

    /// Backend adapter settings
    pub backends: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8765,
            audio_format: "pcm16-16000-mono".to_string(),
            vad: VadConfig::default(),
            recognition: RecognitionConfig::default(),
            session: SessionConfig::default(),
            speech: SpeechConfig::default(),
            binding: BindingConfig::default(),
            workers: WorkerConfig::default(),
            backends: BackendConfig::default(),
        }
    }
}

/// Voice-activity gate settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VadConfig {
    /// RMS energy above which a frame counts as voice
    pub energy_threshold: f32,

    /// Consecutive silence frames that end an utterance
    pub stop_silence_frames: u32,

    /// How long VAD stays suppressed after a wake-phrase reply is queued
    pub wake_suppress_ms: u64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            stop_silence_frames: 10,
            wake_suppress_ms: 1000,
        }
    }
}

impl VadConfig {
    /// Wake-word suppression window as a [`Duration`]
    #[must_use]
    pub const fn wake_suppress(&self) -> Duration {
        Duration::from_millis(self.wake_suppress_ms)
    }
}

/// Recognition session settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecognitionConfig {
    /// Grace window for frames that arrive after a close was requested.
    /// Empirically tuned against device latency; deliberately not a
    /// hard-coded constant.
    pub close_grace_ms: u64,

    /// Cap on the buffered-session audio buffer, in bytes
    pub buffer_cap_bytes: usize,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            close_grace_ms: 300,
            // ~30s of 16kHz mono s16le
            buffer_cap_bytes: 960_000,
        }
    }
}

impl RecognitionConfig {
    /// Close grace window as a [`Duration`]
    #[must_use]
    pub const fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Seconds of no voice activity before the farewell fires
    pub idle_timeout_secs: u64,

    /// Daily cap on synthesized output, in characters; 0 disables the cap
    pub max_daily_output_chars: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
            max_daily_output_chars: 0,
        }
    }
}

impl SessionConfig {
    /// Idle timeout as a [`Duration`]
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Spoken-content settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeechConfig {
    /// Wake phrases matched exactly after normalization
    pub wake_phrases: Vec<String>,

    /// Exit phrases handled deterministically by the intent router
    pub exit_phrases: Vec<String>,

    /// Scripted farewell spoken on idle timeout or exit phrase
    pub farewell_text: String,

    /// Fallback line spoken when the language model fails
    pub fallback_text: String,

    /// Line spoken when the worker pool is saturated
    pub busy_text: String,

    /// Apology spoken when the daily output quota is exhausted
    pub quota_text: String,

    /// Greeting text served before the wakeup cache is first populated
    pub default_greeting: String,

    /// System prompt handed to the language model
    pub system_prompt: String,

    /// Voice identifier used for synthesis and wakeup-cache keying
    pub voice: String,

    /// Seconds after which a cached wakeup reply is refreshed
    pub wakeup_refresh_secs: u64,

    /// Directory holding canned WAV clips (bind-code digits, quota apology)
    pub assets_dir: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            wake_phrases: vec![
                "hello".to_string(),
                "hello there".to_string(),
                "hey hello".to_string(),
                "hi".to_string(),
            ],
            exit_phrases: vec!["goodbye".to_string(), "bye bye".to_string()],
            farewell_text: "Time flies. Talk to you soon, goodbye!".to_string(),
            fallback_text: "Sorry, I had trouble thinking just now. Could you say that again?"
                .to_string(),
            busy_text: "I'm juggling a few things right now, give me a moment and ask again."
                .to_string(),
            quota_text:
                "Sorry, I'm a bit worn out for today. Let's pick this up again tomorrow, deal?"
                    .to_string(),
            default_greeting: "Hello there! So glad you called for me. What are we up to today?"
                .to_string(),
            system_prompt: "You are a warm, concise voice assistant living in a small device. \
                            Keep replies short enough to speak aloud."
                .to_string(),
            voice: "default".to_string(),
            wakeup_refresh_secs: 600,
            assets_dir: None,
        }
    }
}

impl SpeechConfig {
    /// Wakeup cache refresh interval as a [`Duration`]
    #[must_use]
    pub const fn wakeup_refresh(&self) -> Duration {
        Duration::from_secs(self.wakeup_refresh_secs)
    }
}

/// Device binding settings
///
/// Provisioning itself is an external concern; the gateway only needs to
/// know whether unbound devices must be walked through a binding code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BindingConfig {
    /// When true, connections start unbound and the intent router speaks
    /// the binding code instead of chatting
    pub required: bool,

    /// Six-digit binding code shown in the control panel
    pub code: Option<String>,
}

/// Conversation worker pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Maximum concurrent language-model replies across all connections
    pub pool_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { pool_size: 4 }
    }
}

/// Backend adapter settings (OpenAI-compatible endpoints)
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,

    /// Recognizer operating mode: "stream", "batch", or "local"
    pub recognizer_mode: String,

    /// Transcription model identifier
    pub stt_model: String,

    /// Chat model identifier
    pub chat_model: String,

    /// Speech synthesis model identifier
    pub tts_model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            recognizer_mode: "batch".to_string(),
            stt_model: "whisper-1".to_string(),
            chat_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        Ok(config)
    }
}
