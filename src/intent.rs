//! Deterministic intent routing
//!
//! Runs on every finalized transcript before any language-model call.
//! Device-not-bound and quota-exceeded flows short-circuit here so no
//! model cost is ever incurred for them; configured exit phrases are
//! handled the same way. Everything else passes through to the
//! conversation worker.

use std::sync::Arc;

use crate::audio::CannedAudio;
use crate::backends::SpeechSynthesizer;
use crate::playback::{PlaybackQueue, PlaybackSegment, SentenceType};
use crate::transport::{DeviceSink, Outbound};
use crate::Result;

/// Decision produced by [`IntentRouter::classify`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentOutcome {
    /// The transcript was handled locally; the pipeline stops here
    Handled {
        /// Whether the connection should close once the reply finishes
        close_after_reply: bool,
    },
    /// Continue to the conversation worker
    PassThrough,
}

/// Connection-scoped inputs for one classification
pub struct IntentContext<'a> {
    /// Playback queue of the connection
    pub queue: &'a PlaybackQueue,
    /// Outbound device sink
    pub sink: &'a dyn DeviceSink,
    /// Synthesizer for scripted lines without canned clips
    pub tts: &'a dyn SpeechSynthesizer,
    /// Whether the device is bound
    pub device_bound: bool,
    /// Binding code for unbound devices, when configured
    pub bind_code: Option<&'a str>,
    /// Whether the daily output quota is already exhausted
    pub quota_exceeded: bool,
}

/// Classifies transcripts into deterministic local flows
pub struct IntentRouter {
    canned: Arc<CannedAudio>,
    exit_phrases: Vec<String>,
    quota_text: String,
    farewell_text: String,
}

impl IntentRouter {
    /// Build a router; exit phrases are normalized once here
    #[must_use]
    pub fn new(
        canned: Arc<CannedAudio>,
        exit_phrases: &[String],
        quota_text: String,
        farewell_text: String,
    ) -> Self {
        Self {
            canned,
            exit_phrases: exit_phrases.iter().map(|p| normalize_phrase(p)).collect(),
            quota_text,
            farewell_text,
        }
    }

    /// Classify a finalized transcript. Ordering is mandatory: binding
    /// and quota checks run before anything that could reach the model.
    ///
    /// # Errors
    ///
    /// Returns an error only if the device transport is gone.
    pub async fn classify(&self, cx: IntentContext<'_>, transcript: &str) -> Result<IntentOutcome> {
        if !cx.device_bound {
            self.speak_bind_code(&cx).await?;
            return Ok(IntentOutcome::Handled {
                close_after_reply: false,
            });
        }

        if cx.quota_exceeded {
            self.speak_quota_apology(&cx).await?;
            return Ok(IntentOutcome::Handled {
                close_after_reply: true,
            });
        }

        if self.is_exit_phrase(transcript) {
            self.speak_farewell(&cx).await?;
            return Ok(IntentOutcome::Handled {
                close_after_reply: true,
            });
        }

        Ok(IntentOutcome::PassThrough)
    }

    /// Whether the transcript matches a configured exit phrase
    #[must_use]
    pub fn is_exit_phrase(&self, transcript: &str) -> bool {
        let normalized = normalize_phrase(transcript);
        self.exit_phrases.iter().any(|p| *p == normalized)
    }

    /// Walk the user through the binding code, digit by digit, from
    /// pre-rendered clips.
    async fn speak_bind_code(&self, cx: &IntentContext<'_>) -> Result<()> {
        let Some(code) = cx.bind_code else {
            let text =
                "No binding code is configured for this device. Please check the gateway setup."
                    .to_string();
            tracing::error!("unbound device with no binding code configured");
            cx.sink.send(Outbound::HeardText { text: text.clone() }).await?;
            cx.queue
                .enqueue(PlaybackSegment::new(
                    SentenceType::Last,
                    Vec::new(),
                    Some(text),
                ))
                .await;
            return Ok(());
        };

        if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
            tracing::error!(code = %code, "invalid binding code format");
            let text = "Binding code format error, please check the configuration.".to_string();
            cx.sink.send(Outbound::HeardText { text: text.clone() }).await?;
            cx.queue
                .enqueue(PlaybackSegment::new(
                    SentenceType::Last,
                    Vec::new(),
                    Some(text),
                ))
                .await;
            return Ok(());
        }

        let text = format!("Please log into the control panel and enter {code} to bind the device.");
        cx.sink.send(Outbound::HeardText { text: text.clone() }).await?;
        cx.queue
            .enqueue(PlaybackSegment::new(
                SentenceType::First,
                self.canned.bind_intro.clone(),
                Some(text),
            ))
            .await;

        for digit in code.chars() {
            let Some(clip) = self.canned.digit(digit) else {
                continue;
            };
            cx.queue
                .enqueue(PlaybackSegment::new(
                    SentenceType::Middle,
                    clip.to_vec(),
                    None,
                ))
                .await;
        }
        cx.queue.enqueue(PlaybackSegment::end_marker()).await;
        Ok(())
    }

    /// Speak the fixed quota apology; the connection closes afterwards
    async fn speak_quota_apology(&self, cx: &IntentContext<'_>) -> Result<()> {
        tracing::info!("daily output quota exhausted");
        cx.sink
            .send(Outbound::HeardText {
                text: self.quota_text.clone(),
            })
            .await?;
        cx.queue
            .enqueue(PlaybackSegment::new(
                SentenceType::Last,
                self.canned.quota.clone(),
                Some(self.quota_text.clone()),
            ))
            .await;
        Ok(())
    }

    /// Speak the farewell for an exit phrase
    async fn speak_farewell(&self, cx: &IntentContext<'_>) -> Result<()> {
        tracing::info!("exit phrase matched");
        cx.sink
            .send(Outbound::HeardText {
                text: self.farewell_text.clone(),
            })
            .await?;
        let audio = match cx.tts.synthesize(&self.farewell_text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "farewell synthesis failed, substituting silence");
                Vec::new()
            }
        };
        cx.queue
            .enqueue(PlaybackSegment::new(
                SentenceType::First,
                audio,
                Some(self.farewell_text.clone()),
            ))
            .await;
        cx.queue.enqueue(PlaybackSegment::end_marker()).await;
        Ok(())
    }
}

/// Normalize a phrase for exact matching: lowercase, punctuation
/// stripped, whitespace collapsed to single spaces.
#[must_use]
pub fn normalize_phrase(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in c.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    out
}
