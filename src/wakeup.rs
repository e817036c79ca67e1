//! Wakeup response cache
//!
//! Wake-phrase replies must feel instant, so each voice keeps one
//! precomputed greeting clip that plays with no model round-trip. Stale
//! entries are regenerated in the background (LLM line + synthesis);
//! refreshes across all voices share one lock so at most one
//! regeneration runs at a time. Reads never block on a refresh, and a
//! failed refresh silently keeps serving the old entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

use crate::backends::{LanguageModel, SpeechSynthesizer};
use crate::{Error, Result};

/// One cached greeting, exactly one live entry per voice identifier
#[derive(Debug, Clone)]
pub struct WakeupResponse {
    /// Voice identifier this entry was synthesized with
    pub voice: String,
    /// Pre-rendered greeting audio
    pub audio: Vec<u8>,
    /// The greeting text, for dialogue history and UI feedback
    pub text: String,
    /// When this entry was generated
    pub generated_at: Instant,
}

/// Shared greeting cache keyed by voice identifier
pub struct WakeupCache {
    entries: RwLock<HashMap<String, Arc<WakeupResponse>>>,
    // Sole cross-connection shared mutable resource: serializes
    // regenerations across all voices.
    refresh_lock: Mutex<()>,
    refresh_after: Duration,
    wake_phrases: Vec<String>,
}

impl WakeupCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(refresh_after: Duration, wake_phrases: Vec<String>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
            refresh_after,
            wake_phrases,
        }
    }

    /// Non-blocking read of the cached greeting for a voice
    pub async fn lookup(&self, voice: &str) -> Option<Arc<WakeupResponse>> {
        self.entries.read().await.get(voice).cloned()
    }

    /// Install or replace the entry for a voice
    pub async fn insert(&self, response: WakeupResponse) {
        let voice = response.voice.clone();
        self.entries
            .write()
            .await
            .insert(voice, Arc::new(response));
    }

    /// Whether an entry is old enough to refresh
    #[must_use]
    pub fn is_stale(&self, response: &WakeupResponse) -> bool {
        response.generated_at.elapsed() > self.refresh_after
    }

    /// Schedule a background regeneration for a voice. Skips silently if
    /// another refresh is already running anywhere in the process.
    pub fn schedule_refresh(
        self: &Arc<Self>,
        voice: String,
        llm: Arc<dyn LanguageModel>,
        tts: Arc<dyn SpeechSynthesizer>,
        system_prompt: String,
    ) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_guard) = cache.refresh_lock.try_lock() else {
                tracing::debug!("wakeup refresh already in flight, skipping");
                return;
            };
            if let Err(e) = cache
                .refresh(&voice, llm.as_ref(), tts.as_ref(), &system_prompt)
                .await
            {
                // Old entry keeps serving; never surfaced to the user.
                tracing::warn!(voice = %voice, error = %e, "wakeup refresh failed");
            }
        });
    }

    /// Regenerate the greeting for one voice
    async fn refresh(
        &self,
        voice: &str,
        llm: &dyn LanguageModel,
        tts: &dyn SpeechSynthesizer,
        system_prompt: &str,
    ) -> Result<()> {
        let phrase = {
            use rand::seq::SliceRandom;
            self.wake_phrases
                .choose(&mut rand::thread_rng())
                .cloned()
                .unwrap_or_else(|| "hello".to_string())
        };

        let question = format!(
            "The user just greeted you with \"{phrase}\". Reply with a 20-30 word \
             greeting that matches your configured character. Do not explain, do not \
             use emoji; return only the reply itself."
        );

        let text = llm.reply(system_prompt, &question).await?;
        if text.trim().is_empty() {
            return Err(Error::Model("empty wakeup greeting".to_string()));
        }

        let audio = tts.synthesize(&text).await?;
        tracing::info!(voice = %voice, chars = text.len(), "wakeup greeting refreshed");
        self.insert(WakeupResponse {
            voice: voice.to_string(),
            audio,
            text,
            generated_at: Instant::now(),
        })
        .await;
        Ok(())
    }
}
