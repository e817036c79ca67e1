//! OpenAI-compatible backend adapters
//!
//! Thin HTTP bindings for the three external collaborators: batch
//! transcription (multipart upload), streaming chat completions (SSE),
//! and speech synthesis. Vendor semantics beyond these calls are out of
//! scope.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::backends::{
    LanguageModel, Recognizer, RecognizerMode, ReplyChunk, SpeechSynthesizer,
};
use crate::conversation::DialogueMessage;
use crate::{Error, Result};

/// Batch recognizer backed by an OpenAI-compatible transcription endpoint
pub struct OpenAiRecognizer {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    mode: RecognizerMode,
}

impl OpenAiRecognizer {
    /// Create a recognizer adapter
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty or the mode is `Stream`
    /// (this adapter only implements the batch interface).
    pub fn new(
        api_key: String,
        base_url: String,
        model: String,
        mode: RecognizerMode,
    ) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "API key required for transcription".to_string(),
            ));
        }
        if mode == RecognizerMode::Stream {
            return Err(Error::Config(
                "the OpenAI adapter only supports batch transcription".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            mode,
        })
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[async_trait]
impl Recognizer for OpenAiRecognizer {
    fn mode(&self) -> RecognizerMode {
        self.mode
    }

    async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting batch transcription");

        let wav = pcm_to_wav(audio);
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("utterance.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

/// Wrap raw s16le mono PCM in a minimal WAV container (16 kHz)
fn pcm_to_wav(pcm: &[u8]) -> Vec<u8> {
    const SAMPLE_RATE: u32 = 16000;
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);
    let byte_rate = SAMPLE_RATE * 2;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVEfmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

/// Chat backend speaking the OpenAI streaming chat-completions protocol
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    /// Create a chat adapter
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty.
    pub fn new(api_key: String, base_url: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for chat".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        })
    }

    fn build_messages(system_prompt: &str, history: &[DialogueMessage]) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system_prompt.to_string(),
            });
        }
        for msg in history {
            messages.push(ChatMessage {
                role: msg.role.as_str().to_string(),
                content: msg.content.clone(),
            });
        }
        messages
    }
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatStreamEvent {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Extract content fragments from one SSE `data:` payload
fn parse_sse_data(data: &str) -> Option<String> {
    if data == "[DONE]" {
        return None;
    }
    let event: ChatStreamEvent = serde_json::from_str(data).ok()?;
    event.choices.into_iter().next()?.delta.content
}

#[async_trait]
impl LanguageModel for OpenAiChat {
    async fn stream_reply(
        &self,
        system_prompt: &str,
        history: &[DialogueMessage],
    ) -> Result<mpsc::Receiver<ReplyChunk>> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: Self::build_messages(system_prompt, history),
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("chat API error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            'outer: while let Some(chunk) = stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "chat stream interrupted");
                        break;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        break 'outer;
                    }
                    if let Some(fragment) = parse_sse_data(data)
                        && tx.send(ReplyChunk::Fragment(fragment)).await.is_err()
                    {
                        // Consumer gone (aborted reply); stop reading.
                        break 'outer;
                    }
                }
            }
            let _ = tx.send(ReplyChunk::End).await;
        });

        Ok(rx)
    }

    async fn reply(&self, system_prompt: &str, user_text: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system_prompt.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_text.to_string(),
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("chat API error {status}: {body}")));
        }

        let result: ChatResponse = response.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Model("empty chat completion".to_string()))
    }
}

/// Synthesizer backed by an OpenAI-compatible speech endpoint
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
}

impl OpenAiSpeech {
    /// Create a synthesis adapter
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is empty.
    pub fn new(api_key: String, base_url: String, model: String, voice: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("API key required for synthesis".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            voice,
        })
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), "synthesizing speech");

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&SpeechRequest {
                model: &self.model,
                input: text,
                voice: &self.voice,
                response_format: "pcm",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "speech API error {status}: {body}"
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}
