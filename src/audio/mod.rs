//! Audio ingestion primitives
//!
//! Frames arrive from the device transport as raw PCM payloads; the VAD
//! gate classifies them before they reach a recognition session. Canned
//! WAV assets for scripted replies live here too.

mod assets;
mod frame;
mod vad;

pub use assets::CannedAudio;
pub use frame::AudioFrame;
pub use vad::{VadDecision, VadGate};
