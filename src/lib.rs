//! Parley Gateway - voice conversation gateway for always-listening devices
//!
//! This library provides the core functionality for the Parley gateway:
//! - Per-frame voice-activity gating with wake-word self-muting
//! - Streaming and buffered speech recognition routing
//! - Deterministic intent handling (binding, quota, exit phrases)
//! - Bounded conversation worker pool over an LLM backend
//! - Sentence-ordered playback queue with abort
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Devices                          │
//! │        websocket: JSON control + binary audio        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Parley Gateway                        │
//! │  VAD │ Recognition │ Intent │ Workers │ Playback    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │          OpenAI-compatible backends                  │
//! │          STT  │  Chat  │  Speech                    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod backends;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod intent;
pub mod playback;
pub mod recognition;
pub mod transport;
pub mod wakeup;

pub use config::Config;
pub use connection::{Backends, Connection, DeviceInfo};
pub use error::{Error, Result};
pub use gateway::AppState;
