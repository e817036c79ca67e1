//! Device transport boundary
//!
//! The gateway core speaks to devices through [`DeviceSink`]; the
//! websocket binding in `gateway.rs` is the only concrete implementation.
//! Framing details beyond segment boundaries are out of scope here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::playback::SentenceType;

/// Messages the gateway sends to a device
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Handshake sent once on connect
    Hello {
        /// Session identifier assigned by the gateway
        session_id: String,
        /// Negotiated audio format
        audio_format: String,
    },

    /// Text of what was heard, for UI feedback
    HeardText {
        /// Final transcript being acted on
        text: String,
    },

    /// One synthesized audio segment of a reply
    Audio {
        /// Position within the reply
        marker: SentenceType,
        /// Raw audio payload; may be empty for bare end markers
        payload: Vec<u8>,
        /// Source text for the segment, when known
        text: Option<String>,
    },

    /// The in-flight reply was aborted; the device should stop playback
    ReplyStopped,

    /// The gateway is closing the session
    Goodbye,
}

/// Messages a device sends to the gateway
#[derive(Debug)]
pub enum Inbound {
    /// Raw audio frame payload
    Frame(Vec<u8>),
    /// Device-initiated abort of the current reply
    Abort,
    /// Device is going away
    Close,
}

/// Outbound half of a device connection
#[async_trait]
pub trait DeviceSink: Send + Sync {
    /// Deliver one message to the device
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is gone; callers treat this as
    /// connection teardown, not as a recoverable fault.
    async fn send(&self, message: Outbound) -> Result<()>;
}

/// JSON control frame for the websocket binding. Audio payloads travel
/// as a separate binary frame immediately after their control frame.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Handshake
    Hello {
        /// Session identifier
        session_id: String,
        /// Negotiated audio format
        audio_format: String,
    },
    /// Recognized-text echo
    HeardText {
        /// Final transcript
        text: String,
    },
    /// Announces the binary audio frame that follows
    Segment {
        /// Position within the reply
        marker: SentenceType,
        /// Source text, when known
        text: Option<String>,
    },
    /// Stop playback of the current reply
    Stop,
    /// Session closing
    Goodbye,
    /// Device-initiated abort (inbound)
    Abort,
}
