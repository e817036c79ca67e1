//! Inbound audio frames

use std::time::Instant;

/// One frame of device audio: raw little-endian 16-bit mono PCM plus a
/// monotonic arrival timestamp. Frames are ephemeral; they are consumed
/// by the VAD gate and the active recognition session and never persisted.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw PCM payload (s16le, mono)
    pub payload: Vec<u8>,

    /// Monotonic arrival time
    pub received_at: Instant,
}

impl AudioFrame {
    /// Wrap a raw payload received from the transport
    #[must_use]
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            received_at: Instant::now(),
        }
    }

    /// A frame is well formed when it is non-empty and holds whole
    /// 16-bit samples. Anything else is dropped upstream.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.payload.is_empty() && self.payload.len() % 2 == 0
    }

    /// Iterate the payload as signed 16-bit samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.payload
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Payload length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
