//! Voice-activity gate
//!
//! Energy-based per-frame classification. The gate itself is stateless
//! per call; the wake-word suppression window is tracked by the owning
//! connection, which forces frames to silence while it is active.

use crate::audio::AudioFrame;

/// Per-frame classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Human speech is present
    Voice,
    /// No speech in this frame
    Silence,
}

/// Classifies incoming frames as voice or silence
pub struct VadGate {
    energy_threshold: f32,
    dropped_frames: u64,
}

impl VadGate {
    /// Create a gate with the given RMS energy threshold
    #[must_use]
    pub const fn new(energy_threshold: f32) -> Self {
        Self {
            energy_threshold,
            dropped_frames: 0,
        }
    }

    /// Classify one frame.
    ///
    /// Malformed frames are not fatal: they count as silence, increment
    /// the drop counter, and log a warning.
    pub fn evaluate(&mut self, frame: &AudioFrame) -> VadDecision {
        if !frame.is_well_formed() {
            self.dropped_frames += 1;
            tracing::warn!(
                bytes = frame.len(),
                dropped_total = self.dropped_frames,
                "dropping malformed audio frame"
            );
            return VadDecision::Silence;
        }

        let energy = rms_energy(frame);
        if energy > self.energy_threshold {
            VadDecision::Voice
        } else {
            VadDecision::Silence
        }
    }

    /// Number of malformed frames dropped so far
    #[must_use]
    pub const fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

/// RMS energy of a frame, normalized to [0, 1]
#[allow(clippy::cast_precision_loss)]
fn rms_energy(frame: &AudioFrame) -> f32 {
    let mut sum_squares = 0.0f32;
    let mut count = 0usize;
    for sample in frame.samples() {
        let normalized = f32::from(sample) / f32::from(i16::MAX);
        sum_squares += normalized * normalized;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }
    (sum_squares / count as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_of(samples: &[i16]) -> AudioFrame {
        let mut payload = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            payload.extend_from_slice(&s.to_le_bytes());
        }
        AudioFrame::new(payload)
    }

    #[test]
    fn silence_stays_below_threshold() {
        let mut gate = VadGate::new(0.03);
        assert_eq!(gate.evaluate(&frame_of(&[0; 160])), VadDecision::Silence);
    }

    #[test]
    fn loud_frame_is_voice() {
        let mut gate = VadGate::new(0.03);
        let loud: Vec<i16> = (0..160)
            .map(|i| if i % 2 == 0 { 12000 } else { -12000 })
            .collect();
        assert_eq!(gate.evaluate(&frame_of(&loud)), VadDecision::Voice);
    }

    #[test]
    fn malformed_frames_count_as_silence_and_are_counted() {
        let mut gate = VadGate::new(0.03);
        let odd = AudioFrame::new(vec![1, 2, 3]);
        assert_eq!(gate.evaluate(&odd), VadDecision::Silence);
        assert_eq!(gate.evaluate(&odd), VadDecision::Silence);
        assert_eq!(gate.dropped_frames(), 2);
    }
}
