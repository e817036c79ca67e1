//! Canned audio assets
//!
//! Scripted flows (device binding, quota apology) play pre-rendered WAV
//! clips rather than synthesizing on the fly. Clips are decoded to raw
//! PCM once at startup; a missing or unreadable clip degrades to silence
//! with a warning, never to a startup failure.

use std::path::Path;

use crate::{Error, Result};

/// Pre-rendered clips used by the intent router and wakeup cache
pub struct CannedAudio {
    /// Announcement played before the binding-code digits
    pub bind_intro: Vec<u8>,

    /// One clip per digit 0-9
    pub digits: [Vec<u8>; 10],

    /// Apology played when the daily quota is exhausted
    pub quota: Vec<u8>,

    /// Greeting served before the wakeup cache is first populated
    pub wakeup_default: Vec<u8>,
}

impl CannedAudio {
    /// Load all clips from an assets directory.
    ///
    /// Expected layout: `bind_intro.wav`, `digits/0.wav` .. `digits/9.wav`,
    /// `quota.wav`, `wakeup_default.wav`. Missing clips become silence.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let digits = std::array::from_fn(|i| {
            clip_or_silence(&dir.join("digits").join(format!("{i}.wav")))
        });
        Self {
            bind_intro: clip_or_silence(&dir.join("bind_intro.wav")),
            digits,
            quota: clip_or_silence(&dir.join("quota.wav")),
            wakeup_default: clip_or_silence(&dir.join("wakeup_default.wav")),
        }
    }

    /// All-silence asset set, used when no assets directory is configured
    #[must_use]
    pub fn silent() -> Self {
        Self {
            bind_intro: Vec::new(),
            digits: std::array::from_fn(|_| Vec::new()),
            quota: Vec::new(),
            wakeup_default: Vec::new(),
        }
    }

    /// Clip for a single ASCII digit, if the character is one
    #[must_use]
    pub fn digit(&self, c: char) -> Option<&[u8]> {
        c.to_digit(10).map(|d| self.digits[d as usize].as_slice())
    }
}

/// Read a WAV file into raw s16le PCM, or silence on any failure
fn clip_or_silence(path: &Path) -> Vec<u8> {
    match load_wav_pcm(path) {
        Ok(pcm) => pcm,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "canned clip unavailable, using silence");
            Vec::new()
        }
    }
}

/// Decode a WAV file to raw little-endian 16-bit PCM bytes
///
/// # Errors
///
/// Returns an error if the file cannot be opened or is not 16-bit PCM.
pub fn load_wav_pcm(path: &Path) -> Result<Vec<u8>> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| Error::Asset(e.to_string()))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != hound::SampleFormat::Int {
        return Err(Error::Asset(format!(
            "expected 16-bit integer PCM, got {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }

    let mut pcm = Vec::new();
    for sample in reader.samples::<i16>() {
        let s = sample.map_err(|e| Error::Asset(e.to_string()))?;
        pcm.extend_from_slice(&s.to_le_bytes());
    }
    Ok(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_assets_degrade_to_silence() {
        let assets = CannedAudio::load(Path::new("/nonexistent/assets"));
        assert!(assets.bind_intro.is_empty());
        assert!(assets.quota.is_empty());
        assert!(assets.digits.iter().all(Vec::is_empty));
    }

    #[test]
    fn digit_lookup() {
        let mut assets = CannedAudio::silent();
        assets.digits[7] = vec![1, 2, 3, 4];
        assert_eq!(assets.digit('7'), Some([1u8, 2, 3, 4].as_slice()));
        assert!(assets.digit('x').is_none());
    }

    #[test]
    fn wav_roundtrip_through_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [100i16, -100, 200, -200] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let pcm = load_wav_pcm(&path).unwrap();
        assert_eq!(pcm.len(), 8);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 100);
    }
}
