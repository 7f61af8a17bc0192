//! Audio helpers for the telephony path.
//!
//! The media stream carries G.711 u-law at 8kHz. This module holds the
//! tiny u-law conversions the gateway needs (recording finalization and
//! hold-clip loading) plus the per-call recorder. Anything heavier than
//! G.711 is out of scope — the provider is configured to speak u-law so
//! the relay never transcodes live audio.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sample rate of the telephony media stream.
pub const TELEPHONY_SAMPLE_RATE: u32 = 8000;

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 32635;

/// Errors from audio loading and recording.
#[derive(Debug, Error)]
pub enum AudioError {
    /// WAV file could not be read
    #[error("WAV read failed: {0}")]
    WavRead(String),

    /// WAV file has an unsupported layout
    #[error("Unsupported WAV layout: {0}")]
    UnsupportedWav(String),

    /// Recording could not be written
    #[error("Recording write failed: {0}")]
    WriteFailed(String),
}

// =============================================================================
// G.711 u-law
// =============================================================================

/// Decode one u-law byte to a 16-bit PCM sample.
pub fn ulaw_to_pcm16(byte: u8) -> i16 {
    let byte = !byte;
    let sign = (byte & 0x80) as i32;
    let exponent = ((byte >> 4) & 0x07) as i32;
    let mantissa = (byte & 0x0F) as i32;
    let mut sample = ((mantissa << 3) + ULAW_BIAS) << exponent;
    sample -= ULAW_BIAS;
    if sign != 0 { -sample as i16 } else { sample as i16 }
}

/// Encode one 16-bit PCM sample as a u-law byte.
pub fn pcm16_to_ulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80u8
    } else {
        0
    };
    if value > ULAW_CLIP {
        value = ULAW_CLIP;
    }
    value += ULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && (value & mask) == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((value >> (exponent + 3)) & 0x0F) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Load a WAV file and convert it to a u-law byte stream.
///
/// Expects mono 16-bit PCM at the telephony sample rate; used for the
/// hold clip injected during suspend/resume function handling.
pub fn load_wav_as_ulaw(path: &Path) -> Result<Vec<u8>, AudioError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| AudioError::WavRead(e.to_string()))?;
    let spec = reader.spec();

    if spec.channels != 1
        || spec.sample_rate != TELEPHONY_SAMPLE_RATE
        || spec.bits_per_sample != 16
        || spec.sample_format != hound::SampleFormat::Int
    {
        return Err(AudioError::UnsupportedWav(format!(
            "need mono {TELEPHONY_SAMPLE_RATE}Hz pcm16, got {}ch {}Hz {}bit",
            spec.channels, spec.sample_rate, spec.bits_per_sample
        )));
    }

    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(|e| AudioError::WavRead(e.to_string()))?;
    Ok(samples.into_iter().map(pcm16_to_ulaw).collect())
}

// =============================================================================
// Call Recorder
// =============================================================================

/// A finished call recording on disk.
#[derive(Debug, Clone)]
pub struct RecordingArtifact {
    /// Where the WAV was written
    pub path: PathBuf,
    /// Recording length in milliseconds
    pub duration_ms: u64,
}

/// Accumulates both legs of a call and writes a mixed WAV on finalize.
///
/// Audio is kept as the raw u-law stream; mixing happens once at the end.
/// When recording is disabled the caller buffer is still kept — the
/// suspend/resume function handlers summarize it mid-call.
#[derive(Debug, Default)]
pub struct CallRecorder {
    enabled: bool,
    caller: Vec<u8>,
    assistant: Vec<u8>,
}

impl CallRecorder {
    /// Create a recorder; `enabled` controls whether finalize writes a file.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            caller: Vec::new(),
            assistant: Vec::new(),
        }
    }

    /// Append caller-leg u-law audio.
    pub fn push_caller(&mut self, ulaw: &[u8]) {
        self.caller.extend_from_slice(ulaw);
    }

    /// Append assistant-leg u-law audio.
    pub fn push_assistant(&mut self, ulaw: &[u8]) {
        self.assistant.extend_from_slice(ulaw);
    }

    /// The accumulated caller audio, for mid-call summarization.
    pub fn caller_audio(&self) -> &[u8] {
        &self.caller
    }

    /// Mix both legs and write a mono WAV under `dir`.
    ///
    /// Returns `None` when recording is disabled or nothing was captured.
    pub fn finalize(
        &self,
        dir: &Path,
        call_id: &str,
    ) -> Result<Option<RecordingArtifact>, AudioError> {
        if !self.enabled || (self.caller.is_empty() && self.assistant.is_empty()) {
            return Ok(None);
        }

        let len = self.caller.len().max(self.assistant.len());
        let mut mixed = Vec::with_capacity(len);
        for i in 0..len {
            let a = self
                .caller
                .get(i)
                .map(|b| ulaw_to_pcm16(*b) as i32)
                .unwrap_or(0);
            let b = self
                .assistant
                .get(i)
                .map(|b| ulaw_to_pcm16(*b) as i32)
                .unwrap_or(0);
            mixed.push((a + b).clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }

        std::fs::create_dir_all(dir).map_err(|e| AudioError::WriteFailed(e.to_string()))?;
        let path = dir.join(format!("{call_id}.wav"));
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TELEPHONY_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer =
            hound::WavWriter::create(&path, spec).map_err(|e| AudioError::WriteFailed(e.to_string()))?;
        for sample in &mixed {
            writer
                .write_sample(*sample)
                .map_err(|e| AudioError::WriteFailed(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| AudioError::WriteFailed(e.to_string()))?;

        let duration_ms = (len as u64 * 1000) / TELEPHONY_SAMPLE_RATE as u64;
        Ok(Some(RecordingArtifact { path, duration_ms }))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ulaw_round_trip_is_close() {
        for &sample in &[0i16, 100, -100, 1000, -1000, 8000, -8000, 30000, -30000] {
            let decoded = ulaw_to_pcm16(pcm16_to_ulaw(sample));
            let error = (decoded as i32 - sample as i32).abs();
            // u-law is logarithmic; tolerance grows with amplitude
            let tolerance = (sample.unsigned_abs() as i32 / 16).max(64);
            assert!(
                error <= tolerance,
                "sample {sample} decoded to {decoded} (error {error})"
            );
        }
    }

    #[test]
    fn test_ulaw_silence() {
        // 0xFF is u-law digital silence
        assert_eq!(ulaw_to_pcm16(0xFF), 0);
        assert_eq!(pcm16_to_ulaw(0), 0xFF);
    }

    #[test]
    fn test_recorder_disabled_writes_nothing() {
        let mut recorder = CallRecorder::new(false);
        recorder.push_caller(&[0xFF; 800]);
        let dir = tempfile::tempdir().unwrap();
        let artifact = recorder.finalize(dir.path(), "CA1").unwrap();
        assert!(artifact.is_none());
        // Caller audio is still available for summarization
        assert_eq!(recorder.caller_audio().len(), 800);
    }

    #[test]
    fn test_recorder_writes_mixed_wav() {
        let mut recorder = CallRecorder::new(true);
        recorder.push_caller(&[0xFF; 8000]);
        recorder.push_assistant(&[0xFF; 4000]);
        let dir = tempfile::tempdir().unwrap();
        let artifact = recorder
            .finalize(dir.path(), "CA2")
            .unwrap()
            .expect("recording written");
        assert_eq!(artifact.duration_ms, 1000);

        let reader = hound::WavReader::open(&artifact.path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, TELEPHONY_SAMPLE_RATE);
        assert_eq!(reader.len(), 8000);
    }

    #[test]
    fn test_load_wav_as_ulaw_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: TELEPHONY_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..800i16 {
            writer.write_sample(i * 10).unwrap();
        }
        writer.finalize().unwrap();

        let ulaw = load_wav_as_ulaw(&path).unwrap();
        assert_eq!(ulaw.len(), 800);
    }

    #[test]
    fn test_load_wav_rejects_wrong_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hifi.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        writer.write_sample(0i16).unwrap();
        writer.finalize().unwrap();

        assert!(matches!(
            load_wav_as_ulaw(&path),
            Err(AudioError::UnsupportedWav(_))
        ));
    }
}
