//! Audio payloads that move between the microphone, the gateways and the speaker.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Size of the RIFF/WAVE header written by [`pcm_f32_to_wav`].
pub const WAV_HEADER_LEN: usize = 44;

/// A clip captured by one recording cycle: mono f32 PCM plus its sample rate.
#[derive(Debug, Clone)]
pub struct CapturedClip {
    /// PCM samples (f32, -1.0..1.0), mono.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` (device rate, e.g. 16000 or 48000).
    pub sample_rate: u32,
    /// When capture stopped.
    pub captured_at: DateTime<Utc>,
}

impl CapturedClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Utc::now(),
        }
    }

    /// Length of the audio described by the samples.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Size in bytes of the encoded 16-bit WAV upload.
    pub fn encoded_len(&self) -> usize {
        WAV_HEADER_LEN + self.samples.len() * 2
    }

    pub fn to_wav(&self) -> Vec<u8> {
        pcm_f32_to_wav(&self.samples, self.sample_rate)
    }
}

/// Synthesized speech returned by a TTS backend (encoded, typically MP3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    pub bytes: Arc<Vec<u8>>,
    /// MIME type reported by the backend, e.g. `audio/mpeg`.
    pub content_type: String,
}

impl SpeechAudio {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            content_type: content_type.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
pub fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2; // 16-bit = 2 bytes per sample
    let file_len = (WAV_HEADER_LEN + data_len) as u32;

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + data_len);
    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(file_len - 8).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    // fmt subchunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // subchunk1 size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    // data subchunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        let i = (clamped * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}
