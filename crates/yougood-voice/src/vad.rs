//! Speech gate using WebRTC VAD
//!
//! A recording cycle captures a fixed window whether or not the user said anything.
//! Before a clip is handed to speech-to-text it is scanned in 30ms frames; a clip in
//! which no frame is classified as speech is treated as near-silent and discarded.

use crate::clip::CapturedClip;
use crate::error::{VoiceError, VoiceResult};
use tracing::debug;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Configuration for the speech gate
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Detection mode (0-3, where 3 is most aggressive)
    pub mode: u8,
    /// Minimum number of speech frames required to keep a clip (default: 1)
    pub min_speech_frames: usize,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            mode: 2,
            min_speech_frames: 1,
        }
    }
}

fn vad_mode(mode: u8) -> VoiceResult<VadMode> {
    match mode {
        0 => Ok(VadMode::Quality),
        1 => Ok(VadMode::LowBitrate),
        2 => Ok(VadMode::Aggressive),
        3 => Ok(VadMode::VeryAggressive),
        other => Err(VoiceError::Config(format!("VAD mode must be 0-3, got {}", other))),
    }
}

fn vad_rate(sample_rate: u32) -> Option<SampleRate> {
    match sample_rate {
        8000 => Some(SampleRate::Rate8kHz),
        16000 => Some(SampleRate::Rate16kHz),
        32000 => Some(SampleRate::Rate32kHz),
        48000 => Some(SampleRate::Rate48kHz),
        _ => None,
    }
}

/// Frame-level voice activity detector for one sample rate.
///
/// Not `Send`: create it where it is used (e.g. inside `spawn_blocking`).
pub struct VadDetector {
    vad: Vad,
    chunk_size: usize,
}

impl VadDetector {
    pub fn new(sample_rate: u32, config: &VadConfig) -> VoiceResult<Self> {
        let rate = vad_rate(sample_rate).ok_or_else(|| {
            VoiceError::VadInit(format!(
                "WebRTC VAD only supports 8000, 16000, 32000, or 48000 Hz, got {}",
                sample_rate
            ))
        })?;
        let mut vad = Vad::new();
        vad.set_mode(vad_mode(config.mode)?);
        vad.set_sample_rate(rate);
        // WebRTC VAD requires 10ms, 20ms, or 30ms frames; use 30ms.
        let chunk_size = (sample_rate as usize * 30) / 1000;
        Ok(Self { vad, chunk_size })
    }

    /// Classify one frame of exactly `chunk_size` samples.
    pub fn is_speech(&mut self, frame: &[f32]) -> VoiceResult<bool> {
        if frame.len() != self.chunk_size {
            return Err(VoiceError::VadProcessing(format!(
                "Expected {} samples, got {}",
                self.chunk_size,
                frame.len()
            )));
        }
        let pcm: Vec<i16> = frame
            .iter()
            .map(|&sample| (sample.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect();
        self.vad
            .is_voice_segment(&pcm)
            .map_err(|e| VoiceError::VadProcessing(format!("VAD processing failed: {:?}", e)))
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Count the 30ms frames classified as speech. Trailing partial frames are ignored.
    pub fn speech_frames(&mut self, samples: &[f32]) -> VoiceResult<usize> {
        let mut count = 0;
        for frame in samples.chunks_exact(self.chunk_size) {
            if self.is_speech(frame)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Returns false when the clip contains fewer speech frames than required.
///
/// Clips at a sample rate WebRTC VAD cannot handle are passed through as speech.
pub fn clip_has_speech(clip: &CapturedClip, config: &VadConfig) -> VoiceResult<bool> {
    if vad_rate(clip.sample_rate).is_none() {
        debug!(sample_rate = clip.sample_rate, "speech gate skipped for unsupported rate");
        return Ok(true);
    }
    let mut detector = VadDetector::new(clip.sample_rate, config)?;
    let frames = detector.speech_frames(&clip.samples)?;
    debug!(speech_frames = frames, "speech gate result");
    Ok(frames >= config.min_speech_frames)
}
