//! Microphone capability using CPAL
//!
//! The microphone is an exclusive, capability-scoped resource: [`Microphone::acquire`]
//! hands out a [`CaptureStream`] and the device is released when that stream is
//! finished or dropped, whichever comes first.

use crate::clip::CapturedClip;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Source of microphone captures.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Open the input device and start capturing.
    ///
    /// Fails with [`VoiceError::CaptureUnavailable`] when the device cannot be opened.
    async fn acquire(&self) -> VoiceResult<Box<dyn CaptureStream>>;
}

/// An open capture. Dropping it releases the device without producing a clip.
pub trait CaptureStream: Send {
    /// Stop capturing, release the device and return what was recorded.
    fn finish(self: Box<Self>) -> CapturedClip;
}

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Requested sample rate in Hz. `None` uses the device default.
    pub sample_rate: Option<u32>,
    /// Number of channels requested from the device (downmixed to mono).
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: Some(16000),
            channels: 1,
        }
    }
}

/// Default input device via CPAL.
///
/// The CPAL stream is `!Send` on some platforms, so each capture owns a dedicated
/// thread that builds the stream, keeps it alive, and drops it on stop.
#[derive(Debug, Clone, Default)]
pub struct CpalMicrophone {
    config: AudioConfig,
}

impl CpalMicrophone {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

fn open_stream(
    config: &AudioConfig,
    samples: Arc<Mutex<Vec<f32>>>,
) -> VoiceResult<(cpal::Stream, u32)> {
    let device = cpal::default_host()
        .default_input_device()
        .ok_or_else(|| VoiceError::CaptureUnavailable("No input device available".to_string()))?;

    info!(
        "🎤 Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let default_config = device.default_input_config()?;
    let sample_rate = config
        .sample_rate
        .unwrap_or(default_config.sample_rate().0);
    let channels = config.channels.max(1);
    let stream_config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if let Ok(mut buf) = samples.lock() {
                if channels == 1 {
                    buf.extend_from_slice(data);
                } else {
                    buf.extend(
                        data.chunks(channels as usize)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
                    );
                }
            }
        },
        move |err| {
            warn!("Audio stream error: {}", err);
        },
        None,
    )?;
    stream.play()?;
    Ok((stream, sample_rate))
}

#[async_trait]
impl Microphone for CpalMicrophone {
    async fn acquire(&self) -> VoiceResult<Box<dyn CaptureStream>> {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let config = self.config.clone();
        let thread_samples = Arc::clone(&samples);
        thread::spawn(move || {
            let stream = match open_stream(&config, thread_samples) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until finish() or drop; a closed channel also ends capture.
            let _ = stop_rx.recv();
            drop(stream);
            debug!("🎤 input stream released");
        });

        let sample_rate = ready_rx
            .await
            .map_err(|_| VoiceError::CaptureUnavailable("capture thread exited".to_string()))??;

        Ok(Box::new(CpalCapture {
            samples,
            sample_rate,
            stop_tx: Some(stop_tx),
        }))
    }
}

struct CpalCapture {
    samples: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
}

impl CpalCapture {
    fn release(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl CaptureStream for CpalCapture {
    fn finish(mut self: Box<Self>) -> CapturedClip {
        self.release();
        let samples = self
            .samples
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();
        CapturedClip::new(samples, self.sample_rate)
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_config_defaults() {
        let config = AudioConfig::default();
        assert_eq!(config.sample_rate, Some(16000));
        assert_eq!(config.channels, 1);
    }

    #[test]
    fn test_list_devices() {
        // This might fail in CI environments without audio devices
        if let Ok(devices) = CpalMicrophone::list_input_devices() {
            println!("Available input devices: {:?}", devices);
        }
    }
}
