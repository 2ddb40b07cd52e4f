//! Microphone capture: a cpal input stream chunked into fixed-size frames.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use super::{resample_linear, CAPTURE_RMS, FRAME_SAMPLES, INPUT_SAMPLE_RATE};
use crate::error::{BridgeError, Result};

/// Assembles an incoming sample stream into fixed-size frames.
///
/// Samples come out in the order they were pushed; a trailing partial frame
/// is held until later pushes complete it, so nothing is dropped.
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Push samples and drain every complete frame they produce.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_len {
            let rest = self.pending.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.pending, rest));
        }
        frames
    }

    /// Samples waiting for the next complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Seam over microphone acquisition so the session can run against a fake.
pub trait CaptureSource {
    fn stop(&mut self);
}

/// Live microphone stream. Exactly one exists per session; stopping (or
/// dropping) releases the device.
pub struct MicCapture {
    stream: cpal::Stream,
    stop_signal: Arc<AtomicBool>,
}

impl MicCapture {
    /// Acquire the default microphone and start delivering 4096-sample
    /// 16 kHz mono frames through `frame_tx`.
    pub fn start(frame_tx: mpsc::Sender<Vec<f32>>, stop_signal: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| BridgeError::Acquisition {
                message: "no microphone available".to_string(),
            })?;
        let config = device
            .default_input_config()
            .map_err(|e| BridgeError::Acquisition {
                message: e.to_string(),
            })?;

        let sample_rate = config.sample_rate();
        let channels = config.channels() as usize;
        let resample_ratio = INPUT_SAMPLE_RATE as f64 / sample_rate as f64;
        let stop = stop_signal.clone();
        let mut chunker = FrameChunker::new(FRAME_SAMPLES);
        let err_fn = |err| eprintln!("[Capture] stream error: {}", err);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_input_stream(
                    &config.into(),
                    move |data: &[f32], _: &_| {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }

                        let mono: Vec<f32> = data
                            .chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect();
                        let resampled = resample_linear(&mono, resample_ratio);

                        store_rms(&resampled);

                        for frame in chunker.push(&resampled) {
                            if frame_tx.send(frame).is_err() {
                                // Receiver gone: session is shutting down.
                                return;
                            }
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| BridgeError::Acquisition {
                    message: e.to_string(),
                })?,
            _ => {
                return Err(BridgeError::Acquisition {
                    message: "unsupported input sample format".to_string(),
                })
            }
        };

        stream.play().map_err(|e| BridgeError::Acquisition {
            message: e.to_string(),
        })?;

        Ok(Self {
            stream,
            stop_signal,
        })
    }
}

impl CaptureSource for MicCapture {
    fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        let _ = self.stream.pause();
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }
}

fn store_rms(samples: &[f32]) {
    if samples.is_empty() {
        return;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    let rms = (sum_sq / samples.len() as f64).sqrt() as f32;
    CAPTURE_RMS.store(rms.to_bits(), Ordering::Relaxed);
}
