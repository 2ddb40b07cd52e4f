//! PCM wire codec: f32 samples ⇄ 16-bit little-endian PCM ⇄ base64.
//!
//! The backend speaks base64-encoded 16-bit PCM tagged with a MIME rate
//! descriptor in both directions. Quantization loses up to 1/32768 per
//! sample; that is inherent to the wire format, not a defect.

use base64::{engine::general_purpose, Engine as _};

use crate::error::{BridgeError, Result};

/// A base64-encoded PCM frame ready for the transport.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    pub data: String,
    pub mime_type: String,
}

/// Decoded PCM audio, one sample vector per channel.
#[derive(Clone, Debug)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration_secs(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// First channel; all bridge audio is mono.
    pub fn mono(&self) -> &[f32] {
        self.channels.first().map(|c| c.as_slice()).unwrap_or(&[])
    }
}

/// Encode normalized samples as base64 PCM tagged with the sample rate.
pub fn encode_frame(samples: &[f32], sample_rate: u32) -> EncodedFrame {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let quantized = (clamped as f64 * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }

    EncodedFrame {
        data: general_purpose::STANDARD.encode(&bytes),
        mime_type: format!("audio/pcm;rate={}", sample_rate),
    }
}

/// Decode base64 PCM into normalized per-channel samples.
pub fn decode_frame(data: &str, sample_rate: u32, channel_count: usize) -> Result<DecodedAudio> {
    let bytes = general_purpose::STANDARD
        .decode(data)
        .map_err(|e| BridgeError::Protocol {
            message: format!("invalid base64 audio: {}", e),
        })?;

    if channel_count == 0 {
        return Err(BridgeError::Protocol {
            message: "zero channels".to_string(),
        });
    }
    if bytes.len() % (2 * channel_count) != 0 {
        return Err(BridgeError::Protocol {
            message: format!("truncated PCM payload ({} bytes)", bytes.len()),
        });
    }

    let mut channels = vec![Vec::with_capacity(bytes.len() / (2 * channel_count)); channel_count];
    for (i, chunk) in bytes.chunks_exact(2).enumerate() {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        channels[i % channel_count].push(sample as f32 / 32768.0);
    }

    Ok(DecodedAudio {
        channels,
        sample_rate,
    })
}
