//! Audio plumbing: wire codec, microphone capture, playback scheduling.

pub mod capture;
pub mod codec;
pub mod playback;

use std::sync::atomic::AtomicU32;

/// Wire sample rate for audio sent to the backend.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio frames the backend sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Samples per captured frame (~256 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 4096;

/// RMS of the most recent captured block, stored as f32 bits.
/// The UI reads this for its volume meter.
pub static CAPTURE_RMS: AtomicU32 = AtomicU32::new(0);

/// Linear-interpolation resampling, good enough for speech.
pub(crate) fn resample_linear(samples: &[f32], ratio: f64) -> Vec<f32> {
    if samples.is_empty() || (ratio - 1.0).abs() < f64::EPSILON {
        return samples.to_vec();
    }

    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 / ratio;
        let idx0 = (src_pos as usize).min(samples.len() - 1);
        let idx1 = (idx0 + 1).min(samples.len() - 1);
        let frac = (src_pos - idx0 as f64) as f32;
        output.push(samples[idx0] + (samples[idx1] - samples[idx0]) * frac);
    }

    output
}
