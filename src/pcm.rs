//! Little-endian PCM16 helpers.

use crate::config::BYTES_PER_SAMPLE;

/// Full-scale divisor mapping i16 onto [-1, 1)
pub const PCM16_SCALE: f32 = 32768.0;

/// Decodes little-endian i16 samples into normalized floats.
///
/// The low byte is taken unsigned and the high byte signed. Decodes as many
/// whole samples as both `bytes` and `out` allow and returns that count.
pub fn decode_pcm16_le(bytes: &[u8], out: &mut [f32]) -> usize {
    let mut decoded = 0;
    for (sample, pair) in out.iter_mut().zip(bytes.chunks_exact(BYTES_PER_SAMPLE)) {
        *sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 / PCM16_SCALE;
        decoded += 1;
    }
    decoded
}

/// Appends samples as little-endian byte pairs.
pub fn encode_pcm16_le(samples: &[i16], out: &mut Vec<u8>) {
    out.reserve(samples.len() * BYTES_PER_SAMPLE);
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
}

/// Subtracts the arithmetic mean from every sample and returns it.
pub fn remove_dc_offset(samples: &mut [f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let offset = samples.iter().sum::<f32>() / samples.len() as f32;
    for sample in samples.iter_mut() {
        *sample -= offset;
    }
    offset
}
