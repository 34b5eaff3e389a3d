//! # Voice Activity Detection
//!
//! Computes a normalized loudness measure for incoming PCM chunks so the
//! session state machine can tell speech from silence. The measure is a
//! plain root-mean-square over the chunk's samples, scaled into [0, 1].
//!
//! ## Audio Format Expectations:
//! - **Bit depth**: 16-bit signed PCM
//! - **Encoding**: Little-endian
//! - **Channels**: Mono (interleaved stereo would still produce a usable
//!   level, just a mixed one)
//!
//! A chunk with an odd trailing byte is not an error: the incomplete final
//! sample is dropped and the level is computed from the complete samples.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Loudness above this value classifies a chunk as active speech;
/// at or below it, the chunk is silence.
pub const ACTIVITY_THRESHOLD: f32 = 0.02;

/// Compute the normalized RMS loudness of a raw PCM chunk.
///
/// ## Parameters:
/// - **data**: Raw chunk bytes (16-bit little-endian samples)
///
/// ## Returns:
/// - **f32** in [0.0, 1.0]. All-zero samples give 0.0; a full-scale
///   square wave approaches 1.0. An empty (or single-byte) chunk gives 0.0.
pub fn chunk_loudness(data: &[u8]) -> f32 {
    let mut cursor = Cursor::new(data);
    let mut sum_squares = 0.0f64;
    let mut count = 0usize;

    // Read complete samples; a trailing odd byte fails the final read and
    // is thereby truncated.
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        let normalized = sample as f64 / 32768.0;
        sum_squares += normalized * normalized;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let rms = (sum_squares / count as f64).sqrt() as f32;
    rms.clamp(0.0, 1.0)
}

/// Whether a loudness value counts as active speech.
pub fn is_active(loudness: f32) -> bool {
    loudness > ACTIVITY_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_from_samples(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_silence_is_zero() {
        let chunk = chunk_from_samples(&[0i16; 1600]);
        assert_eq!(chunk_loudness(&chunk), 0.0);
    }

    #[test]
    fn test_full_scale_square_wave_approaches_one() {
        let samples: Vec<i16> = (0..1600)
            .map(|i| if i % 2 == 0 { i16::MIN } else { i16::MAX })
            .collect();
        let level = chunk_loudness(&chunk_from_samples(&samples));
        assert!(level > 0.99, "expected near-1.0 level, got {}", level);
        assert!(level <= 1.0);
    }

    #[test]
    fn test_level_stays_in_range() {
        // A pseudo-random spread of sample values must never escape [0, 1].
        let samples: Vec<i16> = (0..4096usize)
            .map(|i| (i.wrapping_mul(2654435761) % 65536) as u16 as i16)
            .collect();
        let level = chunk_loudness(&chunk_from_samples(&samples));
        assert!((0.0..=1.0).contains(&level));
    }

    #[test]
    fn test_odd_trailing_byte_is_truncated() {
        let samples = [8000i16, -8000, 8000, -8000];
        let mut chunk = chunk_from_samples(&samples);
        let even_level = chunk_loudness(&chunk);

        // Append half a sample; the level must be computed as if it were absent.
        chunk.push(0x7f);
        assert_eq!(chunk_loudness(&chunk), even_level);
    }

    #[test]
    fn test_empty_chunk_is_silent() {
        assert_eq!(chunk_loudness(&[]), 0.0);
        assert!(!is_active(chunk_loudness(&[])));
    }

    #[test]
    fn test_threshold_classification() {
        // Amplitude 10000 square wave: RMS ~ 0.305, well above threshold.
        let loud: Vec<i16> = (0..800).map(|i| if i % 2 == 0 { 10000 } else { -10000 }).collect();
        assert!(is_active(chunk_loudness(&chunk_from_samples(&loud))));

        // Amplitude 300 square wave: RMS ~ 0.009, below threshold.
        let faint: Vec<i16> = (0..800).map(|i| if i % 2 == 0 { 300 } else { -300 }).collect();
        assert!(!is_active(chunk_loudness(&chunk_from_samples(&faint))));
    }
}
