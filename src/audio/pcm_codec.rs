//! Stateless conversions between float samples, 16-bit little-endian PCM,
//! base64 transport text and playable segments.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::playback::PlaybackSegment;
use crate::error::DecodeError;

const PCM_BYTES_PER_SAMPLE: usize = 2;

/// Quantize one float sample to i16. Input is clamped to [-1, 1].
pub fn sample_to_i16(sample: f32) -> i16 {
    let scaled = (sample.clamp(-1.0, 1.0) * 32768.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn i16_to_sample(value: i16) -> f32 {
    value as f32 / 32768.0
}

/// Encode float samples as signed 16-bit little-endian PCM.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * PCM_BYTES_PER_SAMPLE);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    bytes
}

/// Decode signed 16-bit little-endian PCM into float samples.
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<f32>, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % PCM_BYTES_PER_SAMPLE != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            frame_bytes: PCM_BYTES_PER_SAMPLE,
        });
    }
    Ok(bytes
        .chunks_exact(PCM_BYTES_PER_SAMPLE)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

pub fn to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn from_base64(text: &str) -> Result<Vec<u8>, DecodeError> {
    Ok(STANDARD.decode(text.trim())?)
}

/// Turn raw PCM bytes into a segment the output device can play.
///
/// The payload must hold a whole number of interleaved frames.
pub fn decode_segment(
    bytes: &[u8],
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackSegment, DecodeError> {
    let frame_bytes = PCM_BYTES_PER_SAMPLE * channels.max(1) as usize;
    if !bytes.is_empty() && bytes.len() % frame_bytes != 0 {
        return Err(DecodeError::Truncated {
            len: bytes.len(),
            frame_bytes,
        });
    }
    let samples = decode_pcm16(bytes)?;
    Ok(PlaybackSegment::new(samples, sample_rate, channels))
}

/// base64 text straight to a playable segment.
pub fn decode_base64_segment(
    text: &str,
    sample_rate: u32,
    channels: u16,
) -> Result<PlaybackSegment, DecodeError> {
    decode_segment(&from_base64(text)?, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_round_trip_stays_within_quantization_error() {
        let samples: Vec<f32> = (0..512)
            .map(|i| ((i as f32) * 0.037).sin() * 0.95)
            .collect();
        let decoded = decode_pcm16(&encode_pcm16(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn encoding_is_little_endian_and_clamped() {
        assert_eq!(encode_pcm16(&[0.5]), 16384i16.to_le_bytes().to_vec());
        assert_eq!(sample_to_i16(2.0), i16::MAX);
        assert_eq!(sample_to_i16(-2.0), i16::MIN);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(decode_pcm16(&[]), Err(DecodeError::Empty)));
        assert!(matches!(
            decode_pcm16(&[1, 2, 3]),
            Err(DecodeError::Truncated { len: 3, .. })
        ));
        assert!(matches!(
            from_base64("not base64!!"),
            Err(DecodeError::Base64(_))
        ));
        assert!(matches!(
            decode_segment(&[0; 6], 24_000, 2),
            Err(DecodeError::Truncated { len: 6, frame_bytes: 4 })
        ));
    }

    #[test]
    fn segment_duration_follows_rate_and_channels() {
        let mono = decode_segment(&vec![0u8; 48_000], 24_000, 1).unwrap();
        assert_eq!(mono.frames(), 24_000);
        assert!((mono.duration() - 1.0).abs() < 1e-9);

        let stereo = decode_segment(&vec![0u8; 48_000], 24_000, 2).unwrap();
        assert!((stereo.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn base64_segment_decodes() {
        let text = to_base64(&encode_pcm16(&[0.25, -0.25]));
        let segment = decode_base64_segment(&text, 24_000, 1).unwrap();
        assert_eq!(segment.frames(), 2);
        assert!((segment.frame_mono(1) + 0.25).abs() < 1e-4);
    }
}
