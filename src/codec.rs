//! PCM16 wire codec.
//!
//! Both directions of the stream carry linear PCM, 16-bit little-endian,
//! mono, base64-encoded so frames can travel inside JSON text messages.
//! Conversion is stateless and pure.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::error::EngineError;

/// Encode a float sample buffer into a base64 PCM16 payload.
///
/// Samples are clamped to [-1, 1] before scaling, so out-of-range input is
/// never rejected. Infallible on any well-formed buffer.
pub fn encode(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 PCM16 payload back to float samples in [-1, 1].
///
/// Fails with `MalformedPayload` when the payload is not valid base64 or the
/// decoded byte count is not a whole number of 16-bit samples.
pub fn decode(payload: &str) -> Result<Vec<f32>, EngineError> {
    let bytes = BASE64
        .decode(payload)
        .map_err(|e| EngineError::MalformedPayload(e.to_string()))?;
    if bytes.len() % 2 != 0 {
        return Err(EngineError::MalformedPayload(format!(
            "{} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect())
}

/// Wall-clock duration of `sample_count` mono samples at `sample_rate`.
pub fn duration_of(sample_count: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(sample_count as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_within_one_quantization_step() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 500.0 - 1.0) * 0.997).collect();
        let decoded = decode(&encode(&samples)).unwrap();
        assert_eq!(decoded.len(), samples.len());
        for (a, b) in samples.iter().zip(&decoded) {
            assert!((a - b).abs() <= 1.0 / 32768.0, "{} vs {}", a, b);
        }
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let decoded = decode(&encode(&[2.0, -3.5])).unwrap();
        assert_eq!(decoded[0], 32767.0 / 32768.0);
        assert_eq!(decoded[1], -32767.0 / 32768.0);
    }

    #[test]
    fn samples_are_little_endian_on_the_wire() {
        let bytes = BASE64.decode(encode(&[1.0])).unwrap();
        assert_eq!(bytes, 32767i16.to_le_bytes());
    }

    #[test]
    fn odd_byte_length_is_malformed() {
        let payload = BASE64.encode([0u8, 1, 2]);
        match decode(&payload) {
            Err(EngineError::MalformedPayload(_)) => {}
            other => panic!("expected MalformedPayload, got {:?}", other),
        }
    }

    #[test]
    fn invalid_base64_is_malformed() {
        match decode("not base64 at all!!!") {
            Err(EngineError::MalformedPayload(_)) => {}
            other => panic!("expected MalformedPayload, got {:?}", other),
        }
    }

    #[test]
    fn duration_matches_sample_count() {
        assert_eq!(duration_of(24_000, 24_000), Duration::from_secs(1));
        assert_eq!(duration_of(12_000, 24_000), Duration::from_millis(500));
        assert_eq!(duration_of(0, 16_000), Duration::ZERO);
    }
}
