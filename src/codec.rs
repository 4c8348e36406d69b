//! Vector codec: little-endian float32 sequences <-> standard base64.
//!
//! Vectors are stored and shipped to the upstream in base64 form; decoding to
//! a float array happens only when a client asks for `encoding_format=float`.
//! The codec is pure and does no I/O.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Errors from [`decode`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded vector is {0} bytes, not a multiple of 4")]
    Length(usize),
}

/// Encode a float32 sequence as base64 over its little-endian byte form.
pub fn encode(floats: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode base64 back into a float32 sequence.
///
/// Fails if the input is not valid base64 or the decoded byte length is not a
/// multiple of 4.
pub fn decode(content: &str) -> Result<Vec<f32>, CodecError> {
    let bytes = STANDARD.decode(content)?;
    if bytes.len() % 4 != 0 {
        return Err(CodecError::Length(bytes.len()));
    }
    let floats = bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok(floats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(&[0.125, 0.25, 0.5]), "AAAAPgAAgD4AAAA/");
        assert_eq!(encode(&[0.375, 0.75, 0.875]), "AADAPgAAQD8AAGA/");
    }

    #[test]
    fn test_decode_known_vector() {
        let floats = decode("AAAAPgAAgD4AAAA/").unwrap();
        assert_eq!(floats, vec![0.125, 0.25, 0.5]);
    }

    #[test]
    fn test_round_trip() {
        let original = vec![1.0_f32, -2.5, 0.0, 3.25, f32::MIN, f32::MAX];
        let encoded = encode(&original);
        assert_eq!(decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_encode_empty() {
        assert_eq!(encode(&[]), "");
        assert_eq!(decode("").unwrap(), Vec::<f32>::new());
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        // "AAAA" decodes to 3 bytes.
        let err = decode("AAAA").unwrap_err();
        assert!(matches!(err, CodecError::Length(3)));
    }

    #[test]
    fn test_decode_rejects_invalid_base64() {
        let err = decode("not base64!!").unwrap_err();
        assert!(matches!(err, CodecError::Base64(_)));
    }
}
