// src/utils/serialization.rs
//! Serialization utilities.
//!
//! JWZ tokens are three base64url segments without padding; these helpers
//! move JSON values in and out of such segments.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("base64url decoding failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encodes raw bytes as unpadded base64url.
pub fn to_b64url(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

/// Decodes unpadded base64url.
pub fn from_b64url(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::decode_config(segment, base64::URL_SAFE_NO_PAD)
}

/// Serializes a value to JSON and encodes it as a base64url segment.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Returns
/// - `Ok(String)` with the encoded segment
/// - `Err(SegmentError::Json)` if serialization fails
pub fn encode_json_segment<T: Serialize>(data: &T) -> Result<String, SegmentError> {
    Ok(to_b64url(&serde_json::to_vec(data)?))
}

/// Decodes a base64url segment and deserializes its JSON content.
pub fn decode_json_segment<T: DeserializeOwned>(segment: &str) -> Result<T, SegmentError> {
    let bytes = from_b64url(segment)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_segment_has_no_padding() {
        let segment = encode_json_segment(&json!({ "a": 1 })).unwrap();
        assert!(!segment.contains('='));
        let value: Value = decode_json_segment(&segment).unwrap();
        assert_eq!(value, json!({ "a": 1 }));
    }

    #[test]
    fn test_rejects_standard_alphabet() {
        assert!(matches!(
            decode_json_segment::<Value>("a+b/"),
            Err(SegmentError::Base64(_))
        ));
    }
}
