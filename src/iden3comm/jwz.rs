// src/iden3comm/jwz.rs
//! JSON Web Zero-knowledge (JWZ) tokens.
//!
//! Compact form: `b64url(header) . b64url(payload) . b64url(zkp)`. The proof
//! commits to the first two segments: its challenge signal is
//! `Poseidon(sha256("<header>.<payload>") mod r)`.

use crate::models::protocol::{ZkProof, CIRCUIT_AUTH_V2, MEDIA_TYPE_ZKP};
use crate::utils::crypto::message_challenge;
use crate::utils::serialization::{
    decode_json_segment, encode_json_segment, from_b64url, to_b64url, SegmentError,
};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ALG_GROTH16: &str = "groth16";

#[derive(Debug, Error)]
pub enum JwzError {
    #[error("token must have three segments, got {0}")]
    Segments(usize),

    #[error("invalid header: {0}")]
    Header(SegmentError),

    #[error("invalid payload: {0}")]
    Payload(base64::DecodeError),

    #[error("invalid proof segment: {0}")]
    Proof(SegmentError),

    #[error("cannot compute challenge: {0}")]
    Challenge(String),

    #[error("cannot encode token: {0}")]
    Encode(#[from] SegmentError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwzHeader {
    pub alg: String,
    pub circuit_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crit: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub typ: String,
}

impl JwzHeader {
    /// The header wallets send for an `authV2` proof.
    pub fn auth_v2() -> Self {
        Self {
            alg: ALG_GROTH16.to_string(),
            circuit_id: CIRCUIT_AUTH_V2.to_string(),
            crit: vec!["circuitId".to_string()],
            typ: MEDIA_TYPE_ZKP.to_string(),
        }
    }
}

/// A parsed token. The proof has not been checked.
#[derive(Debug, Clone)]
pub struct Jwz {
    pub header: JwzHeader,
    pub payload: Vec<u8>,
    pub zkp: ZkProof,
    signing_input: String,
}

impl Jwz {
    pub fn parse(token: &str) -> Result<Self, JwzError> {
        let segments: Vec<&str> = token.trim().split('.').collect();
        let [header, payload, zkp] = segments.as_slice() else {
            return Err(JwzError::Segments(segments.len()));
        };
        Ok(Self {
            header: decode_json_segment(header).map_err(JwzError::Header)?,
            payload: from_b64url(payload).map_err(JwzError::Payload)?,
            zkp: decode_json_segment(zkp).map_err(JwzError::Proof)?,
            signing_input: format!("{}.{}", header, payload),
        })
    }

    /// `<header>.<payload>` exactly as received.
    pub fn signing_input(&self) -> &str {
        &self.signing_input
    }

    /// The challenge the proof must expose for this token.
    pub fn challenge(&self) -> Result<BigUint, JwzError> {
        message_challenge(self.signing_input.as_bytes())
            .map_err(|e| JwzError::Challenge(e.to_string()))
    }
}

/// Encodes the part of a token the proof commits to.
pub fn signing_input(header: &JwzHeader, payload: &[u8]) -> Result<String, JwzError> {
    Ok(format!("{}.{}", encode_json_segment(header)?, to_b64url(payload)))
}

/// Completes a token from its signing input and proof.
pub fn compose(signing_input: &str, zkp: &ZkProof) -> Result<String, JwzError> {
    Ok(format!("{}.{}", signing_input, encode_json_segment(zkp)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::protocol::ProofData;

    fn zkp() -> ZkProof {
        ZkProof {
            proof: ProofData {
                pi_a: vec!["1".into(), "2".into(), "1".into()],
                pi_b: vec![vec!["1".into(), "2".into()]],
                pi_c: vec!["3".into()],
                protocol: ALG_GROTH16.into(),
                curve: None,
            },
            pub_signals: vec!["1".into(), "2".into(), "3".into()],
        }
    }

    #[test]
    fn test_parse_composed_token() {
        let input = signing_input(&JwzHeader::auth_v2(), br#"{"id":"1"}"#).unwrap();
        let token = compose(&input, &zkp()).unwrap();
        let jwz = Jwz::parse(&token).unwrap();
        assert_eq!(jwz.header, JwzHeader::auth_v2());
        assert_eq!(jwz.payload, br#"{"id":"1"}"#);
        assert_eq!(jwz.zkp, zkp());
        assert_eq!(jwz.signing_input(), input);
    }

    #[test]
    fn test_challenge_binds_payload() {
        let a = signing_input(&JwzHeader::auth_v2(), b"{}").unwrap();
        let b = signing_input(&JwzHeader::auth_v2(), b"{ }").unwrap();
        let ja = Jwz::parse(&compose(&a, &zkp()).unwrap()).unwrap();
        let jb = Jwz::parse(&compose(&b, &zkp()).unwrap()).unwrap();
        assert_ne!(ja.challenge().unwrap(), jb.challenge().unwrap());
    }

    #[test]
    fn test_rejects_wrong_segment_count() {
        assert!(matches!(Jwz::parse("a.b"), Err(JwzError::Segments(2))));
        assert!(matches!(Jwz::parse("{\"id\":1}"), Err(JwzError::Segments(1))));
    }

    #[test]
    fn test_rejects_bad_header() {
        let token = format!("{}.e30.e30", to_b64url(b"not json"));
        assert!(matches!(Jwz::parse(&token), Err(JwzError::Header(_))));
    }
}
