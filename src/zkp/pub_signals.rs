// src/zkp/pub_signals.rs
//! Typed views over the public signals of the circuits this service accepts.

use crate::models::did::{DidError, Id};
use crate::zkp::proof_verification::{parse_signal, ProofError};
use num_bigint::BigUint;
use thiserror::Error;

/// Width of the `value` array in the atomic query circuits.
pub const QUERY_VALUE_ARRAY_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum SignalsError {
    #[error("{circuit} expects {expected} public signals, got {got}")]
    Count {
        circuit: &'static str,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Field(#[from] ProofError),

    #[error("signal '{name}' is not a valid identifier: {source}")]
    Identifier {
        name: &'static str,
        #[source]
        source: DidError,
    },

    #[error("signal '{0}' does not fit its expected range")]
    Range(&'static str),
}

fn field_values(
    circuit: &'static str,
    signals: &[String],
    expected: usize,
) -> Result<Vec<BigUint>, SignalsError> {
    if signals.len() != expected {
        return Err(SignalsError::Count {
            circuit,
            expected,
            got: signals.len(),
        });
    }
    signals
        .iter()
        .map(|s| -> Result<BigUint, SignalsError> { Ok(parse_signal(s)?.into()) })
        .collect()
}

fn identifier(name: &'static str, value: &BigUint) -> Result<Id, SignalsError> {
    Id::from_big_int(value).map_err(|source| SignalsError::Identifier { name, source })
}

fn small<T: TryFrom<u64>>(name: &'static str, value: &BigUint) -> Result<T, SignalsError> {
    let digits = value.to_u64_digits();
    let raw = match digits.as_slice() {
        [] => 0,
        [d] => *d,
        _ => return Err(SignalsError::Range(name)),
    };
    T::try_from(raw).map_err(|_| SignalsError::Range(name))
}

fn flag(name: &'static str, value: &BigUint) -> Result<bool, SignalsError> {
    match small::<u8>(name, value)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(SignalsError::Range(name)),
    }
}

/// `authV2`: `[userID, challenge, gistRoot]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthV2PubSignals {
    pub user_id: Id,
    pub challenge: BigUint,
    pub gist_root: BigUint,
}

impl AuthV2PubSignals {
    pub fn parse(signals: &[String]) -> Result<Self, SignalsError> {
        let v = field_values("authV2", signals, 3)?;
        Ok(Self {
            user_id: identifier("userID", &v[0])?,
            challenge: v[1].clone(),
            gist_root: v[2].clone(),
        })
    }
}

/// `credentialAtomicQueryMTPV2` outputs and inputs, in circuit order.
#[derive(Debug, Clone, PartialEq)]
pub struct AtomicQueryMtpV2PubSignals {
    pub merklized: bool,
    pub user_id: Id,
    pub request_id: BigUint,
    pub issuer_id: Id,
    pub issuer_claim_iden_state: BigUint,
    pub is_revocation_checked: bool,
    pub issuer_claim_non_rev_state: BigUint,
    pub timestamp: i64,
    pub claim_schema: BigUint,
    pub claim_path_not_exists: bool,
    pub claim_path_key: BigUint,
    pub slot_index: u32,
    pub operator: u32,
    pub value: Vec<BigUint>,
}

impl AtomicQueryMtpV2PubSignals {
    pub const LEN: usize = 13 + QUERY_VALUE_ARRAY_SIZE;

    pub fn parse(signals: &[String]) -> Result<Self, SignalsError> {
        let v = field_values("credentialAtomicQueryMTPV2", signals, Self::LEN)?;
        Ok(Self {
            merklized: flag("merklized", &v[0])?,
            user_id: identifier("userID", &v[1])?,
            request_id: v[2].clone(),
            issuer_id: identifier("issuerID", &v[3])?,
            issuer_claim_iden_state: v[4].clone(),
            is_revocation_checked: flag("isRevocationChecked", &v[5])?,
            issuer_claim_non_rev_state: v[6].clone(),
            timestamp: small("timestamp", &v[7])?,
            claim_schema: v[8].clone(),
            claim_path_not_exists: flag("claimPathNotExists", &v[9])?,
            claim_path_key: v[10].clone(),
            slot_index: small("slotIndex", &v[11])?,
            operator: small("operator", &v[12])?,
            value: v[13..].to_vec(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Position of `claimPathKey` in MTPV2 signals.
    pub const CLAIM_PATH_KEY_INDEX: usize = 10;

    /// Signals for a merklized MTPV2 proof with the given query part.
    pub fn mtp_v2_signals(
        user: &Id,
        issuer: &Id,
        request_id: u32,
        timestamp: i64,
        claim_schema: &BigUint,
        operator: u32,
        values: &[u64],
    ) -> Vec<String> {
        let mut out = vec![
            "1".to_string(),
            user.to_big_int().to_string(),
            request_id.to_string(),
            issuer.to_big_int().to_string(),
            "111".to_string(),
            "0".to_string(),
            "222".to_string(),
            timestamp.to_string(),
            claim_schema.to_string(),
            "0".to_string(),
            "333".to_string(),
            "0".to_string(),
            operator.to_string(),
        ];
        for i in 0..QUERY_VALUE_ARRAY_SIZE {
            out.push(values.get(i).copied().unwrap_or(0).to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::mtp_v2_signals;
    use super::*;

    fn user() -> Id {
        "2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfGdm".parse().unwrap()
    }

    fn issuer() -> Id {
        "2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfcC7".parse().unwrap()
    }

    #[test]
    fn test_auth_v2() {
        let signals = vec![user().to_big_int().to_string(), "5".into(), "9".into()];
        let parsed = AuthV2PubSignals::parse(&signals).unwrap();
        assert_eq!(parsed.user_id, user());
        assert_eq!(parsed.challenge, BigUint::from(5u32));
        assert_eq!(parsed.gist_root, BigUint::from(9u32));
    }

    #[test]
    fn test_auth_v2_rejects_garbage_user() {
        let signals = vec!["12345".to_string(), "5".into(), "9".into()];
        assert!(matches!(
            AuthV2PubSignals::parse(&signals),
            Err(SignalsError::Identifier { name: "userID", .. })
        ));
    }

    #[test]
    fn test_mtp_v2_layout() {
        let schema = BigUint::from(77u32);
        let signals = mtp_v2_signals(&user(), &issuer(), 1, 1_700_000_000, &schema, 3, &[2020]);
        assert_eq!(signals.len(), AtomicQueryMtpV2PubSignals::LEN);
        let parsed = AtomicQueryMtpV2PubSignals::parse(&signals).unwrap();
        assert!(parsed.merklized);
        assert_eq!(parsed.user_id, user());
        assert_eq!(parsed.issuer_id, issuer());
        assert_eq!(parsed.request_id, BigUint::from(1u32));
        assert_eq!(parsed.timestamp, 1_700_000_000);
        assert_eq!(parsed.claim_schema, schema);
        assert_eq!(parsed.operator, 3);
        assert_eq!(parsed.value[0], BigUint::from(2020u32));
        assert_eq!(parsed.value.len(), QUERY_VALUE_ARRAY_SIZE);
    }

    #[test]
    fn test_mtp_v2_wrong_count() {
        let signals = vec!["0".to_string(); 10];
        assert!(matches!(
            AtomicQueryMtpV2PubSignals::parse(&signals),
            Err(SignalsError::Count { expected: 77, got: 10, .. })
        ));
    }

    #[test]
    fn test_flags_must_be_bits() {
        let mut signals =
            mtp_v2_signals(&user(), &issuer(), 1, 0, &BigUint::from(0u32), 0, &[]);
        signals[0] = "2".into();
        assert!(matches!(
            AtomicQueryMtpV2PubSignals::parse(&signals),
            Err(SignalsError::Range("merklized"))
        ));
    }
}
