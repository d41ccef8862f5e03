// src/iden3comm/packer.rs
//! Envelope packing.
//!
//! Incoming envelopes are JWZ tokens proven with `authV2`; outgoing replies
//! are plain JSON messages.

use crate::blockchain::state_client::{StateError, StateResolver, REPLACED_STATE_MAX_AGE};
use crate::iden3comm::jwz::{Jwz, JwzError, ALG_GROTH16};
use crate::models::did::{Did, DidError};
use crate::models::protocol::{BasicMessage, CIRCUIT_AUTH_V2};
use crate::zkp::proof_verification::{ProofError, VerificationKeys};
use crate::zkp::pub_signals::{AuthV2PubSignals, SignalsError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PackerError {
    #[error("envelope is not valid UTF-8")]
    Encoding,

    #[error(transparent)]
    Token(#[from] JwzError),

    #[error("unsupported proof: alg '{alg}', circuit '{circuit}'")]
    UnsupportedProof { alg: String, circuit: String },

    #[error("envelope proof: {0}")]
    Proof(#[from] ProofError),

    #[error("envelope signals: {0}")]
    Signals(#[from] SignalsError),

    #[error("proof challenge does not match the envelope")]
    ChallengeMismatch,

    #[error("envelope payload is not an iden3comm message: {0}")]
    Payload(serde_json::Error),

    #[error("envelope sender: {0}")]
    Sender(#[from] DidError),

    #[error("envelope has no sender")]
    MissingSender,

    #[error("proof was generated by another identity than {0}")]
    SenderMismatch(String),

    #[error("GIST root: {0}")]
    GistRoot(#[from] StateError),
}

/// Unpacks envelopes into authenticated messages.
#[async_trait]
pub trait Packer: Send + Sync {
    /// Returns the message carried by `envelope` once the envelope's proof
    /// binds it to its sender.
    async fn unpack(&self, envelope: &[u8]) -> Result<BasicMessage, PackerError>;
}

/// Packer for `application/iden3-zkp-json` envelopes.
pub struct ZkpPacker {
    keys: Arc<VerificationKeys>,
    state: Arc<dyn StateResolver>,
}

impl ZkpPacker {
    pub fn new(keys: Arc<VerificationKeys>, state: Arc<dyn StateResolver>) -> Self {
        Self { keys, state }
    }
}

#[async_trait]
impl Packer for ZkpPacker {
    /// # Checks, in order
    /// 1. the token parses and declares a groth16 `authV2` proof
    /// 2. the proof verifies against the `authV2` key
    /// 3. the proof's challenge commits to this header and payload
    /// 4. the proof's user is the message's `from` DID
    /// 5. the proof's GIST root is known on-chain and fresh
    async fn unpack(&self, envelope: &[u8]) -> Result<BasicMessage, PackerError> {
        let token = std::str::from_utf8(envelope).map_err(|_| PackerError::Encoding)?;
        let jwz = Jwz::parse(token)?;

        if jwz.header.alg != ALG_GROTH16 || jwz.header.circuit_id != CIRCUIT_AUTH_V2 {
            return Err(PackerError::UnsupportedProof {
                alg: jwz.header.alg.clone(),
                circuit: jwz.header.circuit_id.clone(),
            });
        }

        self.keys.verify(CIRCUIT_AUTH_V2, &jwz.zkp)?;
        let signals = AuthV2PubSignals::parse(&jwz.zkp.pub_signals)?;
        if signals.challenge != jwz.challenge()? {
            return Err(PackerError::ChallengeMismatch);
        }

        let message: BasicMessage =
            serde_json::from_slice(&jwz.payload).map_err(PackerError::Payload)?;
        if message.from.is_empty() {
            return Err(PackerError::MissingSender);
        }
        let sender: Did = message.from.parse()?;
        if *sender.id() != signals.user_id {
            return Err(PackerError::SenderMismatch(message.from.clone()));
        }

        self.state
            .resolve_gist_root(&signals.gist_root)
            .await?
            .ensure_fresh(Utc::now().timestamp(), REPLACED_STATE_MAX_AGE)?;

        log::debug!("unpacked {} from {}", message.message_type, message.from);
        Ok(message)
    }
}

/// Serialises a reply as a plain iden3comm message.
pub fn pack_plain<T: Serialize>(message: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(message)
}


#[cfg(test)]
mod tests {
    use super::test_support::Wallet;
    use super::*;
    use crate::blockchain::state_client::test_support::FixedState;
    use crate::blockchain::state_client::ResolvedState;
    use crate::models::protocol::AUTHORIZATION_RESPONSE_TYPE;
    use serde_json::{json, Value};

    const HOLDER: &str = "did:iden3:privado:test:2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfGdm";
    const OTHER: &str = "did:iden3:privado:test:2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfcC7";

    fn message() -> Value {
        json!({
            "id": "m1",
            "typ": "application/iden3-zkp-json",
            "type": AUTHORIZATION_RESPONSE_TYPE,
            "thid": "t1",
            "from": HOLDER,
            "to": OTHER,
            "body": { "scope": [] }
        })
    }

    fn packer(wallet: &Wallet, state: FixedState) -> ZkpPacker {
        ZkpPacker::new(Arc::new(wallet.keys()), Arc::new(state))
    }

    #[tokio::test]
    async fn test_unpacks_valid_envelope() {
        let wallet = Wallet::new();
        let token = wallet.pack(&message());
        let msg = packer(&wallet, FixedState::latest())
            .unpack(token.as_bytes())
            .await
            .unwrap();
        assert_eq!(msg.from, HOLDER);
        assert_eq!(msg.thid, "t1");
    }

    #[tokio::test]
    async fn test_rejects_foreign_prover() {
        let wallet = Wallet::new();
        let token = wallet.pack_as(&OTHER.parse().unwrap(), &message());
        let err = packer(&wallet, FixedState::latest())
            .unpack(token.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PackerError::SenderMismatch(_)));
    }

    #[tokio::test]
    async fn test_rejects_swapped_payload() {
        let wallet = Wallet::new();
        let token = wallet.pack(&message());
        let mut other = message();
        other["thid"] = json!("t2");
        let forged_payload = crate::utils::serialization::to_b64url(other.to_string().as_bytes());
        let parts: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        let err = packer(&wallet, FixedState::latest())
            .unpack(forged.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PackerError::ChallengeMismatch));
    }

    #[tokio::test]
    async fn test_rejects_unknown_gist_root() {
        let wallet = Wallet::new();
        let token = wallet.pack(&message());
        let err = packer(&wallet, FixedState::answering(Err(StateError::Unknown)))
            .unpack(token.as_bytes())
            .await
            .unwrap_err();
        assert!(matches!(err, PackerError::GistRoot(StateError::Unknown)));
    }

    #[tokio::test]
    async fn test_rejects_stale_gist_root() {
        let wallet = Wallet::new();
        let token = wallet.pack(&message());
        let stale = FixedState::answering(Ok(ResolvedState {
            latest: false,
            created_at: 1,
            replaced_at: 2,
        }));
        let err = packer(&wallet, stale).unpack(token.as_bytes()).await.unwrap_err();
        assert!(matches!(err, PackerError::GistRoot(StateError::Outdated { .. })));
    }

    #[tokio::test]
    async fn test_rejects_garbage() {
        let wallet = Wallet::new();
        let err = packer(&wallet, FixedState::latest())
            .unpack(b"not a token")
            .await
            .unwrap_err();
        assert!(matches!(err, PackerError::Token(_)));
    }

    #[test]
    fn test_pack_plain() {
        let bytes = pack_plain(&json!({ "id": "x" })).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap()["id"], "x");
    }
}
