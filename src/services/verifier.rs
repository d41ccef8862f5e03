// src/services/verifier.rs
//! Full verification of authorization responses.
//!
//! A wallet answers an [`AuthorizationRequest`] with a JWZ envelope holding an
//! [`AuthorizationResponse`]. [`FullVerifier`] authenticates the envelope,
//! matches the response to the request, and checks every requested proof
//! against its circuit key, its query, the queried field's place in the
//! credential's JSON-LD context and the on-chain issuer state.

use crate::blockchain::state_client::{StateError, StateResolver, REPLACED_STATE_MAX_AGE};
use crate::error::{ErrorKind, HasErrorKind};
use crate::iden3comm::packer::{Packer, PackerError};
use crate::models::did::{Did, DidError};
use crate::models::protocol::{
    AuthorizationRequest, AuthorizationResponse, ZeroKnowledgeProofRequest,
    ZeroKnowledgeProofResponse, AUTHORIZATION_RESPONSE_TYPE, CIRCUIT_ATOMIC_QUERY_MTP_V2,
};
use crate::storage::document_loader::{DocumentError, DocumentLoader};
use crate::zkp::proof_verification::{ProofError, VerificationKeys};
use crate::zkp::pub_signals::{AtomicQueryMtpV2PubSignals, SignalsError};
use crate::zkp::query::{check_claim_path, check_query, QueryError};
use async_trait::async_trait;
use chrono::Utc;
use num_bigint::BigUint;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// How old a query proof's timestamp may be.
pub const DEFAULT_PROOF_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("envelope rejected: {0}")]
    Envelope(#[from] PackerError),

    #[error("expected an authorization response, got '{0}'")]
    UnexpectedMessageType(String),

    #[error("authorization response body: {0}")]
    Body(serde_json::Error),

    #[error("response thread {got} does not answer request thread {expected}")]
    ThreadMismatch { expected: String, got: String },

    #[error("response is addressed to {got}, request was sent by {expected}")]
    RecipientMismatch { expected: String, got: String },

    #[error("sender DID: {0}")]
    Sender(#[from] DidError),

    #[error("no proof for required request {0}")]
    MissingProof(u32),

    #[error("proof {id} uses circuit '{got}', request asked for '{expected}'")]
    CircuitMismatch {
        id: u32,
        expected: String,
        got: String,
    },

    #[error("circuit '{0}' is not supported for queries")]
    UnsupportedCircuit(String),

    #[error("proof {id}: {source}")]
    Proof {
        id: u32,
        #[source]
        source: ProofError,
    },

    #[error("proof {id} signals: {source}")]
    Signals {
        id: u32,
        #[source]
        source: SignalsError,
    },

    #[error("proof {0} was generated for another identity than the sender")]
    UserMismatch(u32),

    #[error("proof {0} answers another request id")]
    RequestIdMismatch(u32),

    #[error("proof {id} query: {source}")]
    Query {
        id: u32,
        #[source]
        source: QueryError,
    },

    #[error("proof {id} context: {source}")]
    Context {
        id: u32,
        #[source]
        source: DocumentError,
    },

    #[error("proof {id} issuer state: {source}")]
    IssuerState {
        id: u32,
        #[source]
        source: StateError,
    },

    #[error("proof {id} non-revocation state: {source}")]
    NonRevocationState {
        id: u32,
        #[source]
        source: StateError,
    },

    #[error("proof {id} is {age_secs}s old")]
    ProofExpired { id: u32, age_secs: i64 },
}

impl HasErrorKind for VerifyError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Unauthorized
    }
}

/// The full-verification routine used by the login and verification flows.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Verifies `token` as the answer to `request`.
    ///
    /// # Returns
    /// The authenticated response; its `from` is the holder DID.
    async fn full_verify(
        &self,
        token: &[u8],
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, VerifyError>;
}

pub struct FullVerifier {
    packer: Arc<dyn Packer>,
    keys: Arc<VerificationKeys>,
    state: Arc<dyn StateResolver>,
    documents: Arc<dyn DocumentLoader>,
    proof_max_age: Duration,
}

impl FullVerifier {
    /// Creates a verifier.
    ///
    /// # Arguments
    /// * `packer` - authenticates envelopes (including the GIST root check)
    /// * `keys` - verification keys of the query circuits
    /// * `state` - State contract access for issuer state lookups
    /// * `documents` - source of the JSON-LD contexts queries refer to
    pub fn new(
        packer: Arc<dyn Packer>,
        keys: Arc<VerificationKeys>,
        state: Arc<dyn StateResolver>,
        documents: Arc<dyn DocumentLoader>,
    ) -> Self {
        Self {
            packer,
            keys,
            state,
            documents,
            proof_max_age: DEFAULT_PROOF_MAX_AGE,
        }
    }

    pub fn with_proof_max_age(mut self, max_age: Duration) -> Self {
        self.proof_max_age = max_age;
        self
    }

    async fn verify_scope_entry(
        &self,
        sender: &Did,
        requested: &ZeroKnowledgeProofRequest,
        response: &ZeroKnowledgeProofResponse,
    ) -> Result<(), VerifyError> {
        let id = requested.id;
        if response.circuit_id != requested.circuit_id {
            return Err(VerifyError::CircuitMismatch {
                id,
                expected: requested.circuit_id.clone(),
                got: response.circuit_id.clone(),
            });
        }
        if requested.circuit_id != CIRCUIT_ATOMIC_QUERY_MTP_V2 {
            return Err(VerifyError::UnsupportedCircuit(requested.circuit_id.clone()));
        }

        self.keys
            .verify(&requested.circuit_id, &response.zkp)
            .map_err(|source| VerifyError::Proof { id, source })?;
        let signals = AtomicQueryMtpV2PubSignals::parse(&response.zkp.pub_signals)
            .map_err(|source| VerifyError::Signals { id, source })?;

        if signals.user_id != *sender.id() {
            return Err(VerifyError::UserMismatch(id));
        }
        if signals.request_id != BigUint::from(id) {
            return Err(VerifyError::RequestIdMismatch(id));
        }
        let query = &requested.query;
        let predicate =
            check_query(query, &signals).map_err(|source| VerifyError::Query { id, source })?;
        if !predicate.fields.is_empty() {
            let document = self
                .documents
                .load(&query.context)
                .await
                .map_err(|source| VerifyError::Context { id, source })?;
            check_claim_path(&predicate, &query.typ, &signals, &document)
                .map_err(|source| VerifyError::Query { id, source })?;
        }

        let now = Utc::now().timestamp();
        let issuer = signals.issuer_id.to_big_int();
        self.state
            .resolve_state(&issuer, &signals.issuer_claim_iden_state)
            .await
            .and_then(|s| s.ensure_fresh(now, REPLACED_STATE_MAX_AGE))
            .map_err(|source| VerifyError::IssuerState { id, source })?;
        if signals.is_revocation_checked {
            self.state
                .resolve_state(&issuer, &signals.issuer_claim_non_rev_state)
                .await
                .and_then(|s| s.ensure_fresh(now, REPLACED_STATE_MAX_AGE))
                .map_err(|source| VerifyError::NonRevocationState { id, source })?;
        }

        let age_secs = now - signals.timestamp;
        if age_secs > self.proof_max_age.as_secs() as i64 {
            return Err(VerifyError::ProofExpired { id, age_secs });
        }
        Ok(())
    }
}

#[async_trait]
impl AuthVerifier for FullVerifier {
    async fn full_verify(
        &self,
        token: &[u8],
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationResponse, VerifyError> {
        let message = self.packer.unpack(token).await?;
        if message.message_type != AUTHORIZATION_RESPONSE_TYPE {
            return Err(VerifyError::UnexpectedMessageType(message.message_type));
        }
        let response: AuthorizationResponse = message.into_typed().map_err(VerifyError::Body)?;

        if response.thid != request.thid {
            return Err(VerifyError::ThreadMismatch {
                expected: request.thid.clone(),
                got: response.thid,
            });
        }
        if !request.from.is_empty() && !response.to.is_empty() && response.to != request.from {
            return Err(VerifyError::RecipientMismatch {
                expected: request.from.clone(),
                got: response.to,
            });
        }
        let sender: Did = response.from.parse()?;

        for requested in &request.body.scope {
            let answer = response.body.scope.iter().find(|r| r.id == requested.id);
            match answer {
                Some(answer) => self.verify_scope_entry(&sender, requested, answer).await?,
                None if requested.optional == Some(true) => continue,
                None => return Err(VerifyError::MissingProof(requested.id)),
            }
        }

        log::debug!(
            "verified {} proofs from {} for thread {}",
            request.body.scope.len(),
            response.from,
            response.thid
        );
        Ok(response)
    }
}
