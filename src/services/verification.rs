// src/services/verification.rs
//! Credential verification flow.
//!
//! A relying party asks for proof that the holder has a credential of a given
//! type satisfying a predicate, optionally disclosing some fields. The
//! request carries one `credentialAtomicQueryMTPV2` query; the wallet's
//! answer is always fully verified, whatever the demo settings.

use crate::error::{ErrorKind, HasErrorKind};
use crate::models::did::Did;
use crate::models::protocol::{
    AuthorizationRequest, AuthorizationRequestBody, Message, Query, ZeroKnowledgeProofRequest,
    AUTHORIZATION_REQUEST_TYPE, CIRCUIT_ATOMIC_QUERY_MTP_V2,
};
use crate::services::authentication::allocate_session;
use crate::services::session_store::{Session, SessionError, SessionStore};
use crate::services::verifier::{AuthVerifier, VerifyError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Upper bound (exclusive) of verification session ids.
const VERIFICATION_SESSION_RANGE: u32 = 10_000_000;

/// Id of the single query in a verification request.
const QUERY_REQUEST_ID: u32 = 1;

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("unknown verification session {0}")]
    SessionUnknown(String),

    #[error("verification session {0} is already closed")]
    AlreadyClosed(String),

    #[error("proof rejected: {0}")]
    ProofInvalid(#[from] VerifyError),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("could not allocate a verification session")]
    SessionExhausted,
}

impl HasErrorKind for VerificationError {
    fn kind(&self) -> ErrorKind {
        match self {
            VerificationError::SessionUnknown(_) => ErrorKind::NotFound,
            VerificationError::AlreadyClosed(_) | VerificationError::ProofInvalid(_) => {
                ErrorKind::Unauthorized
            }
            VerificationError::InvalidRequest(_) => ErrorKind::Malformed,
            VerificationError::SessionExhausted => ErrorKind::Internal,
        }
    }
}

impl From<SessionError> for VerificationError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unknown(id) => VerificationError::SessionUnknown(id),
            SessionError::AlreadyClosed(id) => VerificationError::AlreadyClosed(id),
        }
    }
}

/// What a relying party wants proven.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    #[serde(default)]
    pub credential_type: String,
    #[serde(default)]
    pub schema_url: String,
    /// Field name to operator object, e.g. `{"graduationYear": {"$gt": 2020}}`.
    #[serde(default)]
    pub query: Map<String, Value>,
    /// Field names to disclose.
    #[serde(default)]
    pub disclose: Vec<String>,
}

impl VerificationRequest {
    fn validate(&self) -> Result<(), VerificationError> {
        if self.credential_type.is_empty() {
            return Err(VerificationError::InvalidRequest(
                "credentialType is required".into(),
            ));
        }
        if self.schema_url.is_empty() {
            return Err(VerificationError::InvalidRequest("schemaUrl is required".into()));
        }
        Ok(())
    }
}

/// Merges predicates and disclosures into a `credentialSubject` map.
///
/// A field both queried and disclosed keeps its predicate.
pub fn merge_subject(query: &Map<String, Value>, disclose: &[String]) -> Map<String, Value> {
    let mut subject = query.clone();
    for name in disclose {
        subject
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    subject
}

pub struct VerificationService {
    verifier_did: String,
    callback_url: String,
    json_ld_context: String,
    sessions: Arc<SessionStore>,
    verifier: Arc<dyn AuthVerifier>,
}

impl VerificationService {
    /// Creates the verification service.
    ///
    /// # Arguments
    /// * `verifier_did` - DID the requests are sent from
    /// * `callback_url` - URL wallets post their proofs to; `?sessionId=` is appended
    /// * `json_ld_context` - context URL placed in every query
    /// * `sessions` - store for verification sessions
    /// * `verifier` - full verification routine
    pub fn new(
        verifier_did: &Did,
        callback_url: impl Into<String>,
        json_ld_context: impl Into<String>,
        sessions: Arc<SessionStore>,
        verifier: Arc<dyn AuthVerifier>,
    ) -> Self {
        Self {
            verifier_did: verifier_did.to_string(),
            callback_url: callback_url.into(),
            json_ld_context: json_ld_context.into(),
            sessions,
            verifier,
        }
    }

    fn build_request(&self, req: &VerificationRequest, session_id: &str) -> AuthorizationRequest {
        let subject = merge_subject(&req.query, &req.disclose);
        Message::new_thread(
            AUTHORIZATION_REQUEST_TYPE,
            self.verifier_did.clone(),
            AuthorizationRequestBody {
                callback_url: format!("{}?sessionId={}", self.callback_url, session_id),
                reason: format!("Verify your {} credential", req.credential_type),
                message: None,
                scope: vec![ZeroKnowledgeProofRequest {
                    id: QUERY_REQUEST_ID,
                    circuit_id: CIRCUIT_ATOMIC_QUERY_MTP_V2.to_string(),
                    optional: None,
                    query: Query {
                        allowed_issuers: vec!["*".to_string()],
                        context: self.json_ld_context.clone(),
                        typ: req.credential_type.clone(),
                        skip_claim_revocation_check: Some(true),
                        credential_subject: Some(subject).filter(|s| !s.is_empty()),
                    },
                }],
            },
        )
    }

    /// Creates a verification request and its pending session.
    ///
    /// # Errors
    /// `InvalidRequest` if the credential type or schema URL is missing.
    pub fn new_verification_request(
        &self,
        req: &VerificationRequest,
    ) -> Result<(AuthorizationRequest, String), VerificationError> {
        req.validate()?;
        let (request, session_id) =
            allocate_session(&self.sessions, VERIFICATION_SESSION_RANGE, |session_id| {
                self.build_request(req, session_id)
            })
            .ok_or(VerificationError::SessionExhausted)?;
        log::info!(
            "verification session {} created for {} (thread {})",
            session_id,
            req.credential_type,
            request.thid
        );
        Ok((request, session_id))
    }

    /// Verifies the wallet's answer for `session_id`.
    ///
    /// # Returns
    /// The holder DID, once the session is closed as verified.
    ///
    /// # Errors
    /// - `SessionUnknown` if the session does not exist or expired
    /// - `AlreadyClosed` if it was verified before; the proof is not checked again
    /// - `ProofInvalid` if verification fails; the session stays pending
    pub async fn verify(&self, session_id: &str, token: &[u8]) -> Result<String, VerificationError> {
        let request = match self.sessions.get(session_id) {
            None => return Err(VerificationError::SessionUnknown(session_id.to_string())),
            Some(Session::Verified(_)) => {
                return Err(VerificationError::AlreadyClosed(session_id.to_string()))
            }
            Some(Session::Pending(request)) => request,
        };

        let response = self
            .verifier
            .full_verify(token, &request)
            .await
            .map_err(|err| {
                log::warn!("verification session {} rejected: {}", session_id, err);
                err
            })?;

        self.sessions.complete(session_id, &response.from)?;
        log::info!("verification session {} verified for {}", session_id, response.from);
        Ok(response.from)
    }

    /// The holder DID of a verified session.
    pub fn status(&self, session_id: &str) -> Option<String> {
        match self.sessions.get(session_id) {
            Some(Session::Verified(did)) => Some(did),
            _ => None,
        }
    }
}
