// src/services/authentication.rs
//! Wallet login.
//!
//! A login request is an authorization request with an empty scope: the
//! wallet only proves control of its identity. The session id handed to the
//! browser is a short random number used as a handle; the binding between
//! the wallet's answer and the request comes from the request's thread id.

use crate::error::{ErrorKind, HasErrorKind};
use crate::models::did::{did_from_contract, Blockchain, Did, DidError, DidMethod, Network};
use crate::models::protocol::{
    AuthorizationRequest, AuthorizationRequestBody, Message, AUTHORIZATION_REQUEST_TYPE,
};
use crate::services::session_store::{Session, SessionError, SessionStore};
use crate::services::verifier::{AuthVerifier, VerifyError};
use rand::Rng;
use std::sync::Arc;
use thiserror::Error;

pub const LOGIN_REASON: &str = "login to website";

/// Upper bound (exclusive) of login session ids.
const LOGIN_SESSION_RANGE: u32 = 1_000_000;

/// Number of identities in the demo pool.
const DEMO_POOL_SIZE: u8 = 5;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("unknown login session {0}")]
    SessionUnknown(String),

    #[error("login session {0} is already closed")]
    AlreadyClosed(String),

    #[error("login proof rejected: {0}")]
    ProofInvalid(#[from] VerifyError),

    #[error("could not allocate a login session")]
    SessionExhausted,
}

impl HasErrorKind for LoginError {
    fn kind(&self) -> ErrorKind {
        match self {
            // The login callback reports unknown sessions as bad input.
            LoginError::SessionUnknown(_) => ErrorKind::Malformed,
            LoginError::AlreadyClosed(_) | LoginError::ProofInvalid(_) => ErrorKind::Unauthorized,
            LoginError::SessionExhausted => ErrorKind::Internal,
        }
    }
}

impl From<SessionError> for LoginError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unknown(id) => LoginError::SessionUnknown(id),
            SessionError::AlreadyClosed(id) => LoginError::AlreadyClosed(id),
        }
    }
}

/// The identities demo logins resolve to: `did:iden3:privado:test` DIDs of
/// the contracts `0x00…01` through `0x00…05`.
pub fn demo_did_pool() -> Result<Vec<String>, DidError> {
    (1..=DEMO_POOL_SIZE)
        .map(|n| {
            let address = format!("0x{}{:02x}", "00".repeat(19), n);
            did_from_contract(DidMethod::Iden3, Blockchain::Privado, Network::Test, &address)
                .map(|did| did.to_string())
        })
        .collect()
}

/// Draws an unused session id below `range` and stores `request` under it.
pub(crate) fn allocate_session(
    sessions: &SessionStore,
    range: u32,
    mut request: impl FnMut(&str) -> AuthorizationRequest,
) -> Option<(AuthorizationRequest, String)> {
    let mut rng = rand::thread_rng();
    for _ in 0..16 {
        let session_id = rng.gen_range(0..range).to_string();
        let req = request(&session_id);
        if sessions.put_pending(&session_id, req.clone()) {
            return Some((req, session_id));
        }
    }
    None
}

pub struct AuthenticationService {
    issuer_did: String,
    callback_url: String,
    sessions: Arc<SessionStore>,
    verifier: Arc<dyn AuthVerifier>,
    demo_pool: Option<Vec<String>>,
}

impl AuthenticationService {
    /// Creates the login service.
    ///
    /// # Arguments
    /// * `issuer_did` - DID the login requests are sent from
    /// * `callback_url` - URL wallets post their answer to; `?sessionId=` is appended
    /// * `sessions` - store shared with nothing else
    /// * `verifier` - full verification routine
    pub fn new(
        issuer_did: &Did,
        callback_url: impl Into<String>,
        sessions: Arc<SessionStore>,
        verifier: Arc<dyn AuthVerifier>,
    ) -> Self {
        Self {
            issuer_did: issuer_did.to_string(),
            callback_url: callback_url.into(),
            sessions,
            verifier,
            demo_pool: None,
        }
    }

    /// Enables demo logins: callbacks are accepted without verification and
    /// resolve to `pool[sessionId % pool.len()]`.
    pub fn with_demo_pool(mut self, pool: Vec<String>) -> Self {
        self.demo_pool = Some(pool).filter(|p| !p.is_empty());
        self
    }

    /// Creates a login request and its pending session.
    ///
    /// # Returns
    /// The request to show the wallet and the session id to poll with.
    pub fn new_login_request(&self) -> Result<(AuthorizationRequest, String), LoginError> {
        let (request, session_id) =
            allocate_session(&self.sessions, LOGIN_SESSION_RANGE, |session_id| {
                Message::new_thread(
                    AUTHORIZATION_REQUEST_TYPE,
                    self.issuer_did.clone(),
                    AuthorizationRequestBody {
                        callback_url: format!("{}?sessionId={}", self.callback_url, session_id),
                        reason: LOGIN_REASON.to_string(),
                        message: Some(String::new()),
                        scope: Vec::new(),
                    },
                )
            })
            .ok_or(LoginError::SessionExhausted)?;
        log::info!("login session {} created (thread {})", session_id, request.thid);
        Ok((request, session_id))
    }

    /// Completes a login session with the wallet's answer.
    ///
    /// # Returns
    /// The DID of the identity that logged in.
    pub async fn handle_callback(&self, session_id: &str, token: &[u8]) -> Result<String, LoginError> {
        let request = match self.sessions.get(session_id) {
            None => return Err(LoginError::SessionUnknown(session_id.to_string())),
            Some(Session::Verified(_)) => {
                return Err(LoginError::AlreadyClosed(session_id.to_string()))
            }
            Some(Session::Pending(request)) => request,
        };

        let did = match &self.demo_pool {
            Some(pool) => {
                let n = session_id.parse::<usize>().unwrap_or(0);
                pool[n % pool.len()].clone()
            }
            None => match self.verifier.full_verify(token, &request).await {
                Ok(response) => response.from,
                Err(err) => {
                    log::warn!("login session {} rejected: {}", session_id, err);
                    return Err(err.into());
                }
            },
        };

        self.sessions.complete(session_id, &did)?;
        log::info!("login session {} verified for {}", session_id, did);
        Ok(did)
    }

    /// The DID that completed `session_id`, if any.
    pub fn status(&self, session_id: &str) -> Option<String> {
        match self.sessions.get(session_id) {
            Some(Session::Verified(did)) => Some(did),
            _ => None,
        }
    }
}
