// src/services/iden3comm.rs
//! iden3comm agent endpoint.
//!
//! Wallets post ZKP-packed messages here. The only message handled is the
//! credential fetch request, answered with an issuance response carrying the
//! stored credential. The dispatcher keeps no state between messages.

use crate::error::{ErrorKind, HasErrorKind};
use crate::iden3comm::packer::{pack_plain, Packer, PackerError};
use crate::models::did::{Did, DidError};
use crate::models::protocol::{
    BasicMessage, CredentialFetchRequestBody, CredentialIssuanceResponse,
    CredentialIssuanceResponseBody, Message, CREDENTIAL_FETCH_REQUEST_TYPE,
    CREDENTIAL_ISSUANCE_RESPONSE_TYPE, MEDIA_TYPE_PLAIN,
};
use crate::services::credential_issuer::{CredentialIssuer, IssuerError};
use crate::storage::credential_repository::{CredentialRepository, RepositoryError};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("error unpacking message: {0}")]
    EnvelopeInvalid(#[from] PackerError),

    #[error("unknown message type: {0}")]
    UnsupportedMessageType(String),

    #[error("failed request. empty '{0}' field")]
    MalformedHeader(&'static str),

    #[error("invalid body: {0}")]
    Body(serde_json::Error),

    #[error("'{field}' field invalid did: {source}")]
    InvalidDid {
        field: &'static str,
        #[source]
        source: DidError,
    },

    #[error("credentials of {0} are not served here")]
    UnknownIssuer(String),

    #[error("failed get claim by claimID '{0}'")]
    CredentialNotFound(String),

    #[error("claim doesn't relate to sender")]
    CredentialNotForSender,

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to issue demo credential: {0}")]
    Issuance(#[from] IssuerError),

    #[error("failed marshal response: {0}")]
    Marshal(serde_json::Error),
}

impl HasErrorKind for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::CredentialNotFound(_) => ErrorKind::NotFound,
            DispatchError::Repository(_) | DispatchError::Marshal(_) => ErrorKind::Internal,
            DispatchError::Issuance(err) => err.kind(),
            _ => ErrorKind::Malformed,
        }
    }
}

pub struct Iden3commService {
    packer: Arc<dyn Packer>,
    repository: Arc<dyn CredentialRepository>,
    demo_issuer: Option<CredentialIssuer>,
}

impl Iden3commService {
    pub fn new(packer: Arc<dyn Packer>, repository: Arc<dyn CredentialRepository>) -> Self {
        Self {
            packer,
            repository,
            demo_issuer: None,
        }
    }

    /// Demo mode: fetch requests mint a fresh degree credential with `issuer`
    /// instead of reading the repository.
    pub fn with_demo_issuer(mut self, issuer: CredentialIssuer) -> Self {
        self.demo_issuer = Some(issuer);
        self
    }

    /// Handles one envelope.
    ///
    /// # Returns
    /// The serialised reply message.
    pub async fn handle(&self, envelope: &[u8]) -> Result<Vec<u8>, DispatchError> {
        let message = self.packer.unpack(envelope).await?;
        let reply = match message.message_type.as_str() {
            CREDENTIAL_FETCH_REQUEST_TYPE => self.handle_credential_fetch(message).await?,
            other => return Err(DispatchError::UnsupportedMessageType(other.to_string())),
        };
        pack_plain(&reply).map_err(DispatchError::Marshal)
    }

    async fn handle_credential_fetch(
        &self,
        message: BasicMessage,
    ) -> Result<CredentialIssuanceResponse, DispatchError> {
        if message.to.is_empty() {
            return Err(DispatchError::MalformedHeader("to"));
        }
        if message.from.is_empty() {
            return Err(DispatchError::MalformedHeader("from"));
        }
        let request: Message<CredentialFetchRequestBody> =
            message.into_typed().map_err(DispatchError::Body)?;

        let issuer: Did = request
            .to
            .parse()
            .map_err(|source| DispatchError::InvalidDid { field: "to", source })?;
        let holder: Did = request
            .from
            .parse()
            .map_err(|source| DispatchError::InvalidDid { field: "from", source })?;

        let credential = match &self.demo_issuer {
            Some(minter) => {
                if *minter.issuer_did() != issuer {
                    return Err(DispatchError::UnknownIssuer(issuer.to_string()));
                }
                log::info!("demo mode: minting degree credential for {}", holder);
                minter.mint_degree(&holder.to_string()).await?
            }
            None => {
                let credential = self
                    .repository
                    .get(&issuer.to_string(), &request.body.id)
                    .await?
                    .ok_or_else(|| DispatchError::CredentialNotFound(request.body.id.clone()))?;
                if credential.subject_id() != Some(holder.to_string().as_str()) {
                    return Err(DispatchError::CredentialNotForSender);
                }
                credential
            }
        };

        log::info!("delivering {} to {}", credential.id, holder);
        Ok(Message {
            id: Uuid::new_v4().to_string(),
            typ: MEDIA_TYPE_PLAIN.to_string(),
            message_type: CREDENTIAL_ISSUANCE_RESPONSE_TYPE.to_string(),
            thid: request.thid,
            body: CredentialIssuanceResponseBody { credential },
            from: request.to,
            to: request.from,
        })
    }
}
