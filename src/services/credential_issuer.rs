// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Issues W3C credentials as the configured issuer DID. Each credential's
//! schema document is fetched over HTTP for its JSON-LD context, the
//! credential is assembled with an on-chain status descriptor, and stored in
//! the credential repository, from where holders fetch it over iden3comm.

use crate::blockchain::state_client::{RevocationStatus, RevocationStatusResolver, StateError};
use crate::error::{ErrorKind, HasErrorKind};
use crate::models::credential::{build_credential, CredentialError, CredentialRequest, W3CCredential};
use crate::models::did::{Did, DidError};
use crate::models::protocol::{
    CredentialOffer, CredentialOfferBody, CredentialOfferItem, Message, CREDENTIAL_OFFER_TYPE,
};
use crate::storage::credential_repository::{CredentialRepository, RepositoryError};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use thiserror::Error;

pub const DEGREE_CREDENTIAL_TYPE: &str = "DegreeCredential";

#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("cannot fetch schema {url}: {source}")]
    SchemaFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("credential {0} not found")]
    NotFound(String),

    #[error("issuer DID has no status contract: {0}")]
    Issuer(#[from] DidError),

    #[error("revocation status unavailable: {0}")]
    RevocationStatus(#[from] StateError),
}

impl HasErrorKind for IssuerError {
    fn kind(&self) -> ErrorKind {
        match self {
            IssuerError::SchemaFetch { .. } => ErrorKind::Malformed,
            IssuerError::Credential(err) => err.kind(),
            IssuerError::Repository(err) => err.kind(),
            IssuerError::NotFound(_) | IssuerError::RevocationStatus(StateError::Unknown) => {
                ErrorKind::NotFound
            }
            IssuerError::Issuer(_) | IssuerError::RevocationStatus(_) => ErrorKind::Internal,
        }
    }
}

/// Service issuing credentials as one issuer identity.
///
/// Cloning is cheap: the repository and HTTP client are shared.
#[derive(Clone)]
pub struct CredentialIssuer {
    /// DID credentials are issued as
    issuer: Did,

    /// Where issued credentials are kept
    repository: Arc<dyn CredentialRepository>,

    /// On-chain revocation trees
    revocation: Arc<dyn RevocationStatusResolver>,

    /// Client used for schema documents
    http: reqwest::Client,

    /// Schema of the demo degree credential
    degree_schema_url: String,
}

impl CredentialIssuer {
    /// Creates a new CredentialIssuer instance
    ///
    /// # Arguments
    /// * `issuer` - issuer DID; must be derived from a State contract address
    /// * `repository` - storage for issued credentials
    /// * `revocation` - reader of the issuer's on-chain revocation tree
    /// * `degree_schema_url` - schema used by [`mint_degree`](Self::mint_degree)
    pub fn new(
        issuer: Did,
        repository: Arc<dyn CredentialRepository>,
        revocation: Arc<dyn RevocationStatusResolver>,
        degree_schema_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer,
            repository,
            revocation,
            http: reqwest::Client::new(),
            degree_schema_url: degree_schema_url.into(),
        }
    }

    pub fn issuer_did(&self) -> &Did {
        &self.issuer
    }

    /// Fetches a JSON schema document.
    ///
    /// # Returns
    /// The parsed document, or `SchemaFetch` on transport, status or JSON errors
    pub async fn fetch_schema(&self, url: &str) -> Result<Value, IssuerError> {
        let fetch_error = |source| IssuerError::SchemaFetch {
            url: url.to_string(),
            source,
        };
        self.http
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_error)?
            .json()
            .await
            .map_err(fetch_error)
    }

    /// Issues and stores a credential
    ///
    /// # Arguments
    /// * `request` - what to issue; `credentialSchema` must point at a JSON schema
    ///   carrying `$metadata.uris.jsonLdContext`
    ///
    /// # Returns
    /// The stored credential
    pub async fn issue(&self, request: CredentialRequest) -> Result<W3CCredential, IssuerError> {
        if request.credential_schema.is_empty() {
            return Err(CredentialError::InvalidRequest("credentialSchema is empty".into()).into());
        }
        let schema = self.fetch_schema(&request.credential_schema).await?;
        let credential = build_credential(&self.issuer, request, &schema)?;
        self.repository
            .save(&self.issuer.to_string(), credential.clone())
            .await?;
        log::info!(
            "issued {} to {}",
            credential.id,
            credential.subject_id().unwrap_or("<no subject>")
        );
        Ok(credential)
    }

    /// Looks up an issued credential by id, with or without its `uri:uuid:` prefix.
    pub async fn get(&self, claim_id: &str) -> Result<W3CCredential, IssuerError> {
        self.repository
            .get(&self.issuer.to_string(), claim_id)
            .await?
            .ok_or_else(|| IssuerError::NotFound(claim_id.to_string()))
    }

    /// Lists issued credentials, optionally only those of `subject`.
    pub async fn list(&self, subject: Option<&str>) -> Result<Vec<W3CCredential>, IssuerError> {
        Ok(self
            .repository
            .list(&self.issuer.to_string(), subject)
            .await?)
    }

    /// Builds the offer message telling `subject` where to fetch `claim_id`.
    ///
    /// # Arguments
    /// * `subject` - holder DID the offer is addressed to
    /// * `claim_id` - an issued credential's id
    /// * `agent_url` - the iden3comm endpoint the wallet fetches from
    pub async fn offer(
        &self,
        subject: &str,
        claim_id: &str,
        agent_url: &str,
    ) -> Result<CredentialOffer, IssuerError> {
        let credential = self.get(claim_id).await?;
        let description = credential
            .typ
            .last()
            .cloned()
            .unwrap_or_else(|| "VerifiableCredential".to_string());
        let mut offer = Message::new_thread(
            CREDENTIAL_OFFER_TYPE,
            self.issuer.to_string(),
            CredentialOfferBody {
                url: agent_url.to_string(),
                credentials: vec![CredentialOfferItem {
                    id: credential.bare_id().to_string(),
                    description,
                }],
            },
        );
        offer.to = subject.to_string();
        Ok(offer)
    }

    /// Reads the revocation status of `nonce` from the status contract named
    /// in this issuer's credentials, which is the issuer DID's own address.
    pub async fn revocation_status(&self, nonce: u64) -> Result<RevocationStatus, IssuerError> {
        let (_, contract) = self.issuer.chain_and_address()?;
        let status = self
            .revocation
            .revocation_status(contract, &self.issuer.id().to_big_int(), nonce)
            .await?;
        log::debug!("revocation nonce {} revoked: {}", nonce, status.is_revoked());
        Ok(status)
    }

    /// Issues a sample degree credential to `holder`.
    pub async fn mint_degree(&self, holder: &str) -> Result<W3CCredential, IssuerError> {
        let mut subject = Map::new();
        subject.insert("id".into(), json!(holder));
        subject.insert("degree".into(), json!("Bachelor of Computer Science"));
        subject.insert("name".into(), json!("Demo User"));
        subject.insert("university".into(), json!("Demo University"));
        subject.insert("graduationYear".into(), json!(2024));

        self.issue(CredentialRequest {
            credential_schema: self.degree_schema_url.clone(),
            typ: DEGREE_CREDENTIAL_TYPE.to_string(),
            credential_subject: subject,
            expiration: 0,
            version: None,
            rev_nonce: None,
            subject_position: None,
            merklized_root_position: None,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::state_client::test_support::FixedRevocation;
    use crate::models::did::{did_from_contract, Blockchain, DidMethod, Network};
    use crate::storage::credential_repository::InMemoryCredentialRepository;
    use ethers_core::types::Address;
    use mockito::mock;

    const HOLDER: &str = "did:iden3:privado:test:2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfGdm";

    fn issuer_did() -> Did {
        did_from_contract(
            DidMethod::Iden3,
            Blockchain::Privado,
            Network::Test,
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap()
    }

    fn issuer(schema_path: &str) -> CredentialIssuer {
        CredentialIssuer::new(
            issuer_did(),
            Arc::new(InMemoryCredentialRepository::new()),
            Arc::new(FixedRevocation::default()),
            format!("{}{}", mockito::server_url(), schema_path),
        )
    }

    fn schema_body() -> String {
        json!({
            "$metadata": {
                "uris": { "jsonLdContext": "https://example.com/degree.jsonld" }
            },
            "type": "object"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_mint_degree_stores_credential() {
        let _m = mock("GET", "/issuer-degree.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(schema_body())
            .create();
        let issuer = issuer("/issuer-degree.json");

        let vc = issuer.mint_degree(HOLDER).await.unwrap();
        assert_eq!(vc.subject_id(), Some(HOLDER));
        assert_eq!(vc.credential_subject["type"], json!(DEGREE_CREDENTIAL_TYPE));
        assert_eq!(vc.context[2], "https://example.com/degree.jsonld");
        assert!(vc.credential_status.id.ends_with(
            "?revocationNonce=0&contractAddress=21001:0x0000000000000000000000000000000000000001"
        ));

        let stored = issuer.get(vc.bare_id()).await.unwrap();
        assert_eq!(stored, vc);
        assert_eq!(issuer.list(Some(HOLDER)).await.unwrap().len(), 1);
        assert!(issuer.list(Some("did:other")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_schema_without_context_is_rejected() {
        let _m = mock("GET", "/issuer-bare.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"type":"object"}"#)
            .create();
        let issuer = issuer("/issuer-bare.json");
        let err = issuer.mint_degree(HOLDER).await.unwrap_err();
        assert!(matches!(
            err,
            IssuerError::Credential(CredentialError::InvalidSchema)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_schema() {
        let _m = mock("GET", "/issuer-missing.json").with_status(404).create();
        let issuer = issuer("/issuer-missing.json");
        let err = issuer.mint_degree(HOLDER).await.unwrap_err();
        assert!(matches!(err, IssuerError::SchemaFetch { .. }));
        assert_eq!(err.kind(), ErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_offer_points_at_agent() {
        let _m = mock("GET", "/issuer-offer.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(schema_body())
            .create();
        let issuer = issuer("/issuer-offer.json");
        let vc = issuer.mint_degree(HOLDER).await.unwrap();

        let offer = issuer
            .offer(HOLDER, &vc.id, "https://issuer.example/api/v1/agent")
            .await
            .unwrap();
        assert_eq!(offer.message_type, CREDENTIAL_OFFER_TYPE);
        assert_eq!(offer.id, offer.thid);
        assert_eq!(offer.from, issuer.issuer_did().to_string());
        assert_eq!(offer.to, HOLDER);
        assert_eq!(offer.body.url, "https://issuer.example/api/v1/agent");
        assert_eq!(offer.body.credentials[0].id, vc.bare_id());
        assert_eq!(offer.body.credentials[0].description, DEGREE_CREDENTIAL_TYPE);

        let err = issuer.offer(HOLDER, "missing", "x").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_revocation_status_reads_issuer_contract() {
        let revocation = Arc::new(FixedRevocation {
            revoked: true,
            ..Default::default()
        });
        let issuer = CredentialIssuer::new(
            issuer_did(),
            Arc::new(InMemoryCredentialRepository::new()),
            revocation.clone(),
            "http://unused",
        );

        let status = issuer.revocation_status(42).await.unwrap();
        assert!(status.is_revoked());
        let lookups = revocation.lookups.lock().unwrap();
        assert_eq!(
            lookups[0],
            (
                Address::from_low_u64_be(1),
                issuer_did().id().to_big_int(),
                42
            )
        );
    }

    #[test]
    fn test_revocation_error_kinds() {
        assert_eq!(
            IssuerError::RevocationStatus(StateError::Unknown).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            IssuerError::RevocationStatus(StateError::Rpc("down".into())).kind(),
            ErrorKind::Internal
        );
    }
}
