// src/models/credential.rs
//! Verifiable Credential data model and builder.
//!
//! Credentials follow the [W3C Verifiable Credentials Data Model](https://www.w3.org/TR/vc-data-model/)
//! with the iden3 extensions: the status of every credential lives in an
//! on-chain Sparse Merkle Tree owned by the issuer's identity contract, and
//! `credentialStatus.id` is the only pointer a relying party gets to it.

use crate::error::{ErrorKind, HasErrorKind};
use crate::models::did::{Did, DidError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub const W3C_CREDENTIAL_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
pub const IDEN3_PROOFS_CONTEXT: &str = "https://schema.iden3.io/core/jsonld/iden3proofs.jsonld";
pub const VERIFIABLE_CREDENTIAL_TYPE: &str = "VerifiableCredential";
pub const JSON_SCHEMA_VALIDATOR: &str = "JsonSchemaValidator2018";
pub const ONCHAIN_STATUS_TYPE: &str = "Iden3OnchainSparseMerkleTreeProof2023";

/// Credential id prefix. Repositories key credentials by the bare UUID.
pub const CREDENTIAL_ID_PREFIX: &str = "uri:uuid:";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("schema has no $metadata.uris.jsonLdContext entry")]
    InvalidSchema,

    #[error("issuer DID cannot anchor credential status: {0}")]
    InvalidIssuerDid(#[from] DidError),

    #[error("invalid credential request: {0}")]
    InvalidRequest(String),
}

impl HasErrorKind for CredentialError {
    fn kind(&self) -> ErrorKind {
        match self {
            CredentialError::InvalidSchema | CredentialError::InvalidRequest(_) => {
                ErrorKind::Malformed
            }
            CredentialError::InvalidIssuerDid(_) => ErrorKind::Internal,
        }
    }
}

/// Caller-supplied description of a credential to mint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRequest {
    /// URL of the JSON schema.
    pub credential_schema: String,

    #[serde(rename = "type")]
    pub typ: String,

    pub credential_subject: Map<String, Value>,

    /// Absolute expiry in seconds since the epoch; 0 means none.
    #[serde(default)]
    pub expiration: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev_nonce: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_position: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merklized_root_position: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSchema {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

/// On-chain status descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
    pub revocation_nonce: u64,
}

/// An assembled W3C credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct W3CCredential {
    pub id: String,

    #[serde(rename = "@context")]
    pub context: Vec<String>,

    #[serde(rename = "type")]
    pub typ: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<DateTime<Utc>>,

    pub issuance_date: DateTime<Utc>,

    pub credential_subject: Map<String, Value>,

    pub credential_status: CredentialStatus,

    pub issuer: String,

    pub credential_schema: CredentialSchema,
}

impl W3CCredential {
    /// The `credentialSubject.id` attribute, when present.
    pub fn subject_id(&self) -> Option<&str> {
        self.credential_subject.get("id").and_then(Value::as_str)
    }

    /// The id without its `uri:uuid:` prefix.
    pub fn bare_id(&self) -> &str {
        self.id.strip_prefix(CREDENTIAL_ID_PREFIX).unwrap_or(&self.id)
    }
}

/// Builds the on-chain status descriptor for a credential issued by `issuer`.
///
/// # Returns
/// A status whose id has the form
/// `<issuerDID>/credentialStatus?revocationNonce=<n>&contractAddress=<chainID>:<0xaddr>`
/// with a decimal chain id and a lower-case address.
pub fn build_onchain_status(
    issuer: &Did,
    request: &CredentialRequest,
) -> Result<CredentialStatus, CredentialError> {
    let (chain_id, address) = issuer.chain_and_address()?;
    let nonce = request.rev_nonce.unwrap_or(0);
    Ok(CredentialStatus {
        id: format!(
            "{}/credentialStatus?revocationNonce={}&contractAddress={}:0x{:x}",
            issuer, nonce, chain_id, address
        ),
        typ: ONCHAIN_STATUS_TYPE.to_string(),
        revocation_nonce: nonce,
    })
}

/// Extracts `$metadata.uris.jsonLdContext` from a JSON schema document.
pub fn json_ld_context(schema: &Value) -> Option<&str> {
    schema
        .pointer("/$metadata/uris/jsonLdContext")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Assembles a W3C credential for `request`, issued by `issuer`.
///
/// # Arguments
/// * `issuer` - issuer DID; must be derived from a contract address
/// * `request` - what to mint; its subject gains a `type` attribute
/// * `schema` - the JSON schema document the request points at
///
/// # Errors
/// - `InvalidRequest` if the schema URL or type is empty, or the expiration is out of range
/// - `InvalidSchema` if the schema carries no JSON-LD context
/// - `InvalidIssuerDid` if no chain id/address can be derived from `issuer`
pub fn build_credential(
    issuer: &Did,
    mut request: CredentialRequest,
    schema: &Value,
) -> Result<W3CCredential, CredentialError> {
    if request.credential_schema.is_empty() {
        return Err(CredentialError::InvalidRequest(
            "credentialSchema is empty".into(),
        ));
    }
    if request.typ.is_empty() {
        return Err(CredentialError::InvalidRequest("type is empty".into()));
    }

    let context = json_ld_context(schema)
        .ok_or(CredentialError::InvalidSchema)?
        .to_string();

    let expiration_date = match request.expiration {
        0 => None,
        secs => Some(Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
            CredentialError::InvalidRequest(format!("expiration {} is out of range", secs))
        })?),
    };

    let credential_status = build_onchain_status(issuer, &request)?;

    request
        .credential_subject
        .insert("type".to_string(), Value::String(request.typ.clone()));

    Ok(W3CCredential {
        id: format!("{}{}", CREDENTIAL_ID_PREFIX, Uuid::new_v4()),
        context: vec![
            W3C_CREDENTIAL_CONTEXT.to_string(),
            IDEN3_PROOFS_CONTEXT.to_string(),
            context,
        ],
        typ: vec![VERIFIABLE_CREDENTIAL_TYPE.to_string(), request.typ],
        expiration_date,
        issuance_date: Utc::now(),
        credential_subject: request.credential_subject,
        credential_status,
        issuer: issuer.to_string(),
        credential_schema: CredentialSchema {
            id: request.credential_schema,
            typ: JSON_SCHEMA_VALIDATOR.to_string(),
        },
    })
}
