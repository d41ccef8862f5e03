// src/models/protocol.rs
//! iden3comm message types.
//!
//! Every message shares the same header (`id`, `typ`, `type`, `thid`, `from`,
//! `to`) and differs only in its body, so [`Message`] is generic over the body
//! and the concrete protocol messages are type aliases.

use crate::models::credential::W3CCredential;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const MEDIA_TYPE_PLAIN: &str = "application/iden3comm-plain-json";
pub const MEDIA_TYPE_ZKP: &str = "application/iden3-zkp-json";

pub const AUTHORIZATION_REQUEST_TYPE: &str =
    "https://iden3-communication.io/authorization/1.0/request";
pub const AUTHORIZATION_RESPONSE_TYPE: &str =
    "https://iden3-communication.io/authorization/1.0/response";
pub const CREDENTIAL_FETCH_REQUEST_TYPE: &str =
    "https://iden3-communication.io/credentials/1.0/fetch-request";
pub const CREDENTIAL_ISSUANCE_RESPONSE_TYPE: &str =
    "https://iden3-communication.io/credentials/1.0/issuance-response";
pub const CREDENTIAL_OFFER_TYPE: &str = "https://iden3-communication.io/credentials/1.0/offer";

pub const CIRCUIT_AUTH_V2: &str = "authV2";
pub const CIRCUIT_ATOMIC_QUERY_MTP_V2: &str = "credentialAtomicQueryMTPV2";

/// An iden3comm message with body `B`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message<B> {
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub typ: String,

    #[serde(rename = "type")]
    pub message_type: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thid: String,

    pub body: B,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: String,
}

/// A message whose body has not been interpreted yet; used for routing.
pub type BasicMessage = Message<Value>;

pub type AuthorizationRequest = Message<AuthorizationRequestBody>;
pub type AuthorizationResponse = Message<AuthorizationResponseBody>;
pub type CredentialFetchRequest = Message<CredentialFetchRequestBody>;
pub type CredentialIssuanceResponse = Message<CredentialIssuanceResponseBody>;
pub type CredentialOffer = Message<CredentialOfferBody>;

impl<B> Message<B> {
    /// A plain message that opens a new thread (`thid == id`).
    pub fn new_thread(message_type: &str, from: impl Into<String>, body: B) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            thid: id.clone(),
            id,
            typ: MEDIA_TYPE_PLAIN.to_string(),
            message_type: message_type.to_string(),
            body,
            from: from.into(),
            to: String::new(),
        }
    }
}

impl BasicMessage {
    /// Reinterprets the body as `B`.
    pub fn into_typed<B: serde::de::DeserializeOwned>(self) -> Result<Message<B>, serde_json::Error> {
        Ok(Message {
            body: serde_json::from_value(self.body)?,
            id: self.id,
            typ: self.typ,
            message_type: self.message_type,
            thid: self.thid,
            from: self.from,
            to: self.to,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationRequestBody {
    pub callback_url: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub scope: Vec<ZeroKnowledgeProofRequest>,
}

/// One proof the verifier asks the holder for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZeroKnowledgeProofRequest {
    pub id: u32,
    pub circuit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
    pub query: Query,
}

/// The credential query attached to a proof request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub allowed_issuers: Vec<String>,
    pub context: String,
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_claim_revocation_check: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_subject: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthorizationResponseBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub scope: Vec<ZeroKnowledgeProofResponse>,
}

/// A proof answering one [`ZeroKnowledgeProofRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZeroKnowledgeProofResponse {
    pub id: u32,
    pub circuit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vp: Option<Value>,
    #[serde(flatten)]
    pub zkp: ZkProof,
}

/// A Groth16 proof together with its public signals, in snarkjs form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZkProof {
    pub proof: ProofData,
    pub pub_signals: Vec<String>,
}

/// snarkjs proof encoding: decimal strings, projective coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofData {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialFetchRequestBody {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialIssuanceResponseBody {
    pub credential: W3CCredential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialOfferBody {
    pub url: String,
    pub credentials: Vec<CredentialOfferItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialOfferItem {
    pub id: String,
    pub description: String,
}
