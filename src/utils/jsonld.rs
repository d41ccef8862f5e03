// src/utils/jsonld.rs
//! Just enough JSON-LD context processing to locate a credential field.
//!
//! A merklized credential is proven against the Poseidon key of the field's
//! expanded IRI path. A non-merklized one is proven against the claim slot
//! named by the type's `iden3_serialization` attribute. Both are read from
//! the credential type's context document.
//!
//! Terms, compact IRIs, `@vocab` and type- or property-scoped contexts are
//! understood. Remote contexts referenced by URL are not followed.

use crate::utils::crypto::{hash_bytes, poseidon_hash, PoseidonError};
use num_bigint::BigUint;
use serde_json::{Map, Value};
use thiserror::Error;

pub const CREDENTIAL_SUBJECT_IRI: &str = "https://www.w3.org/2018/credentials#credentialSubject";

const SERIALIZATION_TERM: &str = "iden3_serialization";
const SERIALIZATION_PREFIX: &str = "iden3:v1:";

#[derive(Debug, Error, PartialEq)]
pub enum JsonLdError {
    #[error("document has no @context")]
    MissingContext,

    #[error("type {0} is not defined by the context")]
    UnknownType(String),

    #[error("term {0} is not defined by the context")]
    UnknownTerm(String),

    #[error("{typ} does not serialize {field} into a claim slot")]
    NoSlot { typ: String, field: String },

    #[error(transparent)]
    Hash(#[from] PoseidonError),
}

/// Term definitions in scope at some point of a document.
#[derive(Debug, Clone, Default)]
struct ActiveContext {
    terms: Map<String, Value>,
    vocab: Option<String>,
}

impl ActiveContext {
    /// Merges a local context into this one. `null` resets it.
    fn apply(&mut self, context: &Value) {
        match context {
            Value::Array(items) => items.iter().for_each(|c| self.apply(c)),
            Value::Object(definitions) => {
                for (key, value) in definitions {
                    if key == "@vocab" {
                        self.vocab = value.as_str().map(str::to_string);
                    } else if !key.starts_with('@') {
                        self.terms.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Null => *self = ActiveContext::default(),
            _ => {}
        }
    }

    /// The raw `@id` a term maps to.
    fn term_id(&self, term: &str) -> Option<&str> {
        match self.terms.get(term)? {
            Value::String(id) => Some(id),
            Value::Object(definition) => definition.get("@id")?.as_str(),
            _ => None,
        }
    }

    /// The scoped `@context` of a term, if it has one.
    fn scoped_context(&self, term: &str) -> Option<&Value> {
        self.terms.get(term)?.as_object()?.get("@context")
    }

    /// Expands a compact IRI through its prefix term, or a bare name
    /// through `@vocab`. Absolute IRIs and keywords are returned as is.
    fn expand(&self, value: &str) -> Option<String> {
        if value.starts_with('@') {
            return Some(value.to_string());
        }
        if let Some((prefix, suffix)) = value.split_once(':') {
            if !suffix.starts_with("//") {
                if let Some(base) = self.term_id(prefix) {
                    return Some(format!("{}{}", base, suffix));
                }
            }
            return Some(value.to_string());
        }
        self.vocab.as_ref().map(|vocab| format!("{}{}", vocab, value))
    }

    /// The IRI a property name stands for.
    fn term_iri(&self, term: &str) -> Result<String, JsonLdError> {
        let iri = match self.term_id(term) {
            Some(id) => self.expand(id),
            None => self.expand(term),
        };
        iri.filter(|iri| !iri.starts_with('@'))
            .ok_or_else(|| JsonLdError::UnknownTerm(term.to_string()))
    }
}

/// The context active inside a `credential_type` node.
fn type_context(document: &Value, credential_type: &str) -> Result<ActiveContext, JsonLdError> {
    let context = document
        .get("@context")
        .ok_or(JsonLdError::MissingContext)?;
    let mut active = ActiveContext::default();
    active.apply(context);
    if !active.terms.contains_key(credential_type) {
        return Err(JsonLdError::UnknownType(credential_type.to_string()));
    }
    if let Some(scoped) = active.scoped_context(credential_type).cloned() {
        active.apply(&scoped);
    }
    Ok(active)
}

/// Expanded IRI path of a credential subject field.
///
/// # Arguments
/// * `document` - JSON-LD context document of the credential type
/// * `credential_type` - type term, e.g. `DegreeCredential`
/// * `field` - dot-separated field path under `credentialSubject`
///
/// # Returns
/// `credentialSubject`'s IRI followed by one IRI per path segment.
pub fn field_path(
    document: &Value,
    credential_type: &str,
    field: &str,
) -> Result<Vec<String>, JsonLdError> {
    let mut active = type_context(document, credential_type)?;
    let mut path = vec![CREDENTIAL_SUBJECT_IRI.to_string()];
    for segment in field.split('.') {
        path.push(active.term_iri(segment)?);
        if let Some(scoped) = active.scoped_context(segment).cloned() {
            active.apply(&scoped);
        }
    }
    Ok(path)
}

/// The `claimPathKey` a merklized proof about `field` exposes: Poseidon over
/// the byte hashes of the field's IRI path.
pub fn claim_path_key(
    document: &Value,
    credential_type: &str,
    field: &str,
) -> Result<BigUint, JsonLdError> {
    let parts = field_path(document, credential_type, field)?
        .iter()
        .map(|iri| hash_bytes(iri.as_bytes()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(poseidon_hash(&parts)?)
}

/// The claim slot a non-merklized credential stores `field` in.
///
/// Read from the type's `iden3_serialization` attribute, e.g.
/// `iden3:v1:slotIndexA=birthday&slotValueB=documentType`. Index slots A and B
/// are claim slots 2 and 3, value slots A and B are 6 and 7.
pub fn field_slot_index(
    document: &Value,
    credential_type: &str,
    field: &str,
) -> Result<u32, JsonLdError> {
    let no_slot = || JsonLdError::NoSlot {
        typ: credential_type.to_string(),
        field: field.to_string(),
    };
    let active = type_context(document, credential_type)?;
    let serialization = active
        .terms
        .get(SERIALIZATION_TERM)
        .and_then(Value::as_str)
        .and_then(|s| s.strip_prefix(SERIALIZATION_PREFIX))
        .ok_or_else(no_slot)?;

    serialization
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(_, path)| *path == field)
        .and_then(|(slot, _)| match slot {
            "slotIndexA" => Some(2),
            "slotIndexB" => Some(3),
            "slotValueA" => Some(6),
            "slotValueB" => Some(7),
            _ => None,
        })
        .ok_or_else(no_slot)
}
