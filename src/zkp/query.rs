// src/zkp/query.rs
//! Evaluation of a proof request's credential query against the public
//! signals of an atomic query proof.
//!
//! Each field of a query's `credentialSubject` either carries one operator
//! (`{"graduationYear": {"$gt": 2020}}`) or is empty (`{"name": {}}`,
//! selective disclosure). At most one field carries an operator, and that
//! field is what the proof is about. Without one, the proof discloses one of
//! the empty fields with `$eq`. An empty `credentialSubject` asks only for
//! credential ownership and is proven with the no-op operator. Values are
//! integers or booleans.

use crate::models::did::Did;
use crate::models::protocol::Query;
use crate::utils::crypto::schema_hash;
use crate::utils::jsonld::{claim_path_key, field_slot_index, JsonLdError};
use crate::zkp::pub_signals::{AtomicQueryMtpV2PubSignals, QUERY_VALUE_ARRAY_SIZE};
use num_bigint::BigUint;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Operator {
    Noop = 0,
    Eq = 1,
    Lt = 2,
    Gt = 3,
    In = 4,
    Nin = 5,
    Ne = 6,
    Lte = 7,
    Gte = 8,
    Between = 9,
    NonBetween = 10,
    Exists = 11,
}

impl Operator {
    pub fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "$noop" => Operator::Noop,
            "$eq" => Operator::Eq,
            "$lt" => Operator::Lt,
            "$gt" => Operator::Gt,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$ne" => Operator::Ne,
            "$lte" => Operator::Lte,
            "$gte" => Operator::Gte,
            "$between" => Operator::Between,
            "$nonbetween" => Operator::NonBetween,
            "$exists" => Operator::Exists,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    fn takes_list(self) -> bool {
        matches!(
            self,
            Operator::In | Operator::Nin | Operator::Between | Operator::NonBetween
        )
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("issuer {0} is not in allowedIssuers")]
    IssuerNotAllowed(String),

    #[error("issuer identifier is not a known DID: {0}")]
    UnknownIssuer(String),

    #[error("proof is for a different credential schema")]
    SchemaMismatch,

    #[error("revocation check is required")]
    RevocationNotChecked,

    #[error("only one field per query may carry an operator")]
    MultiplePredicates,

    #[error("field '{0}' must hold one operator or be empty")]
    InvalidPredicate(String),

    #[error("unsupported operator '{0}'")]
    UnknownOperator(String),

    #[error("unsupported query value {0}: only integers and booleans")]
    UnsupportedValue(String),

    #[error("too many values for operator ({0} > 64)")]
    TooManyValues(usize),

    #[error("proof operator {proven} does not match requested {requested}")]
    OperatorMismatch { proven: u32, requested: u32 },

    #[error("proof values do not match the query")]
    ValueMismatch,

    #[error("proof shows the queried field does not exist")]
    ClaimPathNotExists,

    #[error("proof is about a different credential field")]
    ClaimPathMismatch,

    #[error("proof uses claim slot {proven}, not the queried field's")]
    SlotMismatch { proven: u32 },

    #[error("cannot locate the queried field: {0}")]
    Context(#[from] JsonLdError),
}

/// What a query asks the proof to show.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub operator: Operator,
    pub values: Vec<BigUint>,
    /// Fields the proof may be about. Empty for an ownership-only query.
    pub fields: Vec<String>,
}

/// Reduces a query's `credentialSubject` to the predicate the circuit proves.
pub fn predicate(subject: Option<&Map<String, Value>>) -> Result<Predicate, QueryError> {
    let mut disclosed = Vec::new();
    let mut condition = None;
    for (field, clause) in subject.into_iter().flatten() {
        let clause = clause
            .as_object()
            .ok_or_else(|| QueryError::InvalidPredicate(field.clone()))?;
        match clause.len() {
            0 => disclosed.push(field.clone()),
            1 if condition.is_some() => return Err(QueryError::MultiplePredicates),
            1 => condition = Some((field, clause)),
            _ => return Err(QueryError::InvalidPredicate(field.clone())),
        }
    }

    let Some((field, clause)) = condition else {
        let operator = if disclosed.is_empty() {
            Operator::Noop
        } else {
            Operator::Eq
        };
        return Ok(Predicate {
            operator,
            values: Vec::new(),
            fields: disclosed,
        });
    };
    let (key, value) = clause
        .iter()
        .next()
        .ok_or_else(|| QueryError::InvalidPredicate(field.clone()))?;
    let operator = Operator::from_key(key).ok_or_else(|| QueryError::UnknownOperator(key.clone()))?;
    let values = match (operator.takes_list(), value) {
        (true, Value::Array(items)) => items.iter().map(encode_value).collect::<Result<Vec<_>, _>>()?,
        _ => vec![encode_value(value)?],
    };
    if values.len() > QUERY_VALUE_ARRAY_SIZE {
        return Err(QueryError::TooManyValues(values.len()));
    }
    Ok(Predicate {
        operator,
        values,
        fields: vec![field.clone()],
    })
}

fn encode_value(value: &Value) -> Result<BigUint, QueryError> {
    match value {
        Value::Bool(b) => Ok(BigUint::from(u8::from(*b))),
        Value::Number(n) => n
            .as_u64()
            .map(BigUint::from)
            .ok_or_else(|| QueryError::UnsupportedValue(n.to_string())),
        other => Err(QueryError::UnsupportedValue(other.to_string())),
    }
}

/// Checks an MTPV2 proof's signals against the query it answers.
///
/// Covers issuer allow-listing, the schema hash, the revocation flag and the
/// predicate. Issuer state, freshness, sender binding and the proven field
/// ([`check_claim_path`]) depend on context and are checked by the caller.
///
/// # Returns
/// The predicate the proof was checked against.
pub fn check_query(
    query: &Query,
    signals: &AtomicQueryMtpV2PubSignals,
) -> Result<Predicate, QueryError> {
    let issuer = Did::from_id(signals.issuer_id)
        .map_err(|e| QueryError::UnknownIssuer(e.to_string()))?
        .to_string();
    if !query.allowed_issuers.iter().any(|a| a == "*" || *a == issuer) {
        return Err(QueryError::IssuerNotAllowed(issuer));
    }

    if schema_hash(&query.context, &query.typ) != signals.claim_schema {
        return Err(QueryError::SchemaMismatch);
    }

    if query.skip_claim_revocation_check != Some(true) && !signals.is_revocation_checked {
        return Err(QueryError::RevocationNotChecked);
    }

    let expected = predicate(query.credential_subject.as_ref())?;
    if signals.operator != expected.operator.code() {
        return Err(QueryError::OperatorMismatch {
            proven: signals.operator,
            requested: expected.operator.code(),
        });
    }

    // A disclosed value is revealed by the proof itself; anything else must
    // match the query exactly, with unused slots zero.
    let disclosure = expected.operator == Operator::Eq && expected.values.is_empty();
    if !disclosure {
        let zero = BigUint::from(0u32);
        let mismatch = signals
            .value
            .iter()
            .enumerate()
            .any(|(i, v)| v != expected.values.get(i).unwrap_or(&zero));
        if mismatch {
            return Err(QueryError::ValueMismatch);
        }
    }
    Ok(expected)
}

/// Checks that a proof is about one of the predicate's fields.
///
/// Merklized credentials are matched on `claimPathKey`, the others on
/// `slotIndex`. A proof that the field is absent only answers `$exists`.
///
/// # Arguments
/// * `predicate` - as returned by [`check_query`]
/// * `credential_type` - the query's `type`
/// * `document` - the JSON-LD context document named by the query
pub fn check_claim_path(
    predicate: &Predicate,
    credential_type: &str,
    signals: &AtomicQueryMtpV2PubSignals,
    document: &Value,
) -> Result<(), QueryError> {
    if predicate.fields.is_empty() {
        return Ok(());
    }
    if signals.claim_path_not_exists && predicate.operator != Operator::Exists {
        return Err(QueryError::ClaimPathNotExists);
    }

    if signals.merklized {
        for field in &predicate.fields {
            if claim_path_key(document, credential_type, field)? == signals.claim_path_key {
                return Ok(());
            }
        }
        return Err(QueryError::ClaimPathMismatch);
    }
    for field in &predicate.fields {
        match field_slot_index(document, credential_type, field) {
            Ok(slot) if slot == signals.slot_index => return Ok(()),
            Ok(_) | Err(JsonLdError::NoSlot { .. }) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Err(QueryError::SlotMismatch {
        proven: signals.slot_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::did::Id;
    use crate::storage::document_loader::test_support::degree_context;
    use crate::zkp::pub_signals::test_support::mtp_v2_signals;
    use serde_json::json;

    const CONTEXT: &str = "http://host/schemas/degree.jsonld";

    fn issuer() -> Id {
        "2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfcC7".parse().unwrap()
    }

    fn query(subject: Value) -> Query {
        Query {
            allowed_issuers: vec!["*".into()],
            context: CONTEXT.into(),
            typ: "DegreeCredential".into(),
            skip_claim_revocation_check: Some(true),
            credential_subject: subject.as_object().cloned(),
        }
    }

    fn signals(operator: u32, values: &[u64]) -> AtomicQueryMtpV2PubSignals {
        let user: Id = "2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfGdm".parse().unwrap();
        let raw = mtp_v2_signals(
            &user,
            &issuer(),
            1,
            0,
            &schema_hash(CONTEXT, "DegreeCredential"),
            operator,
            values,
        );
        AtomicQueryMtpV2PubSignals::parse(&raw).unwrap()
    }

    #[test]
    fn test_greater_than_predicate() {
        let q = query(json!({ "graduationYear": { "$gt": 2020 } }));
        check_query(&q, &signals(3, &[2020])).unwrap();
        assert_eq!(
            check_query(&q, &signals(3, &[2019])),
            Err(QueryError::ValueMismatch)
        );
        assert_eq!(
            check_query(&q, &signals(2, &[2020])),
            Err(QueryError::OperatorMismatch { proven: 2, requested: 3 })
        );
    }

    #[test]
    fn test_in_predicate_uses_value_list() {
        let q = query(json!({ "degree": { "$in": [1, 2, 3] } }));
        check_query(&q, &signals(4, &[1, 2, 3])).unwrap();
        assert!(check_query(&q, &signals(4, &[1, 2])).is_err());
    }

    #[test]
    fn test_selective_disclosure_requires_eq() {
        let q = query(json!({ "name": {} }));
        check_query(&q, &signals(1, &[12345])).unwrap();
        assert!(matches!(
            check_query(&q, &signals(0, &[])),
            Err(QueryError::OperatorMismatch { .. })
        ));
    }

    #[test]
    fn test_empty_subject_requires_noop() {
        let q = query(Value::Null);
        check_query(&q, &signals(0, &[])).unwrap();
        assert!(check_query(&q, &signals(1, &[])).is_err());
    }

    #[test]
    fn test_boolean_values() {
        let p = predicate(json!({ "active": { "$eq": true } }).as_object()).unwrap();
        assert_eq!(p.operator, Operator::Eq);
        assert_eq!(p.values, vec![BigUint::from(1u8)]);
    }

    #[test]
    fn test_operator_field_with_disclosures() {
        // What a verification request with `query` and `disclose` asks for.
        let q = query(json!({
            "graduationYear": { "$gt": 2020 },
            "name": {},
            "degree": {}
        }));
        let p = check_query(&q, &signals(3, &[2020])).unwrap();
        assert_eq!(p.operator, Operator::Gt);
        assert_eq!(p.fields, vec!["graduationYear".to_string()]);
    }

    #[test]
    fn test_disclosure_only_subject() {
        let p = predicate(json!({ "name": {}, "degree": {} }).as_object()).unwrap();
        assert_eq!(p.operator, Operator::Eq);
        assert!(p.values.is_empty());
        assert_eq!(p.fields.len(), 2);

        let p = predicate(None).unwrap();
        assert_eq!(p.operator, Operator::Noop);
        assert!(p.fields.is_empty());
    }

    #[test]
    fn test_rejects_unsupported_queries() {
        assert_eq!(
            predicate(json!({ "a": { "$gt": 1 }, "b": { "$lt": 5 } }).as_object()),
            Err(QueryError::MultiplePredicates)
        );
        assert_eq!(
            predicate(json!({ "a": 1 }).as_object()),
            Err(QueryError::InvalidPredicate("a".into()))
        );
        assert_eq!(
            predicate(json!({ "a": { "$gt": 1, "$lt": 5 } }).as_object()),
            Err(QueryError::InvalidPredicate("a".into()))
        );
        assert_eq!(
            predicate(json!({ "a": { "$like": 1 } }).as_object()),
            Err(QueryError::UnknownOperator("$like".into()))
        );
        assert!(matches!(
            predicate(json!({ "a": { "$eq": "text" } }).as_object()),
            Err(QueryError::UnsupportedValue(_))
        ));
    }

    #[test]
    fn test_allowed_issuers() {
        let mut q = query(Value::Null);
        q.allowed_issuers = vec!["did:iden3:privado:test:someoneElse".into()];
        assert!(matches!(
            check_query(&q, &signals(0, &[])),
            Err(QueryError::IssuerNotAllowed(_))
        ));
        q.allowed_issuers = vec![Did::from_id(issuer()).unwrap().to_string()];
        check_query(&q, &signals(0, &[])).unwrap();
    }

    #[test]
    fn test_schema_and_revocation() {
        let mut q = query(Value::Null);
        q.typ = "OtherCredential".into();
        assert_eq!(check_query(&q, &signals(0, &[])), Err(QueryError::SchemaMismatch));

        let mut q = query(Value::Null);
        q.skip_claim_revocation_check = None;
        assert_eq!(
            check_query(&q, &signals(0, &[])),
            Err(QueryError::RevocationNotChecked)
        );
    }

    fn graduation_year_key() -> BigUint {
        claim_path_key(&degree_context(), "DegreeCredential", "graduationYear").unwrap()
    }

    fn gt_predicate() -> Predicate {
        predicate(json!({ "graduationYear": { "$gt": 2020 }, "name": {} }).as_object()).unwrap()
    }

    #[test]
    fn test_merklized_proof_must_use_field_path() {
        let mut s = signals(3, &[2020]);
        s.claim_path_key = graduation_year_key();
        check_claim_path(&gt_predicate(), "DegreeCredential", &s, &degree_context()).unwrap();

        // A proof about `name` does not answer a query on `graduationYear`.
        s.claim_path_key =
            claim_path_key(&degree_context(), "DegreeCredential", "name").unwrap();
        assert_eq!(
            check_claim_path(&gt_predicate(), "DegreeCredential", &s, &degree_context()),
            Err(QueryError::ClaimPathMismatch)
        );
    }

    #[test]
    fn test_absent_field_only_answers_exists() {
        let mut s = signals(3, &[2020]);
        s.claim_path_key = graduation_year_key();
        s.claim_path_not_exists = true;
        assert_eq!(
            check_claim_path(&gt_predicate(), "DegreeCredential", &s, &degree_context()),
            Err(QueryError::ClaimPathNotExists)
        );

        let exists = predicate(json!({ "graduationYear": { "$exists": false } }).as_object())
            .unwrap();
        check_claim_path(&exists, "DegreeCredential", &s, &degree_context()).unwrap();
    }

    #[test]
    fn test_ownership_query_has_no_field_to_check() {
        let s = signals(0, &[]);
        let p = predicate(None).unwrap();
        check_claim_path(&p, "DegreeCredential", &s, &json!({})).unwrap();
    }

    #[test]
    fn test_non_merklized_proof_must_use_field_slot() {
        let document = json!({
            "@context": [{
                "AgeCredential": {
                    "@id": "urn:age",
                    "@context": {
                        "iden3_serialization": "iden3:v1:slotIndexA=birthday&slotValueA=documentType",
                        "birthday": "urn:age#birthday",
                        "documentType": "urn:age#documentType"
                    }
                }
            }]
        });
        let p = predicate(json!({ "birthday": { "$lt": 20000101 } }).as_object()).unwrap();
        let mut s = signals(2, &[20000101]);
        s.merklized = false;
        s.slot_index = 2;
        check_claim_path(&p, "AgeCredential", &s, &document).unwrap();

        s.slot_index = 6;
        assert_eq!(
            check_claim_path(&p, "AgeCredential", &s, &document),
            Err(QueryError::SlotMismatch { proven: 6 })
        );
    }

    #[test]
    fn test_unknown_field_is_a_context_error() {
        let p = predicate(json!({ "birthday": { "$lt": 1 } }).as_object()).unwrap();
        assert!(matches!(
            check_claim_path(&p, "DegreeCredential", &signals(2, &[1]), &degree_context()),
            Err(QueryError::Context(JsonLdError::UnknownTerm(_)))
        ));
    }
}
