// src/storage/credential_repository.rs
//! Credential repository.
//!
//! Issued credentials are kept per issuer and looked up by id when a holder
//! fetches them over iden3comm. Ids are stored without their `uri:uuid:`
//! prefix; lookups accept either form.

use crate::error::{ErrorKind, HasErrorKind};
use crate::models::credential::{W3CCredential, CREDENTIAL_ID_PREFIX};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("credential store unavailable: {0}")]
    Backend(String),
}

impl HasErrorKind for RepositoryError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Internal
    }
}

/// Storage of issued credentials, keyed by `(issuer DID, credential id)`.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Stores a credential. An existing credential with the same id is replaced.
    async fn save(&self, issuer: &str, credential: W3CCredential) -> Result<(), RepositoryError>;

    /// Looks up a credential by id.
    async fn get(&self, issuer: &str, id: &str) -> Result<Option<W3CCredential>, RepositoryError>;

    /// Lists an issuer's credentials, optionally only those issued to `subject`.
    async fn list(
        &self,
        issuer: &str,
        subject: Option<&str>,
    ) -> Result<Vec<W3CCredential>, RepositoryError>;
}

fn poisoned<T>(_: PoisonError<T>) -> RepositoryError {
    RepositoryError::Backend("credential map lock poisoned".into())
}

fn bare(id: &str) -> &str {
    id.strip_prefix(CREDENTIAL_ID_PREFIX).unwrap_or(id)
}

/// In-memory repository. Contents live as long as the process.
#[derive(Default)]
pub struct InMemoryCredentialRepository {
    credentials: RwLock<HashMap<(String, String), W3CCredential>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn save(&self, issuer: &str, credential: W3CCredential) -> Result<(), RepositoryError> {
        let key = (issuer.to_string(), credential.bare_id().to_string());
        self.credentials
            .write()
            .map_err(poisoned)?
            .insert(key, credential);
        Ok(())
    }

    async fn get(&self, issuer: &str, id: &str) -> Result<Option<W3CCredential>, RepositoryError> {
        let key = (issuer.to_string(), bare(id).to_string());
        Ok(self
            .credentials
            .read()
            .map_err(poisoned)?
            .get(&key)
            .cloned())
    }

    async fn list(
        &self,
        issuer: &str,
        subject: Option<&str>,
    ) -> Result<Vec<W3CCredential>, RepositoryError> {
        let credentials = self.credentials.read().map_err(poisoned)?;
        let mut found: Vec<W3CCredential> = credentials
            .iter()
            .filter(|((owner, _), vc)| {
                owner == issuer && subject.map_or(true, |s| vc.subject_id() == Some(s))
            })
            .map(|(_, vc)| vc.clone())
            .collect();
        found.sort_by(|a, b| a.issuance_date.cmp(&b.issuance_date));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::credential::{CredentialSchema, CredentialStatus};
    use chrono::Utc;
    use serde_json::{json, Map};

    const ISSUER: &str = "did:iden3:privado:test:issuer";

    fn create_test_credential(id: &str, subject: &str) -> W3CCredential {
        let mut credential_subject = Map::new();
        credential_subject.insert("id".into(), json!(subject));
        W3CCredential {
            id: format!("uri:uuid:{}", id),
            context: vec![],
            typ: vec!["VerifiableCredential".into()],
            expiration_date: None,
            issuance_date: Utc::now(),
            credential_subject,
            credential_status: CredentialStatus {
                id: "status".into(),
                typ: "Iden3OnchainSparseMerkleTreeProof2023".into(),
                revocation_nonce: 0,
            },
            issuer: ISSUER.into(),
            credential_schema: CredentialSchema {
                id: "schema".into(),
                typ: "JsonSchemaValidator2018".into(),
            },
        }
    }

    #[tokio::test]
    async fn test_get_accepts_either_id_form() {
        let repo = InMemoryCredentialRepository::new();
        repo.save(ISSUER, create_test_credential("abc", "did:holder"))
            .await
            .unwrap();

        assert!(repo.get(ISSUER, "abc").await.unwrap().is_some());
        assert!(repo.get(ISSUER, "uri:uuid:abc").await.unwrap().is_some());
        assert!(repo.get(ISSUER, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credentials_are_scoped_by_issuer() {
        let repo = InMemoryCredentialRepository::new();
        repo.save(ISSUER, create_test_credential("abc", "did:holder"))
            .await
            .unwrap();
        assert!(repo.get("did:iden3:other", "abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_same_id() {
        let repo = InMemoryCredentialRepository::new();
        repo.save(ISSUER, create_test_credential("abc", "did:a")).await.unwrap();
        repo.save(ISSUER, create_test_credential("abc", "did:b")).await.unwrap();
        assert_eq!(repo.len(), 1);
        let vc = repo.get(ISSUER, "abc").await.unwrap().unwrap();
        assert_eq!(vc.subject_id(), Some("did:b"));
    }

    #[tokio::test]
    async fn test_list_filters_by_subject() {
        let repo = InMemoryCredentialRepository::new();
        repo.save(ISSUER, create_test_credential("1", "did:a")).await.unwrap();
        repo.save(ISSUER, create_test_credential("2", "did:b")).await.unwrap();
        repo.save(ISSUER, create_test_credential("3", "did:a")).await.unwrap();

        assert_eq!(repo.list(ISSUER, None).await.unwrap().len(), 3);
        let for_a = repo.list(ISSUER, Some("did:a")).await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert!(for_a.iter().all(|vc| vc.subject_id() == Some("did:a")));
    }

    #[tokio::test]
    async fn test_poisoned_lock_is_a_backend_error() {
        let repo = std::sync::Arc::new(InMemoryCredentialRepository::new());
        let writer = std::sync::Arc::clone(&repo);
        let _ = std::thread::spawn(move || {
            let _guard = writer.credentials.write().unwrap();
            panic!("writer died");
        })
        .join();

        let err = repo.get(ISSUER, "abc").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Backend(_)));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(repo
            .save(ISSUER, create_test_credential("abc", "did:a"))
            .await
            .is_err());
    }
}
