// src/storage/document_loader.rs
//! JSON-LD context documents referenced by proof requests.
//!
//! Contexts are immutable once published, so each URL is fetched once and
//! kept for the life of the process.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("cannot fetch JSON-LD document {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Source of JSON-LD documents by URL.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<Arc<Value>, DocumentError>;
}

/// Fetches documents over HTTP and caches them by URL.
#[derive(Default)]
pub struct HttpDocumentLoader {
    http: reqwest::Client,
    cache: Mutex<HashMap<String, Arc<Value>>>,
}

impl HttpDocumentLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn cached(&self, url: &str) -> Option<Arc<Value>> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .cloned()
    }
}

#[async_trait]
impl DocumentLoader for HttpDocumentLoader {
    async fn load(&self, url: &str) -> Result<Arc<Value>, DocumentError> {
        if let Some(document) = self.cached(url) {
            return Ok(document);
        }
        let fetch_error = |source| DocumentError::Fetch {
            url: url.to_string(),
            source,
        };
        let document: Value = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(fetch_error)?
            .json()
            .await
            .map_err(fetch_error)?;
        log::debug!("loaded JSON-LD document {}", url);

        let document = Arc::new(document);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), Arc::clone(&document));
        Ok(document)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn degree_context() -> Value {
        serde_json::from_str(include_str!("../../schemas/degree-credential.jsonld")).unwrap()
    }

    /// Serves the bundled degree credential context for every URL.
    pub struct StaticDocuments;

    #[async_trait]
    impl DocumentLoader for StaticDocuments {
        async fn load(&self, _url: &str) -> Result<Arc<Value>, DocumentError> {
            Ok(Arc::new(degree_context()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::mock;

    #[tokio::test]
    async fn test_documents_are_fetched_once() {
        let m = mock("GET", "/contexts/degree.jsonld")
            .with_status(200)
            .with_header("content-type", "application/ld+json")
            .with_body(r#"{"@context": {"name": "https://schema.org/name"}}"#)
            .expect(1)
            .create();
        let loader = HttpDocumentLoader::new();
        let url = format!("{}/contexts/degree.jsonld", mockito::server_url());

        let first = loader.load(&url).await.unwrap();
        let second = loader.load(&url).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first["@context"]["name"], "https://schema.org/name");
        m.assert();
    }

    #[tokio::test]
    async fn test_missing_document_is_an_error() {
        let _m = mock("GET", "/contexts/missing.jsonld")
            .with_status(404)
            .create();
        let loader = HttpDocumentLoader::new();
        let url = format!("{}/contexts/missing.jsonld", mockito::server_url());

        assert!(matches!(
            loader.load(&url).await,
            Err(DocumentError::Fetch { .. })
        ));
        // Failures are not cached.
        assert!(loader.cached(&url).is_none());
    }
}
