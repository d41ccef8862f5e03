// src/error.rs
//! Service-wide error classification.
//!
//! Every module keeps its own `thiserror` enum; this module only decides how
//! those errors are reported to HTTP callers. Each module error reports an
//! [`ErrorKind`], which maps onto a status code, and converts into
//! [`ApiError`] through the blanket `From` impl below.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

/// Coarse classification of a failure, as seen by an HTTP caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad DID, bad JSON, missing required field.
    Malformed,
    /// Unknown session, missing credential.
    NotFound,
    /// Proof verification failed.
    Unauthorized,
    /// Assembly failure, unexpected marshaling error.
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Malformed => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Implemented by every module error that can reach an HTTP handler.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}

/// Error returned by HTTP handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.message)
    }
}

impl<E> From<E> for ApiError
where
    E: HasErrorKind + fmt::Display,
{
    fn from(err: E) -> Self {
        let kind = err.kind();
        match kind {
            // Internal details stay in the log.
            ErrorKind::Internal => {
                log::error!("internal error: {}", err);
                Self::new(kind.status_code(), "internal error")
            }
            _ => {
                log::warn!("request rejected ({:?}): {}", kind, err);
                Self::new(kind.status_code(), err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Sample {
        #[error("no such session")]
        Missing,
        #[error("database password is hunter2")]
        Broken,
    }

    impl HasErrorKind for Sample {
        fn kind(&self) -> ErrorKind {
            match self {
                Sample::Missing => ErrorKind::NotFound,
                Sample::Broken => ErrorKind::Internal,
            }
        }
    }

    #[test]
    fn test_kind_maps_to_status() {
        let err: ApiError = Sample::Missing.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "no such session");
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err: ApiError = Sample::Broken.into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "internal error");
    }
}
