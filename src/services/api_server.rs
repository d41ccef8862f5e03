// src/services/api_server.rs
//! HTTP API of the gateway.
//!
//! The API is built using Axum and includes endpoints for:
//! - Health checks
//! - Wallet login (request, callback, status polling)
//! - Credential verification (request, callback, status polling)
//! - The iden3comm agent wallets fetch credentials from
//! - Credential issuance and offers for the configured issuer
//! - Static JSON schemas and JSON-LD contexts under `/schemas`
//!
//! Every request carries an `x-request-id` (kept from the caller or
//! generated) that is echoed in the response and in the request log. A
//! panicking handler answers 500 instead of dropping the connection.

use crate::error::ApiError;
use crate::models::credential::CredentialRequest;
use crate::services::authentication::AuthenticationService;
use crate::services::credential_issuer::CredentialIssuer;
use crate::services::iden3comm::Iden3commService;
use crate::services::verification::{VerificationRequest, VerificationService};
use axum::{
    body::Bytes,
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::services::ServeDir;

/// `?sessionId=` of the callbacks.
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// `?id=` of the status endpoints.
#[derive(Debug, Deserialize)]
struct StatusQuery {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectQuery {
    subject: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OfferQuery {
    subject: Option<String>,
    claim_id: Option<String>,
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("{} is required", name)))
}

/// Headers returned with a freshly created authorization request.
fn session_headers(session_id: String) -> [(&'static str, String); 3] {
    [
        ("x-id", session_id),
        ("access-control-expose-headers", "x-id".to_string()),
        ("access-control-allow-origin", "*".to_string()),
    ]
}

/// Content type of a static schema file, by extension.
fn schema_content_type(path: &str) -> Option<&'static str> {
    if path.ends_with(".jsonld") {
        Some("application/ld+json")
    } else if path.ends_with(".json") {
        Some("application/json")
    } else if path.ends_with(".md") {
        Some("text/markdown; charset=utf-8")
    } else {
        None
    }
}

/// Serves `/schemas` with permissive CORS and the right content types.
async fn schema_headers(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        let content_type = schema_content_type(req.uri().path());
        let mut response = next.run(req).await;
        if let (true, Some(content_type)) = (response.status().is_success(), content_type) {
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        response
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
    response
}

/// Logs method, path, status, latency and request id of every request.
async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    log::info!(
        "{} {} -> {} in {}ms [{}]",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis(),
        request_id
    );
    response
}

/// Request ids, request logging and panic recovery around `router`.
fn with_middleware(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(middleware::from_fn(log_request))
            .layer(CatchPanicLayer::new()),
    )
}

/// Main API server structure holding all service dependencies
pub struct ApiServer {
    authentication: Arc<AuthenticationService>,
    verification: Arc<VerificationService>,
    iden3comm: Arc<Iden3commService>,
    issuer: Arc<CredentialIssuer>,
    /// Public URL of the agent endpoint, used in credential offers
    agent_url: String,
    /// Directory served under `/schemas`
    schemas_dir: PathBuf,
}

impl ApiServer {
    /// Creates a new ApiServer instance with all required services
    ///
    /// # Arguments
    /// * `authentication` - wallet login flow
    /// * `verification` - credential verification flow
    /// * `iden3comm` - agent message dispatcher
    /// * `issuer` - credential issuance for the configured issuer
    /// * `agent_url` - public URL of `/api/v1/agent`
    /// * `schemas_dir` - directory of static schema files
    pub fn new(
        authentication: AuthenticationService,
        verification: VerificationService,
        iden3comm: Iden3commService,
        issuer: CredentialIssuer,
        agent_url: impl Into<String>,
        schemas_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            authentication: Arc::new(authentication),
            verification: Arc::new(verification),
            iden3comm: Arc::new(iden3comm),
            issuer: Arc::new(issuer),
            agent_url: agent_url.into(),
            schemas_dir: schemas_dir.into(),
        }
    }

    /// Builds the router with all endpoints and middleware.
    pub fn router(self) -> Router {
        let schemas = Router::new()
            .nest_service("/schemas", ServeDir::new(&self.schemas_dir))
            .layer(middleware::from_fn(schema_headers));

        let state = Arc::new(self);
        let router = Router::new()
            // Health
            .route("/readiness", get(Self::health_handler))
            .route("/liveness", get(Self::health_handler))
            // Login
            .route("/api/v1/requests/auth", get(Self::login_request_handler))
            .route("/api/v1/callback", post(Self::login_callback_handler))
            .route("/api/v1/status", get(Self::login_status_handler))
            // iden3comm
            .route("/api/v1/agent", post(Self::agent_handler))
            // Verification
            .route(
                "/api/v1/verification/request",
                post(Self::verification_request_handler),
            )
            .route(
                "/api/v1/verification/callback",
                post(Self::verification_callback_handler),
            )
            .route(
                "/api/v1/verification/status",
                get(Self::verification_status_handler),
            )
            // Issuer
            .route("/api/v1/issuers", get(Self::issuers_handler))
            .route(
                "/api/v1/identities/:identifier/claims",
                post(Self::issue_claim_handler).get(Self::list_claims_handler),
            )
            .route(
                "/api/v1/identities/:identifier/claims/offer",
                get(Self::offer_handler),
            )
            .route(
                "/api/v1/identities/:identifier/claims/:claim_id",
                get(Self::get_claim_handler),
            )
            .route(
                "/api/v1/identities/:identifier/claims/revocation/status/:nonce",
                get(Self::revocation_status_handler),
            )
            .with_state(state)
            .merge(schemas);
        with_middleware(router)
    }

    /// Starts the API server on the specified address
    ///
    /// # Arguments
    /// * `addr` - Socket address to bind the server to
    pub async fn run(self, addr: SocketAddr) -> std::io::Result<()> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        log::info!("API server listening on http://{}", addr);
        axum::serve(listener, router).await
    }

    // =====================
    // Health Handlers
    // =====================

    async fn health_handler() -> impl IntoResponse {
        Json(json!({ "status": "ok" }))
    }

    // =====================
    // Login Handlers
    // =====================

    /// Creates a login request
    ///
    /// # Endpoint
    /// GET /api/v1/requests/auth
    ///
    /// # Responses
    /// - 200 OK: authorization request; session id in the `x-id` header
    /// - 500 Internal Server Error: no session could be allocated
    async fn login_request_handler(
        State(state): State<Arc<ApiServer>>,
    ) -> Result<impl IntoResponse, ApiError> {
        let (request, session_id) = state.authentication.new_login_request()?;
        Ok((StatusCode::OK, session_headers(session_id), Json(request)))
    }

    /// Receives the wallet's login answer
    ///
    /// # Endpoint
    /// POST /api/v1/callback?sessionId=<id>
    ///
    /// # Request Body
    /// The JWZ token, raw
    ///
    /// # Responses
    /// - 200 OK: `{did}`
    /// - 400 Bad Request: missing or unknown session id
    /// - 401 Unauthorized: proof rejected or session already closed
    async fn login_callback_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<CallbackQuery>,
        body: Bytes,
    ) -> Result<impl IntoResponse, ApiError> {
        let session_id = required(query.session_id, "sessionId")?;
        let did = state
            .authentication
            .handle_callback(&session_id, &body)
            .await?;
        Ok(Json(json!({ "did": did })))
    }

    /// Polls a login session
    ///
    /// # Endpoint
    /// GET /api/v1/status?id=<id>
    ///
    /// # Responses
    /// - 200 OK: `{did}` once the wallet logged in
    /// - 404 Not Found: pending, unknown or expired
    async fn login_status_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<StatusQuery>,
    ) -> Result<impl IntoResponse, ApiError> {
        let session_id = required(query.id, "id")?;
        state
            .authentication
            .status(&session_id)
            .map(|did| Json(json!({ "did": did })))
            .ok_or_else(|| ApiError::not_found("session not verified"))
    }

    // =====================
    // iden3comm Handler
    // =====================

    /// Handles a packed iden3comm message
    ///
    /// # Endpoint
    /// POST /api/v1/agent
    ///
    /// # Responses
    /// - 200 OK: the reply message
    /// - 400 Bad Request: any failure
    async fn agent_handler(
        State(state): State<Arc<ApiServer>>,
        body: Bytes,
    ) -> Result<impl IntoResponse, ApiError> {
        match state.iden3comm.handle(&body).await {
            Ok(reply) => Ok(([(header::CONTENT_TYPE, "application/json")], reply)),
            Err(err) => {
                log::warn!("agent message rejected: {}", err);
                Err(ApiError::bad_request(err.to_string()))
            }
        }
    }

    // =====================
    // Verification Handlers
    // =====================

    /// Creates a verification request
    ///
    /// # Endpoint
    /// POST /api/v1/verification/request
    ///
    /// # Request Body
    /// `{credentialType, schemaUrl, query, disclose}`
    ///
    /// # Responses
    /// - 200 OK: authorization request; session id in the `x-id` header
    /// - 400 Bad Request: bad JSON or missing credentialType/schemaUrl
    async fn verification_request_handler(
        State(state): State<Arc<ApiServer>>,
        body: Bytes,
    ) -> Result<impl IntoResponse, ApiError> {
        let req: VerificationRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))?;
        let (request, session_id) = state.verification.new_verification_request(&req)?;
        Ok((StatusCode::OK, session_headers(session_id), Json(request)))
    }

    /// Receives the wallet's proof
    ///
    /// # Endpoint
    /// POST /api/v1/verification/callback?sessionId=<id>
    ///
    /// # Responses
    /// - 200 OK: `{status: "verified", did}`
    /// - 400 Bad Request: missing session id
    /// - 401 Unauthorized: proof rejected or session already closed
    /// - 404 Not Found: unknown or expired session
    async fn verification_callback_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<CallbackQuery>,
        body: Bytes,
    ) -> Result<impl IntoResponse, ApiError> {
        let session_id = required(query.session_id, "sessionId")?;
        let did = state.verification.verify(&session_id, &body).await?;
        Ok(Json(json!({ "status": "verified", "did": did })))
    }

    /// Polls a verification session
    ///
    /// # Endpoint
    /// GET /api/v1/verification/status?id=<id>
    async fn verification_status_handler(
        State(state): State<Arc<ApiServer>>,
        Query(query): Query<StatusQuery>,
    ) -> Result<impl IntoResponse, ApiError> {
        let session_id = required(query.id, "id")?;
        state
            .verification
            .status(&session_id)
            .map(|did| Json(json!({ "status": "verified", "did": did })))
            .ok_or_else(|| ApiError::not_found("session not verified"))
    }

    // =====================
    // Issuer Handlers
    // =====================

    async fn issuers_handler(State(state): State<Arc<ApiServer>>) -> impl IntoResponse {
        Json(vec![state.issuer.issuer_did().to_string()])
    }

    fn ensure_issuer(&self, identifier: &str) -> Result<(), ApiError> {
        if identifier != self.issuer.issuer_did().to_string() {
            return Err(ApiError::not_found(format!("unknown identity {}", identifier)));
        }
        Ok(())
    }

    /// Issues a credential
    ///
    /// # Endpoint
    /// POST /api/v1/identities/:identifier/claims
    ///
    /// # Responses
    /// - 201 Created: `{id}`
    /// - 400 Bad Request: bad request body or schema
    /// - 404 Not Found: identifier is not this issuer
    async fn issue_claim_handler(
        State(state): State<Arc<ApiServer>>,
        Path(identifier): Path<String>,
        body: Bytes,
    ) -> Result<impl IntoResponse, ApiError> {
        state.ensure_issuer(&identifier)?;
        let request: CredentialRequest = serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid credential request: {}", e)))?;
        let credential = state.issuer.issue(request).await?;
        Ok((
            StatusCode::CREATED,
            Json(json!({ "id": credential.bare_id() })),
        ))
    }

    async fn list_claims_handler(
        State(state): State<Arc<ApiServer>>,
        Path(identifier): Path<String>,
        Query(query): Query<SubjectQuery>,
    ) -> Result<impl IntoResponse, ApiError> {
        state.ensure_issuer(&identifier)?;
        let credentials = state.issuer.list(query.subject.as_deref()).await?;
        Ok(Json(credentials))
    }

    async fn get_claim_handler(
        State(state): State<Arc<ApiServer>>,
        Path((identifier, claim_id)): Path<(String, String)>,
    ) -> Result<impl IntoResponse, ApiError> {
        state.ensure_issuer(&identifier)?;
        Ok(Json(state.issuer.get(&claim_id).await?))
    }

    /// Reads a credential's revocation status from the issuer's contract
    ///
    /// # Endpoint
    /// GET /api/v1/identities/:identifier/claims/revocation/status/:nonce
    ///
    /// # Responses
    /// - 200 OK: `{issuer, mtp}` with the non-membership (or membership) proof
    /// - 400 Bad Request: nonce is not an unsigned integer
    /// - 404 Not Found: identifier is not this issuer, or its state is not on-chain
    async fn revocation_status_handler(
        State(state): State<Arc<ApiServer>>,
        Path((identifier, nonce)): Path<(String, u64)>,
    ) -> Result<impl IntoResponse, ApiError> {
        state.ensure_issuer(&identifier)?;
        Ok(Json(state.issuer.revocation_status(nonce).await?))
    }

    /// Builds a credential offer for a wallet
    ///
    /// # Endpoint
    /// GET /api/v1/identities/:identifier/claims/offer?subject=<did>&claimId=<id>
    async fn offer_handler(
        State(state): State<Arc<ApiServer>>,
        Path(identifier): Path<String>,
        Query(query): Query<OfferQuery>,
    ) -> Result<impl IntoResponse, ApiError> {
        state.ensure_issuer(&identifier)?;
        let subject = required(query.subject, "subject")?;
        let claim_id = required(query.claim_id, "claimId")?;
        let offer = state
            .issuer
            .offer(&subject, &claim_id, &state.agent_url)
            .await?;
        Ok(Json(offer))
    }
}
