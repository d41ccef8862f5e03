pub mod api_server;
pub mod authentication;
pub mod credential_issuer;
pub mod iden3comm;
pub mod session_store;
pub mod verification;
pub mod verifier;
