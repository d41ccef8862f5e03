//! # iden3 gateway
//!
//! Self-sovereign identity service built on the iden3 protocol: wallet login
//! and credential verification through zero-knowledge proofs, and issuance
//! of W3C credentials anchored to an on-chain State contract.
//!
//! ## Architecture Overview
//! 1. **Models**: DID codec, credentials, iden3comm messages
//! 2. **ZKP Layer**: Groth16 verification, public signals, query predicates
//! 3. **iden3comm Layer**: JWZ envelopes and the ZKP packer
//! 4. **Blockchain Layer**: State contract client for GIST roots and identity states
//! 5. **Services Layer**: sessions, login, verification, issuance, HTTP API

pub mod blockchain;
pub mod config;
pub mod error;
pub mod iden3comm;
pub mod models;
pub mod services;
pub mod storage;
pub mod utils;
pub mod zkp;
