// src/main.rs

//! # iden3 gateway - Main Entry Point
//!
//! Loads settings, connects to the State contract, wires the services
//! together and starts the API server.
//!
//! ## Initialization Sequence
//! 1. Load `.env`, initialise logging, load settings
//! 2. Load circuit verification keys
//! 3. Connect to the State contract and check the chain id; the same client
//!    reads revocation status from issuer contracts
//! 4. Initialize service components and session sweepers
//! 5. Start API server

use anyhow::Context;
use dotenv::dotenv;
use iden3_gateway::blockchain::state_client::{EthStateClient, StateResolver};
use iden3_gateway::config::Settings;
use iden3_gateway::iden3comm::packer::{Packer, ZkpPacker};
use iden3_gateway::models::did::Did;
use iden3_gateway::models::protocol::{CIRCUIT_ATOMIC_QUERY_MTP_V2, CIRCUIT_AUTH_V2};
use iden3_gateway::services::api_server::ApiServer;
use iden3_gateway::services::authentication::{demo_did_pool, AuthenticationService};
use iden3_gateway::services::credential_issuer::CredentialIssuer;
use iden3_gateway::services::iden3comm::Iden3commService;
use iden3_gateway::services::session_store::SessionStore;
use iden3_gateway::services::verification::VerificationService;
use iden3_gateway::services::verifier::{AuthVerifier, FullVerifier};
use iden3_gateway::storage::credential_repository::{
    CredentialRepository, InMemoryCredentialRepository,
};
use iden3_gateway::storage::document_loader::HttpDocumentLoader;
use iden3_gateway::zkp::proof_verification::VerificationKeys;
use std::net::SocketAddr;
use std::sync::Arc;

/// Warns when the RPC endpoint is on another chain than the verifier DID.
async fn check_chain(settings: &Settings, did: &Did, state: &dyn StateResolver) {
    let did_chain = match did.chain_and_address() {
        Ok((chain_id, _)) => chain_id,
        Err(e) => {
            log::warn!("verifier DID has no chain id: {}", e);
            return;
        }
    };
    let expected = settings.expected_rpc_chain_id(did_chain);
    match state.chain_id().await {
        Ok(rpc_chain) if rpc_chain == expected => {
            log::info!("RPC chain id {} matches verifier DID chain {}", rpc_chain, did_chain)
        }
        Ok(rpc_chain) => log::warn!(
            "RPC endpoint reports chain id {}, verifier DID is on chain {} (expected {}); \
             set CHAIN_ALIASES if this is intended",
            rpc_chain,
            did_chain,
            expected
        ),
        Err(e) => log::warn!("cannot read chain id from RPC endpoint: {}", e),
    }
}

/// Main application entry point
///
/// # Errors
/// - If settings are missing or the verifier DID is invalid
/// - If verification keys cannot be read
/// - If the State contract address is invalid
/// - If the listen address cannot be bound
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let settings = Settings::load().context("failed to load settings")?;
    let verifier_did = settings.verifier_did()?;

    let keys = Arc::new(
        VerificationKeys::load_dir(&settings.keys_dir)
            .with_context(|| format!("failed to load keys from {}", settings.keys_dir.display()))?,
    );
    anyhow::ensure!(
        keys.contains(CIRCUIT_AUTH_V2),
        "no {} verification key in {}",
        CIRCUIT_AUTH_V2,
        settings.keys_dir.display()
    );
    if !keys.contains(CIRCUIT_ATOMIC_QUERY_MTP_V2) {
        log::warn!(
            "no {} verification key: every verification callback will be rejected",
            CIRCUIT_ATOMIC_QUERY_MTP_V2
        );
    }
    let chain = Arc::new(
        EthStateClient::new(&settings.rpc_url, &settings.state_contract_address)
            .context("failed to set up the State contract client")?,
    );
    let state: Arc<dyn StateResolver> = chain.clone();
    check_chain(&settings, &verifier_did, state.as_ref()).await;

    let packer: Arc<dyn Packer> = Arc::new(ZkpPacker::new(Arc::clone(&keys), Arc::clone(&state)));
    let verifier: Arc<dyn AuthVerifier> = Arc::new(FullVerifier::new(
        Arc::clone(&packer),
        keys,
        Arc::clone(&state),
        Arc::new(HttpDocumentLoader::new()),
    ));
    let repository: Arc<dyn CredentialRepository> = Arc::new(InMemoryCredentialRepository::new());

    let login_sessions = Arc::new(SessionStore::new(settings.session_ttl()));
    let verification_sessions = Arc::new(SessionStore::new(settings.session_ttl()));
    login_sessions.spawn_sweeper(settings.session_ttl());
    verification_sessions.spawn_sweeper(settings.session_ttl());

    let issuer = CredentialIssuer::new(
        verifier_did.clone(),
        Arc::clone(&repository),
        chain,
        settings.degree_schema_url(),
    );

    let mut authentication = AuthenticationService::new(
        &verifier_did,
        settings.login_callback_url(),
        login_sessions,
        Arc::clone(&verifier),
    );
    let mut iden3comm = Iden3commService::new(packer, repository);
    if settings.demo_mode {
        log::warn!("DEMO_MODE enabled: logins are not verified and fetches mint demo credentials");
        authentication = authentication.with_demo_pool(demo_did_pool()?);
        iden3comm = iden3comm.with_demo_issuer(issuer.clone());
    }

    let verification = VerificationService::new(
        &verifier_did,
        settings.verification_callback_url(),
        settings.json_ld_context_url.clone(),
        verification_sessions,
        verifier,
    );

    let api_server = ApiServer::new(
        authentication,
        verification,
        iden3comm,
        issuer,
        settings.agent_url(),
        settings.schemas_dir.clone(),
    );

    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port)
        .parse()
        .context("invalid HOST/PORT")?;
    log::info!("verifier DID: {}", verifier_did);
    api_server.run(addr).await?;
    Ok(())
}
