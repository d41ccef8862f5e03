// src/config.rs
//! Startup settings.
//!
//! Sources, lowest precedence first: built-in defaults, an optional
//! `gateway.{toml,json,yaml}` file in the working directory, and environment
//! variables (`PORT`, `VERIFIER_DID`, ...). A `.env` file is loaded into the
//! environment before this runs.

use crate::models::did::{Did, DidError};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("VERIFIER_DID is invalid: {0}")]
    VerifierDid(#[from] DidError),

    #[error("CHAIN_ALIASES entry '{0}' is not of the form <didChainId>=<rpcChainId>")]
    ChainAlias(String),

    #[error("SESSION_TTL_SECS must be at least 1")]
    SessionTtl,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// DID the service issues and verifies as.
    pub verifier_did: String,
    /// Public base URL wallets call back to.
    pub callback_base_url: String,
    /// JSON-LD context used in verification queries.
    pub json_ld_context_url: String,
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default)]
    pub degree_schema_url: Option<String>,
    pub rpc_url: String,
    pub state_contract_address: String,
    pub keys_dir: PathBuf,
    pub schemas_dir: PathBuf,
    pub session_ttl_secs: u64,
    /// `<didChainId>=<rpcChainId>` pairs, comma-separated.
    #[serde(default)]
    pub chain_aliases: String,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        Self::from_environment(Environment::default())
    }

    /// Loads settings with `env` as the environment source.
    pub fn from_environment(env: Environment) -> Result<Self, SettingsError> {
        let settings: Settings = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 3001)?
            .set_default("demo_mode", false)?
            .set_default("rpc_url", "http://localhost:8545")?
            .set_default("keys_dir", "./keys")?
            .set_default("schemas_dir", "./schemas")?
            .set_default("session_ttl_secs", 3600)?
            .set_default("chain_aliases", "")?
            .add_source(File::with_name("gateway").required(false))
            .add_source(env.try_parsing(true))
            .build()?
            .try_deserialize()?;

        // Fail at startup rather than at the first credential.
        settings.verifier_did()?;
        settings.chain_aliases()?;
        // The TTL doubles as the sweep period, which cannot be zero.
        if settings.session_ttl_secs == 0 {
            return Err(SettingsError::SessionTtl);
        }
        Ok(settings)
    }

    pub fn verifier_did(&self) -> Result<Did, DidError> {
        self.verifier_did.parse()
    }

    fn base(&self) -> &str {
        self.callback_base_url.trim_end_matches('/')
    }

    pub fn login_callback_url(&self) -> String {
        format!("{}/api/v1/callback", self.base())
    }

    pub fn verification_callback_url(&self) -> String {
        format!("{}/api/v1/verification/callback", self.base())
    }

    pub fn agent_url(&self) -> String {
        format!("{}/api/v1/agent", self.base())
    }

    pub fn degree_schema_url(&self) -> String {
        self.degree_schema_url
            .clone()
            .unwrap_or_else(|| format!("{}/schemas/degree-credential-schema.json", self.base()))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Parses `CHAIN_ALIASES` into a DID chain id → RPC chain id map.
    pub fn chain_aliases(&self) -> Result<HashMap<u64, u64>, SettingsError> {
        self.chain_aliases
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (did_chain, rpc_chain) = entry
                    .split_once('=')
                    .ok_or_else(|| SettingsError::ChainAlias(entry.to_string()))?;
                let parse = |s: &str| {
                    s.trim()
                        .parse::<u64>()
                        .map_err(|_| SettingsError::ChainAlias(entry.to_string()))
                };
                Ok((parse(did_chain)?, parse(rpc_chain)?))
            })
            .collect()
    }

    /// The chain id the RPC endpoint should report for identities anchored
    /// on `did_chain_id`.
    pub fn expected_rpc_chain_id(&self, did_chain_id: u64) -> u64 {
        self.chain_aliases()
            .ok()
            .and_then(|aliases| aliases.get(&did_chain_id).copied())
            .unwrap_or(did_chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DID: &str = "did:iden3:privado:test:2Skqvp4vnSFtq5bgAXbDs1Fs4AA5QGpRut9mCDfGdm";

    fn env(pairs: &[(&str, &str)]) -> Environment {
        let mut map: HashMap<String, String> = [
            ("VERIFIER_DID", DID),
            ("CALLBACK_BASE_URL", "https://verifier.example/"),
            ("JSON_LD_CONTEXT_URL", "https://verifier.example/schemas/degree.jsonld"),
            ("STATE_CONTRACT_ADDRESS", "0x1a4cC30f2aA0377b0c3bc9848766D90cb4404124"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            map.insert(k.to_string(), v.to_string());
        }
        Environment::default().source(Some(map))
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_environment(env(&[])).unwrap();
        assert_eq!(settings.port, 3001);
        assert_eq!(settings.host, "0.0.0.0");
        assert!(!settings.demo_mode);
        assert_eq!(settings.session_ttl(), Duration::from_secs(3600));
        assert_eq!(
            settings.login_callback_url(),
            "https://verifier.example/api/v1/callback"
        );
        assert_eq!(
            settings.degree_schema_url(),
            "https://verifier.example/schemas/degree-credential-schema.json"
        );
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_environment(env(&[
            ("PORT", "8080"),
            ("DEMO_MODE", "true"),
            ("CHAIN_ALIASES", "21001=31337, 80002=80002"),
        ]))
        .unwrap();
        assert_eq!(settings.port, 8080);
        assert!(settings.demo_mode);
        assert_eq!(settings.expected_rpc_chain_id(21001), 31337);
        assert_eq!(settings.expected_rpc_chain_id(137), 137);
    }

    #[test]
    fn test_invalid_verifier_did_is_fatal() {
        let err = Settings::from_environment(env(&[("VERIFIER_DID", "did:iden3:privado:test:xyz")]))
            .unwrap_err();
        assert!(matches!(err, SettingsError::VerifierDid(_)));
    }

    #[test]
    fn test_zero_session_ttl_is_fatal() {
        let err = Settings::from_environment(env(&[("SESSION_TTL_SECS", "0")])).unwrap_err();
        assert!(matches!(err, SettingsError::SessionTtl));
    }

    #[test]
    fn test_invalid_alias_is_fatal() {
        let err =
            Settings::from_environment(env(&[("CHAIN_ALIASES", "21001")])).unwrap_err();
        assert!(matches!(err, SettingsError::ChainAlias(_)));
    }
}
