// src/blockchain/state_client.rs
//! Client for the iden3 State contract.
//!
//! The State contract records every published identity state and every root
//! of the Global Identity State Tree (GIST). Verifiers use it to make sure a
//! proof was generated against a root or state the chain actually knows, and
//! that it has not been superseded for too long.
//!
//! The same client reads credential revocation status from an issuer's
//! on-chain credential status resolver.

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers_contract::{BaseContract, Contract, ContractError};
use ethers_core::abi::Abi;
use ethers_core::types::{Address, U256};
use num_bigint::BigUint;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const STATE_ABI: &[u8] = include_bytes!("abi/State.json");
const CREDENTIAL_STATUS_ABI: &[u8] = include_bytes!("abi/CredentialStatusResolver.json");

/// How long a superseded root or state remains acceptable.
pub const REPLACED_STATE_MAX_AGE: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StateError {
    #[error("root or state is not known on-chain")]
    Unknown,

    #[error("root or state was replaced {age_secs}s ago")]
    Outdated { age_secs: i64 },

    #[error("root or state was replaced at an unknown time")]
    ReplacementTimeUnknown,

    #[error("state contract call failed: {0}")]
    Rpc(String),

    #[error("invalid state contract setup: {0}")]
    Setup(String),
}

/// On-chain record of a GIST root or an identity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedState {
    pub latest: bool,
    pub created_at: i64,
    pub replaced_at: i64,
}

impl ResolvedState {
    /// Accepts the latest record, or one replaced at most `max_age` before `now`.
    pub fn ensure_fresh(&self, now: i64, max_age: Duration) -> Result<(), StateError> {
        if self.latest {
            return Ok(());
        }
        if self.replaced_at == 0 {
            return Err(StateError::ReplacementTimeUnknown);
        }
        let age_secs = now - self.replaced_at;
        if age_secs > max_age.as_secs() as i64 {
            return Err(StateError::Outdated { age_secs });
        }
        Ok(())
    }
}

/// Read access to the State contract.
#[async_trait]
pub trait StateResolver: Send + Sync {
    /// Looks up a GIST root.
    async fn resolve_gist_root(&self, root: &BigUint) -> Result<ResolvedState, StateError>;

    /// Looks up a published state of the identity `id`.
    async fn resolve_state(&self, id: &BigUint, state: &BigUint)
        -> Result<ResolvedState, StateError>;

    /// The chain id the RPC endpoint reports.
    async fn chain_id(&self) -> Result<u64, StateError>;
}

/// Tree roots of the issuer state a revocation proof was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRoots {
    pub state: String,
    pub claims_tree_root: String,
    pub revocation_tree_root: String,
    pub root_of_roots: String,
}

/// Leaf met on the path to a missing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeAux {
    pub key: String,
    pub value: String,
}

/// Merkle proof of a nonce in the revocation tree. `existence` means revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationProof {
    pub existence: bool,
    pub siblings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_aux: Option<NodeAux>,
}

/// Revocation status of one credential nonce. Numbers are decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevocationStatus {
    pub issuer: IssuerRoots,
    pub mtp: RevocationProof,
}

impl RevocationStatus {
    pub fn is_revoked(&self) -> bool {
        self.mtp.existence
    }
}

/// Read access to on-chain credential status resolvers.
#[async_trait]
pub trait RevocationStatusResolver: Send + Sync {
    /// Looks up `nonce` in the revocation tree of identity `id`, kept by the
    /// resolver contract at `contract`.
    async fn revocation_status(
        &self,
        contract: Address,
        id: &BigUint,
        nonce: u64,
    ) -> Result<RevocationStatus, StateError>;
}

/// [`StateResolver`] backed by a JSON-RPC endpoint.
#[derive(Clone)]
pub struct EthStateClient {
    provider: Arc<Provider<Http>>,
    contract: Contract<Provider<Http>>,
    status_abi: BaseContract,
}

impl EthStateClient {
    /// Creates a client for the State contract at `contract_address`.
    ///
    /// # Arguments
    /// * `rpc_url` - JSON-RPC endpoint URL
    /// * `contract_address` - hex address of the deployed State contract
    ///
    /// # Errors
    /// Returns `StateError::Setup` if the URL or the address is invalid.
    pub fn new(rpc_url: &str, contract_address: &str) -> Result<Self, StateError> {
        let provider = Arc::new(
            Provider::<Http>::try_from(rpc_url).map_err(|e| StateError::Setup(e.to_string()))?,
        );
        let abi = Abi::load(STATE_ABI).map_err(|e| StateError::Setup(e.to_string()))?;
        let address: Address = contract_address
            .parse()
            .map_err(|e| StateError::Setup(format!("invalid contract address: {}", e)))?;
        let contract = Contract::new(address, BaseContract::from(abi), provider.clone());
        let status_abi = Abi::load(CREDENTIAL_STATUS_ABI)
            .map(BaseContract::from)
            .map_err(|e| StateError::Setup(e.to_string()))?;
        Ok(Self {
            provider,
            contract,
            status_abi,
        })
    }
}

#[async_trait]
impl StateResolver for EthStateClient {
    async fn resolve_gist_root(&self, root: &BigUint) -> Result<ResolvedState, StateError> {
        let (_root, replaced_by, created_at, replaced_at, _, _): (U256, U256, U256, U256, U256, U256) =
            self.contract
                .method("getGISTRootInfo", to_u256(root))
                .map_err(|e| StateError::Setup(e.to_string()))?
                .call()
                .await
                .map_err(classify)?;
        Ok(ResolvedState {
            latest: replaced_by.is_zero(),
            created_at: created_at.low_u64() as i64,
            replaced_at: replaced_at.low_u64() as i64,
        })
    }

    async fn resolve_state(
        &self,
        id: &BigUint,
        state: &BigUint,
    ) -> Result<ResolvedState, StateError> {
        let (_id, _state, replaced_by, created_at, replaced_at, _, _): (
            U256,
            U256,
            U256,
            U256,
            U256,
            U256,
            U256,
        ) = self
            .contract
            .method("getStateInfoByIdAndState", (to_u256(id), to_u256(state)))
            .map_err(|e| StateError::Setup(e.to_string()))?
            .call()
            .await
            .map_err(classify)?;
        Ok(ResolvedState {
            latest: replaced_by.is_zero(),
            created_at: created_at.low_u64() as i64,
            replaced_at: replaced_at.low_u64() as i64,
        })
    }

    async fn chain_id(&self) -> Result<u64, StateError> {
        self.provider
            .get_chainid()
            .await
            .map(|id| id.low_u64())
            .map_err(|e| StateError::Rpc(e.to_string()))
    }
}

type IssuerRootsWords = (U256, U256, U256, U256);
type ProofWords = (U256, bool, Vec<U256>, U256, U256, bool, U256, U256);

#[async_trait]
impl RevocationStatusResolver for EthStateClient {
    async fn revocation_status(
        &self,
        contract: Address,
        id: &BigUint,
        nonce: u64,
    ) -> Result<RevocationStatus, StateError> {
        let resolver = Contract::new(contract, self.status_abi.clone(), self.provider.clone());
        let (issuer, mtp): (IssuerRootsWords, ProofWords) = resolver
            .method("getRevocationStatus", (to_u256(id), nonce))
            .map_err(|e| StateError::Setup(e.to_string()))?
            .call()
            .await
            .map_err(classify)?;

        let (state, claims_tree_root, revocation_tree_root, root_of_roots) = issuer;
        let (_root, existence, siblings, _index, _value, aux_existence, aux_index, aux_value) = mtp;
        Ok(RevocationStatus {
            issuer: IssuerRoots {
                state: state.to_string(),
                claims_tree_root: claims_tree_root.to_string(),
                revocation_tree_root: revocation_tree_root.to_string(),
                root_of_roots: root_of_roots.to_string(),
            },
            mtp: RevocationProof {
                existence,
                siblings: siblings.iter().map(U256::to_string).collect(),
                node_aux: aux_existence.then(|| NodeAux {
                    key: aux_index.to_string(),
                    value: aux_value.to_string(),
                }),
            },
        })
    }
}

/// A revert means the contract has no record of the root or state.
fn classify<M: Middleware>(err: ContractError<M>) -> StateError {
    if err.is_revert() {
        return StateError::Unknown;
    }
    let message = err.to_string();
    if message.contains("execution reverted") {
        StateError::Unknown
    } else {
        StateError::Rpc(message)
    }
}

fn to_u256(value: &BigUint) -> U256 {
    U256::from_big_endian(&value.to_bytes_be())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every lookup with the same record and counts the calls.
    pub struct FixedState {
        pub answer: Result<ResolvedState, StateError>,
        pub calls: AtomicUsize,
    }

    impl FixedState {
        pub fn latest() -> Self {
            Self::answering(Ok(ResolvedState {
                latest: true,
                created_at: 0,
                replaced_at: 0,
            }))
        }

        pub fn answering(answer: Result<ResolvedState, StateError>) -> Self {
            Self {
                answer,
                calls: AtomicUsize::new(0),
            }
        }

        fn respond(&self) -> Result<ResolvedState, StateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    #[async_trait]
    impl StateResolver for FixedState {
        async fn resolve_gist_root(&self, _root: &BigUint) -> Result<ResolvedState, StateError> {
            self.respond()
        }

        async fn resolve_state(
            &self,
            _id: &BigUint,
            _state: &BigUint,
        ) -> Result<ResolvedState, StateError> {
            self.respond()
        }

        async fn chain_id(&self) -> Result<u64, StateError> {
            Ok(21001)
        }
    }

    /// Reports every nonce as revoked or not, recording the lookups.
    #[derive(Default)]
    pub struct FixedRevocation {
        pub revoked: bool,
        pub lookups: std::sync::Mutex<Vec<(Address, BigUint, u64)>>,
    }

    #[async_trait]
    impl RevocationStatusResolver for FixedRevocation {
        async fn revocation_status(
            &self,
            contract: Address,
            id: &BigUint,
            nonce: u64,
        ) -> Result<RevocationStatus, StateError> {
            self.lookups
                .lock()
                .unwrap()
                .push((contract, id.clone(), nonce));
            Ok(RevocationStatus {
                issuer: IssuerRoots {
                    state: "1".into(),
                    claims_tree_root: "2".into(),
                    revocation_tree_root: "3".into(),
                    root_of_roots: "4".into(),
                },
                mtp: RevocationProof {
                    existence: self.revoked,
                    siblings: vec![],
                    node_aux: None,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::abi::{encode, Token};
    use mockito::mock;

    fn rpc_result(words: &[u64]) -> String {
        let tuple = Token::Tuple(words.iter().map(|w| Token::Uint(U256::from(*w))).collect());
        format!(
            r#"{{"jsonrpc":"2.0","id":1,"result":"0x{}"}}"#,
            ethers::utils::hex::encode(encode(&[tuple]))
        )
    }

    #[test]
    fn test_latest_is_fresh() {
        let state = ResolvedState {
            latest: true,
            created_at: 10,
            replaced_at: 0,
        };
        assert_eq!(state.ensure_fresh(1_000_000, REPLACED_STATE_MAX_AGE), Ok(()));
    }

    #[test]
    fn test_recently_replaced_is_fresh() {
        let state = ResolvedState {
            latest: false,
            created_at: 10,
            replaced_at: 1_000,
        };
        assert_eq!(state.ensure_fresh(1_000 + 15 * 60, REPLACED_STATE_MAX_AGE), Ok(()));
        assert_eq!(
            state.ensure_fresh(1_000 + 15 * 60 + 1, REPLACED_STATE_MAX_AGE),
            Err(StateError::Outdated { age_secs: 901 })
        );
    }

    #[test]
    fn test_replaced_without_timestamp_is_rejected() {
        let state = ResolvedState {
            latest: false,
            created_at: 10,
            replaced_at: 0,
        };
        assert_eq!(
            state.ensure_fresh(20, REPLACED_STATE_MAX_AGE),
            Err(StateError::ReplacementTimeUnknown)
        );
    }

    #[test]
    fn test_big_uint_to_u256() {
        let value = BigUint::parse_bytes(b"123456789012345678901234567890", 10).unwrap();
        assert_eq!(
            to_u256(&value),
            U256::from_dec_str("123456789012345678901234567890").unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_contract_address() {
        assert!(matches!(
            EthStateClient::new("http://localhost:8545", "not-an-address"),
            Err(StateError::Setup(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_gist_root() {
        let _m = mock("POST", "/state-gist")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_result(&[7, 0, 1_700_000_000, 0, 100, 0]))
            .create();
        let client = EthStateClient::new(
            &format!("{}/state-gist", mockito::server_url()),
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap();
        let state = client.resolve_gist_root(&BigUint::from(7u32)).await.unwrap();
        assert!(state.latest);
        assert_eq!(state.created_at, 1_700_000_000);
    }

    #[tokio::test]
    async fn test_resolve_replaced_state() {
        let _m = mock("POST", "/state-info")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(rpc_result(&[1, 2, 3, 1_700_000_000, 1_700_000_500, 10, 11]))
            .create();
        let client = EthStateClient::new(
            &format!("{}/state-info", mockito::server_url()),
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap();
        let state = client
            .resolve_state(&BigUint::from(1u32), &BigUint::from(2u32))
            .await
            .unwrap();
        assert!(!state.latest);
        assert_eq!(state.replaced_at, 1_700_000_500);
    }

    #[tokio::test]
    async fn test_revert_means_unknown() {
        let _m = mock("POST", "/state-revert")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted: Root does not exist","data":"0x"}}"#,
            )
            .create();
        let client = EthStateClient::new(
            &format!("{}/state-revert", mockito::server_url()),
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap();
        assert_eq!(
            client.resolve_gist_root(&BigUint::from(7u32)).await,
            Err(StateError::Unknown)
        );
    }

    fn revocation_result(existence: bool, siblings: &[u64]) -> String {
        let uint = |w: u64| Token::Uint(U256::from(w));
        let status = Token::Tuple(vec![
            Token::Tuple(vec![uint(10), uint(11), uint(12), uint(13)]),
            Token::Tuple(vec![
                uint(99),
                Token::Bool(existence),
                Token::Array(siblings.iter().map(|s| uint(*s)).collect()),
                uint(0),
                uint(0),
                Token::Bool(!existence),
                uint(5),
                uint(6),
            ]),
        ]);
        format!(
            r#"{{"jsonrpc":"2.0","id":1,"result":"0x{}"}}"#,
            ethers::utils::hex::encode(encode(&[status]))
        )
    }

    #[tokio::test]
    async fn test_revocation_status_of_live_credential() {
        let _m = mock("POST", "/revocation-live")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(revocation_result(false, &[7, 8]))
            .create();
        let client = EthStateClient::new(
            &format!("{}/revocation-live", mockito::server_url()),
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap();
        let status = client
            .revocation_status(Address::from_low_u64_be(1), &BigUint::from(1u32), 42)
            .await
            .unwrap();

        assert!(!status.is_revoked());
        assert_eq!(status.issuer.state, "10");
        assert_eq!(status.issuer.root_of_roots, "13");
        assert_eq!(status.mtp.siblings, vec!["7", "8"]);
        assert_eq!(
            status.mtp.node_aux,
            Some(NodeAux {
                key: "5".into(),
                value: "6".into()
            })
        );
        let wire = serde_json::to_value(&status).unwrap();
        assert_eq!(wire["issuer"]["claimsTreeRoot"], "11");
        assert_eq!(wire["mtp"]["node_aux"]["key"], "5");
    }

    #[tokio::test]
    async fn test_revocation_status_of_revoked_credential() {
        let _m = mock("POST", "/revocation-revoked")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(revocation_result(true, &[]))
            .create();
        let client = EthStateClient::new(
            &format!("{}/revocation-revoked", mockito::server_url()),
            "0x0000000000000000000000000000000000000001",
        )
        .unwrap();
        let status = client
            .revocation_status(Address::from_low_u64_be(1), &BigUint::from(1u32), 42)
            .await
            .unwrap();
        assert!(status.is_revoked());
        assert!(status.mtp.siblings.is_empty());
        assert_eq!(status.mtp.node_aux, None);
        assert!(serde_json::to_value(&status).unwrap()["mtp"]
            .get("node_aux")
            .is_none());
    }
}
