// src/models/did.rs
//! Decentralized Identifier (DID) codec for iden3 identities.
//!
//! An iden3 DID has the form `did:<method>:<blockchain>:<network>:<id>` (or
//! `did:<method>:<id>` for read-only identities). The `<id>` segment is the
//! base58 encoding of a 31-byte identifier:
//!
//! ```text
//! | type (2) | genesis (27) | checksum (2, little-endian byte sum) |
//! ```
//!
//! The type bytes carry the DID method and the blockchain/network flag. For
//! identities owned by an on-chain contract, the genesis region is seven zero
//! bytes followed by the 20-byte contract address.

use ethers_core::types::Address;
use num_bigint::BigUint;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const ID_LENGTH: usize = 31;
const GENESIS_LENGTH: usize = 27;
const ETH_PREFIX_LENGTH: usize = GENESIS_LENGTH - 20;

/// Errors produced while parsing or deriving data from a DID.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DidError {
    #[error("malformed DID '{0}'")]
    Malformed(String),

    #[error("unsupported DID method '{0}'")]
    UnknownMethod(String),

    #[error("unsupported blockchain/network '{0}:{1}'")]
    UnknownNetwork(String, String),

    #[error("invalid base58 identifier '{0}'")]
    InvalidBase58(String),

    #[error("identifier must be 31 bytes, got {0}")]
    InvalidLength(usize),

    #[error("identifier checksum mismatch")]
    ChecksumMismatch,

    #[error("DID '{0}' does not match the type bytes of its identifier")]
    TypeMismatch(String),

    #[error("DID '{0}' does not round-trip")]
    RoundTrip(String),

    #[error("identifier of '{0}' is not derived from a contract address")]
    NotEthDerived(String),

    #[error("no chain id is registered for '{0}'")]
    NoChainId(String),

    #[error("invalid contract address '{0}'")]
    InvalidAddress(String),
}

/// DID methods understood by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DidMethod {
    Iden3,
    PolygonId,
}

impl DidMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DidMethod::Iden3 => "iden3",
            DidMethod::PolygonId => "polygonid",
        }
    }

    fn byte(&self) -> u8 {
        match self {
            DidMethod::Iden3 => 0b0000_0001,
            DidMethod::PolygonId => 0b0000_0010,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0b0000_0001 => Some(DidMethod::Iden3),
            0b0000_0010 => Some(DidMethod::PolygonId),
            _ => None,
        }
    }
}

impl FromStr for DidMethod {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "iden3" => Ok(DidMethod::Iden3),
            "polygonid" => Ok(DidMethod::PolygonId),
            other => Err(DidError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blockchain {
    ReadOnly,
    Ethereum,
    Polygon,
    ZkEvm,
    Linea,
    Privado,
    Billions,
}

impl Blockchain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::ReadOnly => "readonly",
            Blockchain::Ethereum => "eth",
            Blockchain::Polygon => "polygon",
            Blockchain::ZkEvm => "zkevm",
            Blockchain::Linea => "linea",
            Blockchain::Privado => "privado",
            Blockchain::Billions => "billions",
        }
    }
}

impl FromStr for Blockchain {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Blockchain::ReadOnly),
            "eth" => Ok(Blockchain::Ethereum),
            "polygon" => Ok(Blockchain::Polygon),
            "zkevm" => Ok(Blockchain::ZkEvm),
            "linea" => Ok(Blockchain::Linea),
            "privado" => Ok(Blockchain::Privado),
            "billions" => Ok(Blockchain::Billions),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    NoNetwork,
    Main,
    Mumbai,
    Amoy,
    Goerli,
    Sepolia,
    Test,
    Cardona,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::NoNetwork => "",
            Network::Main => "main",
            Network::Mumbai => "mumbai",
            Network::Amoy => "amoy",
            Network::Goerli => "goerli",
            Network::Sepolia => "sepolia",
            Network::Test => "test",
            Network::Cardona => "cardona",
        }
    }
}

impl FromStr for Network {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Network::Main),
            "mumbai" => Ok(Network::Mumbai),
            "amoy" => Ok(Network::Amoy),
            "goerli" => Ok(Network::Goerli),
            "sepolia" => Ok(Network::Sepolia),
            "test" => Ok(Network::Test),
            "cardona" => Ok(Network::Cardona),
            _ => Err(()),
        }
    }
}

/// (blockchain, network, type flag byte, chain id). Read-only identities have
/// no chain.
const NETWORKS: &[(Blockchain, Network, u8, Option<u64>)] = &[
    (Blockchain::ReadOnly, Network::NoNetwork, 0b0000_0000, None),
    (Blockchain::Polygon, Network::Main, 0b0001_0001, Some(137)),
    (Blockchain::Polygon, Network::Mumbai, 0b0001_0010, Some(80001)),
    (Blockchain::Polygon, Network::Amoy, 0b0001_0011, Some(80002)),
    (Blockchain::Ethereum, Network::Main, 0b0010_0001, Some(1)),
    (Blockchain::Ethereum, Network::Goerli, 0b0010_0010, Some(5)),
    (Blockchain::Ethereum, Network::Sepolia, 0b0010_0011, Some(11155111)),
    (Blockchain::ZkEvm, Network::Main, 0b0011_0001, Some(1101)),
    (Blockchain::ZkEvm, Network::Test, 0b0011_0010, Some(1442)),
    (Blockchain::ZkEvm, Network::Cardona, 0b0011_0011, Some(2442)),
    (Blockchain::Linea, Network::Main, 0b0100_1001, Some(59144)),
    (Blockchain::Linea, Network::Sepolia, 0b0100_1000, Some(59141)),
    (Blockchain::Privado, Network::Main, 0b1010_0001, Some(21000)),
    (Blockchain::Privado, Network::Test, 0b1010_0010, Some(21001)),
    (Blockchain::Billions, Network::Main, 0b1011_0001, Some(45056)),
    (Blockchain::Billions, Network::Test, 0b1011_0010, Some(6913)),
];

fn network_flag(blockchain: Blockchain, network: Network) -> Option<u8> {
    NETWORKS
        .iter()
        .find(|(b, n, _, _)| *b == blockchain && *n == network)
        .map(|(_, _, flag, _)| *flag)
}

fn network_from_flag(flag: u8) -> Option<(Blockchain, Network)> {
    NETWORKS
        .iter()
        .find(|(_, _, f, _)| *f == flag)
        .map(|(b, n, _, _)| (*b, *n))
}

fn chain_id(blockchain: Blockchain, network: Network) -> Option<u64> {
    NETWORKS
        .iter()
        .find(|(b, n, _, _)| *b == blockchain && *n == network)
        .and_then(|(_, _, _, id)| *id)
}

/// The 31-byte iden3 identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; ID_LENGTH]);

impl Id {
    /// Builds an identifier from its type bytes and genesis, computing the checksum.
    pub fn new(typ: [u8; 2], genesis: [u8; GENESIS_LENGTH]) -> Self {
        let mut bytes = [0u8; ID_LENGTH];
        bytes[..2].copy_from_slice(&typ);
        bytes[2..2 + GENESIS_LENGTH].copy_from_slice(&genesis);
        let checksum = checksum(&typ, &genesis);
        bytes[2 + GENESIS_LENGTH..].copy_from_slice(&checksum.to_le_bytes());
        Id(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DidError> {
        if bytes.len() != ID_LENGTH {
            return Err(DidError::InvalidLength(bytes.len()));
        }
        let mut raw = [0u8; ID_LENGTH];
        raw.copy_from_slice(bytes);
        let id = Id(raw);
        if checksum(&id.typ(), &id.genesis()) != id.checksum() {
            return Err(DidError::ChecksumMismatch);
        }
        Ok(id)
    }

    /// Interprets a circuit signal (little-endian field element) as an identifier.
    pub fn from_big_int(value: &BigUint) -> Result<Self, DidError> {
        let mut le = value.to_bytes_le();
        if le.len() > ID_LENGTH {
            return Err(DidError::InvalidLength(le.len()));
        }
        le.resize(ID_LENGTH, 0);
        Id::from_bytes(&le)
    }

    pub fn to_big_int(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    pub fn typ(&self) -> [u8; 2] {
        [self.0[0], self.0[1]]
    }

    pub fn genesis(&self) -> [u8; GENESIS_LENGTH] {
        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis.copy_from_slice(&self.0[2..2 + GENESIS_LENGTH]);
        genesis
    }

    fn checksum(&self) -> u16 {
        u16::from_le_bytes([self.0[ID_LENGTH - 2], self.0[ID_LENGTH - 1]])
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    /// The contract address held in the low 20 bytes of the genesis, provided
    /// the leading seven bytes are zero.
    pub fn eth_address(&self) -> Option<Address> {
        let genesis = self.genesis();
        if genesis[..ETH_PREFIX_LENGTH].iter().any(|b| *b != 0) {
            return None;
        }
        Some(Address::from_slice(&genesis[ETH_PREFIX_LENGTH..]))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| DidError::InvalidBase58(s.to_string()))?;
        Id::from_bytes(&bytes)
    }
}

fn checksum(typ: &[u8; 2], genesis: &[u8; GENESIS_LENGTH]) -> u16 {
    typ.iter()
        .chain(genesis.iter())
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// A parsed iden3 DID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Did {
    method: DidMethod,
    blockchain: Blockchain,
    network: Network,
    id: Id,
}

impl Did {
    pub fn method(&self) -> DidMethod {
        self.method
    }

    pub fn blockchain(&self) -> Blockchain {
        self.blockchain
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Reconstructs the DID from a bare identifier using its type bytes.
    pub fn from_id(id: Id) -> Result<Self, DidError> {
        let [method_byte, flag] = id.typ();
        let method = DidMethod::from_byte(method_byte)
            .ok_or_else(|| DidError::UnknownMethod(format!("{method_byte:#04x}")))?;
        let (blockchain, network) = network_from_flag(flag)
            .ok_or_else(|| DidError::UnknownNetwork(format!("{flag:#04x}"), String::new()))?;
        Ok(Did {
            method,
            blockchain,
            network,
            id,
        })
    }

    /// The chain id and contract address this identity is anchored at.
    pub fn chain_and_address(&self) -> Result<(u64, Address), DidError> {
        let address = self
            .id
            .eth_address()
            .ok_or_else(|| DidError::NotEthDerived(self.to_string()))?;
        let chain_id = chain_id(self.blockchain, self.network).ok_or_else(|| {
            DidError::NoChainId(format!(
                "{}:{}",
                self.blockchain.as_str(),
                self.network.as_str()
            ))
        })?;
        Ok((chain_id, address))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.blockchain == Blockchain::ReadOnly {
            return write!(f, "did:{}:{}", self.method.as_str(), self.id);
        }
        write!(
            f,
            "did:{}:{}:{}:{}",
            self.method.as_str(),
            self.blockchain.as_str(),
            self.network.as_str(),
            self.id
        )
    }
}

impl FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.first() != Some(&"did") {
            return Err(DidError::Malformed(s.to_string()));
        }
        let (method, blockchain, network, id_str) = match parts.as_slice() {
            [_, method, id] => (method.parse()?, Blockchain::ReadOnly, Network::NoNetwork, *id),
            [_, method, blockchain, network, id] => {
                let unknown =
                    || DidError::UnknownNetwork(blockchain.to_string(), network.to_string());
                (
                    method.parse()?,
                    blockchain.parse().map_err(|_| unknown())?,
                    network.parse().map_err(|_| unknown())?,
                    *id,
                )
            }
            _ => return Err(DidError::Malformed(s.to_string())),
        };

        let id: Id = id_str.parse()?;
        let expected_typ = build_did_type(method, blockchain, network)?;
        if id.typ() != expected_typ {
            return Err(DidError::TypeMismatch(s.to_string()));
        }

        let did = Did {
            method,
            blockchain,
            network,
            id,
        };
        if did.to_string() != s {
            return Err(DidError::RoundTrip(s.to_string()));
        }
        Ok(did)
    }
}

fn build_did_type(
    method: DidMethod,
    blockchain: Blockchain,
    network: Network,
) -> Result<[u8; 2], DidError> {
    let flag = network_flag(blockchain, network).ok_or_else(|| {
        DidError::UnknownNetwork(blockchain.as_str().to_string(), network.as_str().to_string())
    })?;
    Ok([method.byte(), flag])
}

/// Builds a DID for the given method/network from raw genesis bytes.
pub fn build_did(
    method: DidMethod,
    blockchain: Blockchain,
    network: Network,
    genesis: [u8; GENESIS_LENGTH],
) -> Result<Did, DidError> {
    let typ = build_did_type(method, blockchain, network)?;
    Ok(Did {
        method,
        blockchain,
        network,
        id: Id::new(typ, genesis),
    })
}

/// Builds the DID of an identity owned by the contract at `addr_hex`.
///
/// The 20-byte address is left-padded with seven zero bytes to fill the
/// genesis region.
pub fn did_from_contract(
    method: DidMethod,
    blockchain: Blockchain,
    network: Network,
    addr_hex: &str,
) -> Result<Did, DidError> {
    let address: Address = addr_hex
        .parse()
        .map_err(|_| DidError::InvalidAddress(addr_hex.to_string()))?;
    let mut genesis = [0u8; GENESIS_LENGTH];
    genesis[ETH_PREFIX_LENGTH..].copy_from_slice(address.as_bytes());
    build_did(method, blockchain, network, genesis)
}
