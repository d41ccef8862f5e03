// src/utils/crypto.rs
//! Hash functions shared by the envelope codec and the query verifier.
//!
//! - Keccak-256 (Ethereum's hash) for schema hashes.
//! - SHA-256 followed by circom-compatible Poseidon for JWZ challenges.
//! - The iden3 Poseidon sponge over bytes, for JSON-LD claim path keys.

use ethers::utils::keccak256;
use ff_ce::PrimeField;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use poseidon_rs::{Fr, Poseidon};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Inputs absorbed per sponge permutation by [`hash_bytes`].
const SPONGE_WIDTH: usize = 16;

/// Bytes packed into one field element by [`hash_bytes`].
const BYTES_PER_ELEMENT: usize = 31;

static POSEIDON: Lazy<Poseidon> = Lazy::new(Poseidon::new);

/// Order of the BN254 scalar field.
static FIELD_MODULUS: Lazy<BigUint> =
    Lazy::new(|| <ark_bn254::Fr as ark_ff::PrimeField>::MODULUS.into());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoseidonError {
    #[error("{0} is not a BN254 scalar")]
    NotInField(String),

    #[error("poseidon: {0}")]
    Hash(String),
}

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte array containing the hash.
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// The iden3 schema hash of a credential type: the low 16 bytes of
/// `keccak256("<jsonLdContext>#<type>")`, read as a little-endian integer.
///
/// This is the value the atomic query circuits expose as `claimSchema`.
pub fn schema_hash(context: &str, credential_type: &str) -> BigUint {
    let digest = hash_data(format!("{}#{}", context, credential_type).as_bytes());
    BigUint::from_bytes_le(&digest[16..])
}

/// Whether `value` is a canonical BN254 scalar.
pub fn in_field(value: &BigUint) -> bool {
    value < &*FIELD_MODULUS
}

fn to_fr(value: &BigUint) -> Result<Fr, PoseidonError> {
    if !in_field(value) {
        return Err(PoseidonError::NotInField(value.to_string()));
    }
    <Fr as PrimeField>::from_str(&value.to_string())
        .ok_or_else(|| PoseidonError::NotInField(value.to_string()))
}

fn from_fr(element: Fr) -> BigUint {
    let repr = element.into_repr();
    let bytes: Vec<u8> = repr
        .as_ref()
        .iter()
        .flat_map(|limb| limb.to_le_bytes())
        .collect();
    BigUint::from_bytes_le(&bytes)
}

/// Poseidon (circom parameters) over 1 to 16 BN254 scalars.
///
/// # Errors
/// `NotInField` for an input not below the field order, `Hash` for an
/// unsupported number of inputs.
pub fn poseidon_hash(inputs: &[BigUint]) -> Result<BigUint, PoseidonError> {
    let elements = inputs.iter().map(to_fr).collect::<Result<Vec<_>, _>>()?;
    POSEIDON
        .hash(elements)
        .map(from_fr)
        .map_err(PoseidonError::Hash)
}

/// Hashes arbitrary bytes the way iden3 merklization does.
///
/// The input is cut into 31-byte little-endian chunks (the last one zero
/// padded) and absorbed 16 at a time. Each full frame is replaced by its
/// hash followed by 15 zeros. An empty input hashes to zero.
pub fn hash_bytes(bytes: &[u8]) -> Result<BigUint, PoseidonError> {
    let zero = BigUint::default();
    let mut frame = vec![zero.clone(); SPONGE_WIDTH];
    let mut hash = zero.clone();
    let mut dirty = false;
    let mut k = 0;

    for chunk in bytes.chunks(BYTES_PER_ELEMENT) {
        let mut padded = [0u8; BYTES_PER_ELEMENT];
        padded[..chunk.len()].copy_from_slice(chunk);
        frame[k] = BigUint::from_bytes_le(&padded);
        dirty = true;
        if k == SPONGE_WIDTH - 1 {
            hash = poseidon_hash(&frame)?;
            dirty = false;
            frame = vec![zero.clone(); SPONGE_WIDTH];
            frame[0] = hash.clone();
            k = 1;
        } else {
            k += 1;
        }
    }
    if dirty {
        hash = poseidon_hash(&frame)?;
    }
    Ok(hash)
}

/// The challenge a JWZ proof commits to: `Poseidon(sha256(message) mod r)`,
/// with the digest read little-endian.
pub fn message_challenge(message: &[u8]) -> Result<BigUint, PoseidonError> {
    let digest = Sha256::digest(message);
    let element = BigUint::from_bytes_le(&digest) % &*FIELD_MODULUS;
    poseidon_hash(&[element])
}
