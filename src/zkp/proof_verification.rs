// src/zkp/proof_verification.rs
//! # Zero-Knowledge Proof Verification
//!
//! Groth16 verification over BN254 for the iden3 circuits. Verification keys
//! are the `verification_key.json` files snarkjs exports, one per circuit id,
//! and proofs arrive in the matching snarkjs JSON encoding (decimal strings,
//! affine points with a trailing `"1"`).
//!
//! ## Cryptographic Components
//! - **Groth16**: zk-SNARK proving system
//! - **BN254**: pairing curve (`bn128` in snarkjs terms)

use crate::models::protocol::{ProofData, ZkProof};
use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_ff::PrimeField;
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey};
use ark_snark::SNARK;
use num_bigint::BigUint;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

static FR_MODULUS: Lazy<BigUint> = Lazy::new(|| Fr::MODULUS.into());
static FQ_MODULUS: Lazy<BigUint> = Lazy::new(|| Fq::MODULUS.into());

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("no verification key for circuit '{0}'")]
    UnknownCircuit(String),

    #[error("invalid verification key for '{circuit}': {reason}")]
    InvalidKey { circuit: String, reason: String },

    #[error("malformed proof: {0}")]
    Malformed(String),

    #[error("public signal '{0}' is not a canonical field element")]
    SignalOutOfField(String),

    #[error("expected {expected} public signals, got {got}")]
    SignalCount { expected: usize, got: usize },

    #[error("groth16 proof does not verify")]
    Rejected,

    #[error("failed to read verification keys: {0}")]
    Io(#[from] std::io::Error),
}

/// snarkjs `verification_key.json`.
#[derive(Debug, Deserialize)]
struct SnarkjsVerificationKey {
    protocol: String,
    vk_alpha_1: Vec<String>,
    vk_beta_2: Vec<Vec<String>>,
    vk_gamma_2: Vec<Vec<String>>,
    vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    ic: Vec<Vec<String>>,
}

/// Prepared verification keys indexed by circuit id.
#[derive(Default)]
pub struct VerificationKeys {
    keys: HashMap<String, PreparedVerifyingKey<Bn254>>,
}

impl VerificationKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `<circuitId>.json` file in `dir`.
    ///
    /// # Returns
    /// The loaded keys; files that fail to parse abort the load.
    pub fn load_dir(dir: &Path) -> Result<Self, ProofError> {
        let mut keys = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(circuit_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let raw = std::fs::read_to_string(&path)?;
            keys.insert_json(circuit_id, &raw)?;
            log::info!("loaded verification key for {}", circuit_id);
        }
        Ok(keys)
    }

    /// Parses a snarkjs verification key and registers it under `circuit_id`.
    pub fn insert_json(&mut self, circuit_id: &str, raw: &str) -> Result<(), ProofError> {
        let invalid = |reason: String| ProofError::InvalidKey {
            circuit: circuit_id.to_string(),
            reason,
        };
        let vk: SnarkjsVerificationKey =
            serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;
        if vk.protocol != "groth16" {
            return Err(invalid(format!("unsupported protocol '{}'", vk.protocol)));
        }

        let vk = VerifyingKey::<Bn254> {
            alpha_g1: parse_g1(&vk.vk_alpha_1).map_err(|e| invalid(e.to_string()))?,
            beta_g2: parse_g2(&vk.vk_beta_2).map_err(|e| invalid(e.to_string()))?,
            gamma_g2: parse_g2(&vk.vk_gamma_2).map_err(|e| invalid(e.to_string()))?,
            delta_g2: parse_g2(&vk.vk_delta_2).map_err(|e| invalid(e.to_string()))?,
            gamma_abc_g1: vk
                .ic
                .iter()
                .map(|p| parse_g1(p))
                .collect::<Result<_, _>>()
                .map_err(|e| invalid(e.to_string()))?,
        };
        let prepared = Groth16::<Bn254>::process_vk(&vk).map_err(|e| invalid(e.to_string()))?;
        self.keys.insert(circuit_id.to_string(), prepared);
        Ok(())
    }

    /// Whether a key is registered for `circuit_id`.
    pub fn contains(&self, circuit_id: &str) -> bool {
        self.keys.contains_key(circuit_id)
    }

    /// Verifies `zkp` against the key registered for `circuit_id`.
    ///
    /// # Errors
    /// - `UnknownCircuit` if no key is registered
    /// - `SignalOutOfField` if a signal is not below the BN254 scalar modulus
    /// - `Rejected` if the pairing check fails
    pub fn verify(&self, circuit_id: &str, zkp: &ZkProof) -> Result<(), ProofError> {
        let pvk = self
            .keys
            .get(circuit_id)
            .ok_or_else(|| ProofError::UnknownCircuit(circuit_id.to_string()))?;

        let expected = pvk.vk.gamma_abc_g1.len().saturating_sub(1);
        if zkp.pub_signals.len() != expected {
            return Err(ProofError::SignalCount {
                expected,
                got: zkp.pub_signals.len(),
            });
        }

        let inputs = zkp
            .pub_signals
            .iter()
            .map(|s| parse_signal(s))
            .collect::<Result<Vec<_>, _>>()?;
        let proof = parse_proof(&zkp.proof)?;

        match Groth16::<Bn254>::verify_with_processed_vk(pvk, &inputs, &proof) {
            Ok(true) => Ok(()),
            Ok(false) => Err(ProofError::Rejected),
            Err(e) => Err(ProofError::Malformed(e.to_string())),
        }
    }
}

/// Parses a decimal public signal, rejecting values outside the scalar field.
pub fn parse_signal(s: &str) -> Result<Fr, ProofError> {
    let value = BigUint::from_str(s).map_err(|_| ProofError::SignalOutOfField(s.to_string()))?;
    if value >= *FR_MODULUS {
        return Err(ProofError::SignalOutOfField(s.to_string()));
    }
    Ok(Fr::from(value))
}

fn parse_fq(s: &str) -> Result<Fq, ProofError> {
    let value = BigUint::from_str(s)
        .map_err(|_| ProofError::Malformed(format!("'{}' is not a decimal integer", s)))?;
    if value >= *FQ_MODULUS {
        return Err(ProofError::Malformed(format!("'{}' exceeds the base field", s)));
    }
    Ok(Fq::from(value))
}

fn parse_g1(coords: &[String]) -> Result<G1Affine, ProofError> {
    let [x, y, ..] = coords else {
        return Err(ProofError::Malformed("G1 point needs two coordinates".into()));
    };
    let point = G1Affine::new_unchecked(parse_fq(x)?, parse_fq(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::Malformed("G1 point is not on the curve".into()));
    }
    Ok(point)
}

fn parse_g2(coords: &[Vec<String>]) -> Result<G2Affine, ProofError> {
    let [x, y, ..] = coords else {
        return Err(ProofError::Malformed("G2 point needs two coordinates".into()));
    };
    let fq2 = |c: &[String]| -> Result<Fq2, ProofError> {
        match c {
            [c0, c1] => Ok(Fq2::new(parse_fq(c0)?, parse_fq(c1)?)),
            _ => Err(ProofError::Malformed("Fq2 element needs two limbs".into())),
        }
    };
    let point = G2Affine::new_unchecked(fq2(x)?, fq2(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err(ProofError::Malformed("G2 point is not on the curve".into()));
    }
    Ok(point)
}

fn parse_proof(proof: &ProofData) -> Result<Proof<Bn254>, ProofError> {
    if proof.protocol != "groth16" {
        return Err(ProofError::Malformed(format!(
            "unsupported protocol '{}'",
            proof.protocol
        )));
    }
    Ok(Proof {
        a: parse_g1(&proof.pi_a)?,
        b: parse_g2(&proof.pi_b)?,
        c: parse_g1(&proof.pi_c)?,
    })
}
