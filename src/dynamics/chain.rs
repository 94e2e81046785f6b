//! Tamper-evident declaration chain.
//!
//! Declarations are append-only identity-update records, each committing
//! to its predecessor by SHA-256 of the predecessor's canonical JSON. The
//! chain gives identity updates a total order independent of wall-clock
//! drift and makes any retroactive edit visible at the next link.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::energy::potential_curvature;
use super::{DynamicsParams, SelfState, MAX_WEIGHT, MIN_WEIGHT};

/// previous_hash of the genesis entry: 64 zero hex digits.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// A single identity-update record.
///
/// Field order matters: canonical JSON is this struct serialized as-is,
/// so fields are declared in alphabetical key order
/// (content, index, previousHash, timestamp, value).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
    pub content: String,
    pub index: usize,
    pub previous_hash: String,
    pub timestamp: i64,
    pub value: f64,
}

impl Declaration {
    pub fn new(index: usize, value: f64, content: String, previous_hash: String) -> Self {
        Declaration {
            content,
            index,
            previous_hash,
            timestamp: Utc::now().timestamp(),
            value: value.clamp(0.0, 1.0),
        }
    }

    /// Canonical serialization: sorted keys, UTF-8, no whitespace.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// SHA-256 of the canonical JSON, hex-encoded lowercase.
    pub fn hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Apply a declaration to the live state: both the behavioral weight and
/// the self-model move to the declared value, so the coherence gap on
/// that dimension collapses to zero and ‖w − m‖ never grows.
pub fn apply_declaration(state: &mut SelfState, decl: &Declaration) {
    if decl.index >= state.len() {
        warn!(
            "[Chain] declaration index {} out of range (N={}), ignored",
            decl.index,
            state.len()
        );
        return;
    }
    let v = crate::utils::numerics::safe_clamp(decl.value, MIN_WEIGHT, MAX_WEIGHT, 0.5);
    state.weights[decl.index] = v;
    state.self_model[decl.index] = v;
}

/// Result of walking the chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Chain state proof, generated on demand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContinuityProof {
    pub genesis_hash: String,
    pub current_hash: String,
    pub chain_length: usize,
    pub merkle_root: String,
    /// 1.0 for an intact chain, decaying with each broken link.
    pub continuity_score: f64,
    /// Mean |V''| over dimensions — how firmly weights sit in their wells.
    pub stability_score: f64,
    /// exp(−‖w − m‖), 1.0 when fully coherent.
    pub coherence_score: f64,
}

/// Append-only declaration sequence.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeclarationChain {
    entries: Vec<Declaration>,
}

impl DeclarationChain {
    pub fn new() -> Self {
        DeclarationChain { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<Declaration>) -> Self {
        DeclarationChain { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Declaration] {
        &self.entries
    }

    /// Hash of the newest entry, or the genesis constant for an empty chain.
    pub fn tip_hash(&self) -> String {
        self.entries
            .last()
            .map(|d| d.hash())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    /// Create a declaration linked to the current tip.
    pub fn create_declaration(&self, index: usize, value: f64, content: String) -> Declaration {
        Declaration::new(index, value, content, self.tip_hash())
    }

    pub fn append(&mut self, decl: Declaration) {
        self.entries.push(decl);
    }

    /// Walk the sequence checking each previous_hash against the prior
    /// entry's canonical hash. Error indices name the link whose
    /// previous_hash no longer matches.
    pub fn verify(&self) -> ChainVerification {
        let mut errors = Vec::new();
        for (i, decl) in self.entries.iter().enumerate() {
            let expected = if i == 0 {
                GENESIS_HASH.to_string()
            } else {
                self.entries[i - 1].hash()
            };
            if decl.previous_hash != expected {
                errors.push(format!(
                    "link {} previousHash mismatch: expected {}, found {}",
                    i, expected, decl.previous_hash
                ));
            }
        }
        ChainVerification {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Merkle root over per-entry canonical hashes, odd levels padded by
    /// duplicating the last node.
    pub fn merkle_root(&self) -> String {
        if self.entries.is_empty() {
            return GENESIS_HASH.to_string();
        }
        let mut level: Vec<String> = self.entries.iter().map(|d| d.hash()).collect();
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(level.last().cloned().unwrap_or_default());
            }
            level = level
                .chunks(2)
                .map(|pair| {
                    let mut hasher = Sha256::new();
                    hasher.update(pair[0].as_bytes());
                    hasher.update(pair[1].as_bytes());
                    hex::encode(hasher.finalize())
                })
                .collect();
        }
        level.pop().unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    /// Continuity proof over the chain plus the live state.
    pub fn continuity_proof(
        &self,
        state: &SelfState,
        params: &DynamicsParams,
    ) -> ContinuityProof {
        let verification = self.verify();
        let broken = verification.errors.len() as f64;
        let stability = if state.is_empty() {
            0.0
        } else {
            state
                .weights
                .iter()
                .map(|&w| potential_curvature(w, params.barrier).abs())
                .sum::<f64>()
                / state.len() as f64
        };
        ContinuityProof {
            genesis_hash: self
                .entries
                .first()
                .map(|d| d.hash())
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            current_hash: self.tip_hash(),
            chain_length: self.entries.len(),
            merkle_root: self.merkle_root(),
            continuity_score: 1.0 / (1.0 + broken),
            stability_score: stability,
            coherence_score: (-state.coherence_gap()).exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(n: usize) -> DeclarationChain {
        let mut chain = DeclarationChain::new();
        for i in 0..n {
            let decl = chain.create_declaration(i % 4, 0.5 + 0.05 * i as f64, format!("decl {}", i));
            chain.append(decl);
        }
        chain
    }

    #[test]
    fn canonical_json_has_sorted_keys_and_no_whitespace() {
        let d = Declaration {
            content: "assert".into(),
            index: 2,
            previous_hash: GENESIS_HASH.into(),
            timestamp: 1700000000,
            value: 0.75,
        };
        let json = d.canonical_json();
        assert_eq!(
            json,
            format!(
                "{{\"content\":\"assert\",\"index\":2,\"previousHash\":\"{}\",\"timestamp\":1700000000,\"value\":0.75}}",
                GENESIS_HASH
            )
        );
    }

    #[test]
    fn intact_chain_verifies() {
        let chain = chain_of(5);
        let v = chain.verify();
        assert!(v.valid, "{:?}", v.errors);
    }

    #[test]
    fn tampered_value_breaks_the_next_link() {
        let mut chain = chain_of(5);
        chain.entries[1].value = 0.99;
        let v = chain.verify();
        assert!(!v.valid);
        assert_eq!(v.errors.len(), 1);
        assert!(v.errors[0].starts_with("link 2"), "{}", v.errors[0]);
    }

    #[test]
    fn tamper_on_any_field_is_detected() {
        for field in 0..4 {
            let mut chain = chain_of(3);
            match field {
                0 => chain.entries[0].content.push('!'),
                1 => chain.entries[0].index = 3,
                2 => chain.entries[0].timestamp += 1,
                _ => chain.entries[0].value = 0.123,
            }
            assert!(!chain.verify().valid, "field {} tamper went unnoticed", field);
        }
    }

    #[test]
    fn apply_never_worsens_coherence() {
        let mut state = SelfState::new(vec![0.3, 0.8], vec![0.5, 0.6]).unwrap();
        let before = state.coherence_gap();
        let decl = Declaration::new(0, 0.9, "shift".into(), GENESIS_HASH.into());
        apply_declaration(&mut state, &decl);
        assert!(state.coherence_gap() <= before);
        assert_eq!(state.weights[0], 0.9);
        assert_eq!(state.self_model[0], 0.9);
    }

    #[test]
    fn out_of_range_index_is_ignored() {
        let mut state = SelfState::uniform(2, 0.5);
        let decl = Declaration::new(7, 0.9, "bad".into(), GENESIS_HASH.into());
        apply_declaration(&mut state, &decl);
        assert_eq!(state.weights, vec![0.5, 0.5]);
    }

    #[test]
    fn merkle_root_changes_with_content() {
        let a = chain_of(4);
        let mut b = chain_of(4);
        b.entries[3].content = "edited".into();
        assert_ne!(a.merkle_root(), b.merkle_root());
    }

    #[test]
    fn proof_reflects_chain_and_state() {
        let chain = chain_of(5);
        let state = SelfState::uniform(4, 0.5);
        let proof = chain.continuity_proof(&state, &DynamicsParams::balanced(4));
        assert_eq!(proof.chain_length, 5);
        assert_eq!(proof.continuity_score, 1.0);
        assert_eq!(proof.coherence_score, 1.0);
        assert_eq!(proof.current_hash, chain.entries()[4].hash());
    }
}
