//! Canonical block preimage and SHA-256 digest.
//!
//! Field order is fixed: index, timestamp, payload, previous hash, difficulty,
//! nonce. Integers are little-endian, the payload is compact JSON with sorted
//! object keys and carries a u64 length prefix. The nonce comes last, so a
//! miner can hash the prefix once and only feed the nonce per attempt.

use crate::Hash;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Digest of a block's six content fields.
pub fn digest(
    index: u64,
    timestamp: u64,
    payload: &Value,
    previous_hash: &Hash,
    difficulty: u32,
    nonce: u64,
) -> Hash {
    PartialDigest::new(index, timestamp, payload, previous_hash, difficulty).finish(nonce)
}

/// Raw bytes fed to the hasher for the given fields.
pub fn preimage(
    index: u64,
    timestamp: u64,
    payload: &Value,
    previous_hash: &Hash,
    difficulty: u32,
    nonce: u64,
) -> Vec<u8> {
    let payload = payload.to_string();
    let mut bytes = Vec::with_capacity(8 + 8 + 8 + payload.len() + 32 + 4 + 8);
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&timestamp.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(payload.as_bytes());
    bytes.extend_from_slice(previous_hash);
    bytes.extend_from_slice(&difficulty.to_le_bytes());
    bytes.extend_from_slice(&nonce.to_le_bytes());
    bytes
}

/// Hasher state with every field but the nonce already absorbed.
#[derive(Clone)]
pub struct PartialDigest {
    state: Sha256,
}

impl PartialDigest {
    pub fn new(
        index: u64,
        timestamp: u64,
        payload: &Value,
        previous_hash: &Hash,
        difficulty: u32,
    ) -> Self {
        let payload = payload.to_string();
        let mut state = Sha256::new();
        state.update(index.to_le_bytes());
        state.update(timestamp.to_le_bytes());
        state.update((payload.len() as u64).to_le_bytes());
        state.update(payload.as_bytes());
        state.update(previous_hash);
        state.update(difficulty.to_le_bytes());
        Self { state }
    }

    pub fn finish(&self, nonce: u64) -> Hash {
        let mut hasher = self.state.clone();
        hasher.update(nonce.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }
}
