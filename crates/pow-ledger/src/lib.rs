pub mod chain;
pub mod codec;
pub mod config;
pub mod constants;
pub mod difficulty;
pub mod error;
pub mod mine;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

pub use chain::ChainLedger;
pub use config::ChainConfig;
pub use difficulty::{DifficultyController, Retarget};
pub use error::{ChainFault, ConfigError, LedgerError, MiningError, Rejection};
pub use mine::{CancelFlag, Miner};

pub type Hash = [u8; 32];

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
/// Saturates at `u64::MAX`.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| millis_u64(d.as_millis()))
        .unwrap_or_default()
}

fn millis_u64(millis: u128) -> u64 {
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// A sealed ledger entry. Fields are read-only once the block is built; the
/// stored `hash` is only trusted after [`Block::verify`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub(crate) index: u64,
    pub(crate) timestamp: u64,
    pub(crate) payload: Value,
    #[serde(with = "hex_hash")]
    pub(crate) previous_hash: Hash,
    pub(crate) difficulty: u32,
    pub(crate) nonce: u64,
    #[serde(with = "hex_hash")]
    pub(crate) hash: Hash,
}

impl Block {
    /// Build a block and compute its digest.
    pub fn new(
        index: u64,
        timestamp: u64,
        payload: Value,
        previous_hash: Hash,
        difficulty: u32,
        nonce: u64,
    ) -> Self {
        let hash = codec::digest(index, timestamp, &payload, &previous_hash, difficulty, nonce);
        Self::with_hash(index, timestamp, payload, previous_hash, difficulty, nonce, hash)
    }

    /// Build a block around an already computed digest.
    pub(crate) fn with_hash(
        index: u64,
        timestamp: u64,
        payload: Value,
        previous_hash: Hash,
        difficulty: u32,
        nonce: u64,
        hash: Hash,
    ) -> Self {
        Self {
            index,
            timestamp,
            payload,
            previous_hash,
            difficulty,
            nonce,
            hash,
        }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn previous_hash(&self) -> &Hash {
        &self.previous_hash
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &Hash {
        &self.hash
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash)
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// True when the stored digest has at least `difficulty` leading zero bits.
    pub fn matches_difficulty(&self, difficulty: u32) -> bool {
        pow::hash_matches_difficulty(&self.hash, difficulty)
    }

    pub fn recompute_hash(&self) -> Hash {
        codec::digest(
            self.index,
            self.timestamp,
            &self.payload,
            &self.previous_hash,
            self.difficulty,
            self.nonce,
        )
    }

    pub fn has_valid_hash(&self) -> bool {
        self.recompute_hash() == self.hash
    }

    /// Check the block on its own: the stored digest must match a fresh
    /// computation and satisfy the block's own difficulty.
    pub fn verify(&self) -> Result<(), Rejection> {
        let computed = self.recompute_hash();
        if computed != self.hash {
            return Err(Rejection::HashMismatch {
                stored: hex::encode(self.hash),
                computed: hex::encode(computed),
            });
        }
        let leading_zeros = pow::count_leading_zero_bits(&self.hash);
        if leading_zeros < self.difficulty {
            return Err(Rejection::InsufficientWork {
                leading_zeros,
                difficulty: self.difficulty,
            });
        }
        Ok(())
    }
}

pub mod pow {
    use super::Hash;

    pub fn hash_matches_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_bits(hash) >= difficulty
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}

/// Hex (de)serialization for digests so rendered chains stay readable.
mod hex_hash {
    use super::Hash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &Hash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Hash, D::Error> {
        let s = String::deserialize(deserializer)?;
        let mut out = [0u8; 32];
        hex::decode_to_slice(&s, &mut out).map_err(D::Error::custom)?;
        Ok(out)
    }
}
