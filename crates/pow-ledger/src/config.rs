//! Tunables for the ledger, the difficulty controller and the miner.

use crate::constants::*;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Runtime configuration for a [`ChainLedger`](crate::chain::ChainLedger).
///
/// Every field has a default, so a partial JSON document is enough to
/// override a single value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Target time between two blocks, in milliseconds.
    pub block_generation_interval_ms: u64,

    /// Number of blocks between two retargets.
    pub difficulty_adjustment_interval: u64,

    /// Clock skew accepted when admitting an external block, in milliseconds.
    pub timestamp_tolerance_ms: u64,

    /// Difficulty stamped into the genesis block.
    pub genesis_difficulty: u32,

    /// Genesis timestamp. Fixed so every ledger starts from the same block.
    pub genesis_timestamp_ms: u64,

    /// Genesis payload.
    pub genesis_payload: serde_json::Value,

    /// Upper clamp applied when retargeting raises the difficulty.
    pub max_difficulty: u32,

    /// Nonces tried between two polls of the cancel flag and deadline.
    pub cancel_check_interval: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_generation_interval_ms: BLOCK_GENERATION_INTERVAL_MS,
            difficulty_adjustment_interval: DIFFICULTY_ADJUSTMENT_INTERVAL,
            timestamp_tolerance_ms: TIMESTAMP_TOLERANCE_MS,
            genesis_difficulty: GENESIS_DIFFICULTY,
            genesis_timestamp_ms: GENESIS_TIMESTAMP_MS,
            genesis_payload: serde_json::Value::String(GENESIS_PAYLOAD.to_string()),
            max_difficulty: MAX_DIFFICULTY,
            cancel_check_interval: CANCEL_CHECK_INTERVAL,
        }
    }
}

impl ChainConfig {
    /// Expected duration of one full adjustment window.
    pub fn expected_window_ms(&self) -> u64 {
        self.block_generation_interval_ms
            .saturating_mul(self.difficulty_adjustment_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty_adjustment_interval == 0 {
            return Err(ConfigError::ZeroAdjustmentInterval);
        }
        if self.cancel_check_interval == 0 {
            return Err(ConfigError::ZeroCancelCheckInterval);
        }
        if self.max_difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::MaxDifficultyTooHigh {
                max: self.max_difficulty,
                limit: MAX_DIFFICULTY,
            });
        }
        if self.genesis_difficulty > self.max_difficulty {
            return Err(ConfigError::GenesisDifficultyTooHigh {
                genesis: self.genesis_difficulty,
                max: self.max_difficulty,
            });
        }
        Ok(())
    }
}
