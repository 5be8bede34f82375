//! The in-memory ledger: a single writer appending mined blocks on top of a
//! fixed genesis block.

use crate::{
    config::ChainConfig,
    difficulty::DifficultyController,
    error::{ChainFault, ConfigError, LedgerError, Rejection, Result},
    mine::{CancelFlag, Miner},
    now_millis, Block,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Ordered, append-only sequence of blocks. Never empty.
#[derive(Clone, Debug, Serialize)]
pub struct ChainLedger {
    chain: Vec<Block>,
    #[serde(skip)]
    config: ChainConfig,
    #[serde(skip)]
    controller: DifficultyController,
    #[serde(skip)]
    miner: Miner,
}

impl Default for ChainLedger {
    fn default() -> Self {
        Self::from_valid_config(ChainConfig::default())
    }
}

impl ChainLedger {
    /// Ledger with the default configuration, holding only genesis.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ChainConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: ChainConfig) -> Self {
        Self {
            chain: vec![genesis_block(&config)],
            controller: DifficultyController::new(&config),
            miner: Miner::new(config.cancel_check_interval),
            config,
        }
    }

    /// Replace the miner, e.g. to share a cancel flag or switch to the
    /// parallel search.
    pub fn with_miner(mut self, miner: Miner) -> Self {
        self.miner = miner;
        self
    }

    pub fn miner_mut(&mut self) -> &mut Miner {
        &mut self.miner
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.miner.cancel_flag().clone()
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn latest(&self) -> &Block {
        // genesis is never removed, so len >= 1
        &self.chain[self.chain.len() - 1]
    }

    pub fn blocks(&self) -> &[Block] {
        &self.chain
    }

    pub fn get(&self, index: u64) -> Option<&Block> {
        usize::try_from(index).ok().and_then(|i| self.chain.get(i))
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Always false; kept for the `len` convention.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    pub fn required_difficulty(&self) -> u32 {
        self.controller.required_difficulty(&self.chain)
    }

    /// Mine `payload` on top of the latest block, stamped with the local clock.
    pub fn produce_next(&mut self, payload: Value) -> Result<&Block> {
        self.produce_next_at(payload, now_millis())
    }

    /// Mine `payload` on top of the latest block with an explicit timestamp.
    /// On any error the chain is left unchanged.
    pub fn produce_next_at(&mut self, payload: Value, timestamp: u64) -> Result<&Block> {
        let difficulty = self.required_difficulty();
        let candidate = self
            .miner
            .search(payload, timestamp, difficulty, self.latest())
            .inspect_err(|e| warn!("No block added: {e}"))?;

        Self::validate_candidate(&candidate, self.latest())
            .inspect_err(|e| warn!("No block added: {e}"))?;
        Ok(self.push(candidate))
    }

    /// Admit a block mined elsewhere, checked against the local clock.
    pub fn admit(&mut self, candidate: Block) -> Result<&Block> {
        self.admit_at(candidate, now_millis())
    }

    /// Admit a block mined elsewhere. Besides linkage the block must sit in
    /// the timestamp window, carry the required difficulty and a valid
    /// proof of work.
    pub fn admit_at(&mut self, candidate: Block, now: u64) -> Result<&Block> {
        if let Err(reason) = self.check_external(&candidate, now) {
            warn!("Not a valid block: {reason}");
            return Err(LedgerError::Rejected(reason));
        }
        Ok(self.push(candidate))
    }

    fn check_external(&self, candidate: &Block, now: u64) -> std::result::Result<(), Rejection> {
        let predecessor = self.latest();
        Self::validate_candidate(candidate, predecessor)?;
        self.validate_timestamp(candidate, predecessor, now)?;

        let expected = self.required_difficulty();
        if candidate.difficulty != expected {
            return Err(Rejection::UnexpectedDifficulty {
                expected,
                actual: candidate.difficulty,
            });
        }
        candidate.verify()
    }

    /// Structural link between two consecutive blocks.
    pub fn validate_candidate(
        candidate: &Block,
        predecessor: &Block,
    ) -> std::result::Result<(), Rejection> {
        let expected = predecessor.index + 1;
        if candidate.index != expected {
            return Err(Rejection::IndexMismatch {
                expected,
                actual: candidate.index,
            });
        }
        if candidate.previous_hash != predecessor.hash {
            return Err(Rejection::PreviousHashMismatch {
                expected: predecessor.hash_hex(),
            });
        }
        Ok(())
    }

    /// Candidate must not be older than its predecessor, nor newer than `now`,
    /// by more than the configured tolerance.
    pub fn validate_timestamp(
        &self,
        candidate: &Block,
        predecessor: &Block,
        now: u64,
    ) -> std::result::Result<(), Rejection> {
        let tolerance = self.config.timestamp_tolerance_ms;
        if predecessor.timestamp >= candidate.timestamp.saturating_add(tolerance) {
            return Err(Rejection::StaleTimestamp {
                timestamp: candidate.timestamp,
                predecessor: predecessor.timestamp,
            });
        }
        if candidate.timestamp >= now.saturating_add(tolerance) {
            return Err(Rejection::FutureTimestamp {
                timestamp: candidate.timestamp,
                now,
            });
        }
        Ok(())
    }

    pub fn is_valid_chain(&self) -> bool {
        match self.verify_chain() {
            Ok(()) => true,
            Err(fault) => {
                warn!("Chain is invalid: {fault}");
                false
            }
        }
    }

    /// Full scan: genesis must equal the configured genesis, every later block
    /// must link to its predecessor, hash to its stored digest, meet its
    /// difficulty, and carry the difficulty the controller required at its
    /// height.
    pub fn verify_chain(&self) -> std::result::Result<(), ChainFault> {
        match self.chain.first() {
            Some(genesis) if *genesis == genesis_block(&self.config) => {}
            _ => return Err(ChainFault::GenesisMismatch),
        }

        for i in 1..self.chain.len() {
            let block = &self.chain[i];
            let fault = |reason| ChainFault::InvalidBlock {
                index: block.index,
                reason,
            };

            Self::validate_candidate(block, &self.chain[i - 1]).map_err(fault)?;
            block.verify().map_err(fault)?;

            let expected = self.controller.required_difficulty(&self.chain[..i]);
            if block.difficulty != expected {
                return Err(fault(Rejection::UnexpectedDifficulty {
                    expected,
                    actual: block.difficulty,
                }));
            }
        }
        Ok(())
    }

    fn push(&mut self, block: Block) -> &Block {
        info!(
            height = block.index,
            difficulty = block.difficulty,
            hash = %block.hash_hex(),
            "block appended"
        );
        self.chain.push(block);
        self.latest()
    }
}

/// Fixed first block. Identical for every ledger built from the same config;
/// it has no predecessor and is not held to its own difficulty.
pub fn genesis_block(config: &ChainConfig) -> Block {
    Block::new(
        0,
        config.genesis_timestamp_ms,
        config.genesis_payload.clone(),
        [0u8; 32],
        config.genesis_difficulty,
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T0: u64 = 1_600_000_000_000;

    fn easy_ledger() -> ChainLedger {
        ChainLedger::with_config(ChainConfig {
            genesis_difficulty: 0,
            ..ChainConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn genesis_block_example() {
        let ledger = ChainLedger::new();
        let genesis = ledger.latest();
        assert_eq!(ledger.len(), 1);
        assert!(genesis.is_genesis());
        assert_eq!(genesis.previous_hash(), &[0u8; 32]);
        assert_eq!(genesis.payload(), &json!("Genesis Block"));
        assert_eq!(genesis.difficulty(), 3);
        assert_eq!(genesis.nonce(), 0);
        assert_eq!(
            genesis.hash_hex(),
            "9e386a15df4f6d9bf5f5b00b0b9194acd77aeabc3b36f5f66d86b9330d5437f7"
        );
        assert!(ledger.is_valid_chain());
    }

    #[test]
    fn genesis_is_reproducible() {
        assert_eq!(ChainLedger::new().blocks(), ChainLedger::new().blocks());
    }

    #[test]
    fn produce_next_links_to_latest() {
        let mut ledger = easy_ledger();
        let block = ledger.produce_next_at(json!({"a": 1}), T0 + 1_000).unwrap().clone();
        assert_eq!(ledger.len(), 2);
        assert_eq!(block.index(), 1);
        assert_eq!(block.previous_hash(), ledger.blocks()[0].hash());
        assert_eq!(ledger.get(1), Some(&block));
        assert!(ledger.get(2).is_none());
        assert!(ledger.is_valid_chain());
    }

    #[test]
    fn produce_next_uses_required_difficulty() {
        let mut ledger = ChainLedger::with_config(ChainConfig {
            genesis_difficulty: 5,
            ..ChainConfig::default()
        })
        .unwrap();
        let block = ledger.produce_next(json!("hello")).unwrap();
        assert_eq!(block.difficulty(), 5);
        assert!(block.matches_difficulty(5));
    }

    #[test]
    fn cancelled_produce_leaves_chain_unchanged() {
        let mut ledger = ChainLedger::with_config(ChainConfig {
            genesis_difficulty: 250,
            cancel_check_interval: 16,
            ..ChainConfig::default()
        })
        .unwrap();
        ledger.cancel_flag().trigger();
        let err = ledger.produce_next(json!(1)).unwrap_err();
        assert!(matches!(err, LedgerError::Mining(crate::MiningError::Cancelled { .. })));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn validate_candidate_rejects_bad_index() {
        let ledger = easy_ledger();
        let genesis = ledger.latest();
        let bad = Block::new(2, T0, json!(1), *genesis.hash(), 0, 0);
        assert_eq!(
            ChainLedger::validate_candidate(&bad, genesis),
            Err(Rejection::IndexMismatch {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn validate_candidate_rejects_bad_link() {
        let ledger = easy_ledger();
        let genesis = ledger.latest();
        let bad = Block::new(1, T0, json!(1), [9u8; 32], 0, 0);
        assert!(matches!(
            ChainLedger::validate_candidate(&bad, genesis),
            Err(Rejection::PreviousHashMismatch { .. })
        ));
    }

    #[test]
    fn timestamp_window() {
        let ledger = easy_ledger();
        let genesis = ledger.latest();
        let tolerance = ledger.config().timestamp_tolerance_ms;
        let at = |ts| Block::new(1, ts, json!(1), *genesis.hash(), 0, 0);

        let now = T0 + 100_000;
        assert!(ledger.validate_timestamp(&at(T0), genesis, now).is_ok());
        assert!(ledger
            .validate_timestamp(&at(T0 - tolerance + 1), genesis, now)
            .is_ok());
        assert!(matches!(
            ledger.validate_timestamp(&at(T0 - tolerance), genesis, now),
            Err(Rejection::StaleTimestamp { .. })
        ));
        assert!(ledger
            .validate_timestamp(&at(now + tolerance - 1), genesis, now)
            .is_ok());
        assert!(matches!(
            ledger.validate_timestamp(&at(now + tolerance), genesis, now),
            Err(Rejection::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn tampered_payload_invalidates_chain() {
        let mut ledger = easy_ledger();
        ledger.produce_next_at(json!({"a": 1}), T0 + 1_000).unwrap();
        assert!(ledger.is_valid_chain());

        ledger.chain[1].payload = json!({"a": 2});
        assert!(!ledger.is_valid_chain());
        assert!(matches!(
            ledger.verify_chain(),
            Err(ChainFault::InvalidBlock {
                index: 1,
                reason: Rejection::HashMismatch { .. }
            })
        ));
    }

    #[test]
    fn tampered_link_fails_structural_check() {
        let mut ledger = easy_ledger();
        ledger.produce_next_at(json!({"a": 1}), T0 + 1_000).unwrap();
        ledger.chain[1].previous_hash = [1u8; 32];
        assert!(matches!(
            ledger.verify_chain(),
            Err(ChainFault::InvalidBlock {
                index: 1,
                reason: Rejection::PreviousHashMismatch { .. }
            })
        ));

        let mut ledger = easy_ledger();
        ledger.produce_next_at(json!({"a": 1}), T0 + 1_000).unwrap();
        ledger.chain[1].index = 5;
        assert!(matches!(
            ledger.verify_chain(),
            Err(ChainFault::InvalidBlock {
                reason: Rejection::IndexMismatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn tampered_genesis_is_detected() {
        let mut ledger = easy_ledger();
        ledger.chain[0].payload = json!("Other Genesis");
        assert_eq!(ledger.verify_chain(), Err(ChainFault::GenesisMismatch));
    }

    #[test]
    fn renders_like_the_chain_object() {
        let mut ledger = easy_ledger();
        ledger.produce_next_at(json!("hello"), T0 + 1_000).unwrap();
        let json = serde_json::to_value(&ledger).unwrap();
        let blocks = json["chain"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["payload"], json!("hello"));
        assert_eq!(blocks[1]["previous_hash"], blocks[0]["hash"]);
        assert!(json.get("config").is_none());
    }

    #[test]
    fn rejects_invalid_config() {
        let err = ChainLedger::with_config(ChainConfig {
            difficulty_adjustment_interval: 0,
            ..ChainConfig::default()
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::ZeroAdjustmentInterval);
    }
}
