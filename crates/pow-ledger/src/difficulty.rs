//! Periodic difficulty retargeting.
//!
//! Every `difficulty_adjustment_interval` blocks the controller compares the
//! time the last window took against the expected time and moves the
//! difficulty one step, with a dead band between half and twice the target:
//!
//! - window took less than half the expected time: raise by 1
//! - window took more than twice the expected time: lower by 1 (floor 0)
//! - otherwise: keep the difficulty of the window's first block
//!
//! Between boundaries the latest block's difficulty carries over.

use crate::config::ChainConfig;
use crate::Block;
use tracing::debug;

/// Decision taken for the next block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retarget {
    /// Latest block is not on an adjustment boundary.
    NotDue { difficulty: u32 },
    /// Window timing fell inside the dead band.
    Held { difficulty: u32 },
    Raised { from: u32, to: u32 },
    Lowered { from: u32, to: u32 },
}

impl Retarget {
    pub fn difficulty(&self) -> u32 {
        match *self {
            Retarget::NotDue { difficulty } | Retarget::Held { difficulty } => difficulty,
            Retarget::Raised { to, .. } | Retarget::Lowered { to, .. } => to,
        }
    }

    /// True when the retarget branch ran, whatever it decided.
    pub fn evaluated(&self) -> bool {
        !matches!(self, Retarget::NotDue { .. })
    }
}

#[derive(Clone, Debug)]
pub struct DifficultyController {
    block_generation_interval_ms: u64,
    adjustment_interval: u64,
    max_difficulty: u32,
}

impl DifficultyController {
    pub fn new(config: &ChainConfig) -> Self {
        Self {
            block_generation_interval_ms: config.block_generation_interval_ms,
            adjustment_interval: config.difficulty_adjustment_interval.max(1),
            max_difficulty: config.max_difficulty,
        }
    }

    /// Difficulty the next block on top of `chain` must carry.
    pub fn required_difficulty(&self, chain: &[Block]) -> u32 {
        self.evaluate(chain).difficulty()
    }

    /// Decide the next difficulty. An empty slice yields difficulty 0.
    pub fn evaluate(&self, chain: &[Block]) -> Retarget {
        let Some(latest) = chain.last() else {
            return Retarget::NotDue { difficulty: 0 };
        };
        if latest.index == 0 || latest.index % self.adjustment_interval != 0 {
            return Retarget::NotDue {
                difficulty: latest.difficulty,
            };
        }

        let window = usize::try_from(self.adjustment_interval).unwrap_or(usize::MAX);
        let prev_adjustment = &chain[chain.len().saturating_sub(window)];
        let expected = self
            .block_generation_interval_ms
            .saturating_mul(self.adjustment_interval);
        let actual = latest.timestamp.saturating_sub(prev_adjustment.timestamp);
        let from = prev_adjustment.difficulty;

        let decision = if actual < expected / 2 {
            let to = from.saturating_add(1).min(self.max_difficulty);
            if to > from {
                Retarget::Raised { from, to }
            } else {
                Retarget::Held { difficulty: from }
            }
        } else if actual > expected.saturating_mul(2) {
            if from > 0 {
                Retarget::Lowered { from, to: from - 1 }
            } else {
                Retarget::Held { difficulty: 0 }
            }
        } else {
            Retarget::Held { difficulty: from }
        };

        debug!(
            height = latest.index,
            expected_ms = expected,
            actual_ms = actual,
            ?decision,
            "retarget evaluated"
        );
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn controller() -> DifficultyController {
        DifficultyController::new(&ChainConfig::default())
    }

    /// Blocks 0..=last, `spacing_ms` apart, all at `difficulty`. Hashes are
    /// irrelevant to the controller.
    fn chain(last: u64, spacing_ms: u64, difficulty: u32) -> Vec<Block> {
        (0..=last)
            .map(|i| Block::new(i, i * spacing_ms, json!(i), [0u8; 32], difficulty, 0))
            .collect()
    }

    #[test]
    fn empty_chain_is_zero() {
        assert_eq!(controller().required_difficulty(&[]), 0);
    }

    #[test]
    fn genesis_is_never_a_boundary() {
        let blocks = chain(0, 1, 3);
        assert_eq!(controller().evaluate(&blocks), Retarget::NotDue { difficulty: 3 });
    }

    #[test]
    fn off_boundary_carries_latest() {
        let mut blocks = chain(7, 1, 2);
        blocks.push(Block::new(8, 8, json!(8), [0u8; 32], 5, 0));
        assert_eq!(controller().evaluate(&blocks), Retarget::NotDue { difficulty: 5 });
    }

    #[test]
    fn fast_window_raises() {
        // 10 blocks in ~0.9s against an expected 10s
        let blocks = chain(10, 100, 4);
        let decision = controller().evaluate(&blocks);
        assert_eq!(decision, Retarget::Raised { from: 4, to: 5 });
        assert!(decision.evaluated());
    }

    #[test]
    fn slow_window_lowers() {
        let blocks = chain(10, 5_000, 4);
        assert_eq!(
            controller().evaluate(&blocks),
            Retarget::Lowered { from: 4, to: 3 }
        );
    }

    #[test]
    fn slow_window_floors_at_zero() {
        let blocks = chain(10, 5_000, 0);
        assert_eq!(controller().evaluate(&blocks), Retarget::Held { difficulty: 0 });
    }

    #[test]
    fn on_target_window_holds() {
        let blocks = chain(20, 1_000, 6);
        let decision = controller().evaluate(&blocks);
        assert_eq!(decision, Retarget::Held { difficulty: 6 });
        assert!(decision.evaluated());
    }

    #[test]
    fn raise_is_clamped_by_max() {
        let config = ChainConfig {
            max_difficulty: 4,
            ..ChainConfig::default()
        };
        let blocks = chain(10, 1, 4);
        assert_eq!(
            DifficultyController::new(&config).evaluate(&blocks),
            Retarget::Held { difficulty: 4 }
        );
    }

    #[test]
    fn window_starts_interval_blocks_back() {
        // chain[len - 10] is block 1; give it a distinct difficulty.
        let mut blocks = chain(10, 100, 2);
        blocks[1] = Block::new(1, 100, json!(1), [0u8; 32], 7, 0);
        assert_eq!(
            controller().evaluate(&blocks),
            Retarget::Raised { from: 7, to: 8 }
        );
    }
}
