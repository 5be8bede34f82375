use crate::{
    codec::PartialDigest, constants::MAX_DIFFICULTY, error::MiningError,
    pow::hash_matches_difficulty, Block, Hash,
};
use rayon::prelude::*;
use serde_json::Value;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;
use tracing::info;

/// Shared flag used to stop an in-flight nonce search from another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Once triggered the flag stays set until [`CancelFlag::reset`].
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Nonce search for a block whose digest meets a difficulty.
///
/// The search is interruptible: every `check_interval` nonces the miner polls
/// its [`CancelFlag`] and optional deadline.
#[derive(Clone, Debug)]
pub struct Miner {
    check_interval: u64,
    cancel: CancelFlag,
    deadline: Option<Instant>,
    parallel: bool,
}

impl Miner {
    pub fn new(check_interval: u64) -> Self {
        Self {
            check_interval: check_interval.max(1),
            cancel: CancelFlag::new(),
            deadline: None,
            parallel: false,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Route [`Miner::search`] through the rayon search.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    /// Mine with whichever strategy this miner is configured for.
    pub fn search(
        &self,
        payload: Value,
        timestamp: u64,
        difficulty: u32,
        predecessor: &Block,
    ) -> Result<Block, MiningError> {
        if self.parallel {
            self.mine_parallel(payload, timestamp, difficulty, predecessor)
        } else {
            self.mine(payload, timestamp, difficulty, predecessor)
        }
    }

    /// Try nonces 0, 1, 2, ... until the digest has at least `difficulty`
    /// leading zero bits. Difficulty 0 returns nonce 0 without polling.
    pub fn mine(
        &self,
        payload: Value,
        timestamp: u64,
        difficulty: u32,
        predecessor: &Block,
    ) -> Result<Block, MiningError> {
        let template = Template::new(payload, timestamp, difficulty, predecessor)?;
        self.scan(template, 0)
    }

    fn scan(&self, template: Template, start: u64) -> Result<Block, MiningError> {
        let mut nonce = start;
        loop {
            if nonce != start && nonce % self.check_interval == 0 {
                self.checkpoint(nonce)?;
            }
            let hash = template.digest.finish(nonce);
            if hash_matches_difficulty(&hash, template.difficulty) {
                return Ok(template.seal(nonce, hash));
            }
            nonce = nonce.checked_add(1).ok_or(MiningError::NonceSpaceExhausted)?;
        }
    }

    /// Same result as [`Miner::mine`] (the lowest satisfying nonce), searched
    /// in batches spread across the rayon pool.
    pub fn mine_parallel(
        &self,
        payload: Value,
        timestamp: u64,
        difficulty: u32,
        predecessor: &Block,
    ) -> Result<Block, MiningError> {
        let template = Template::new(payload, timestamp, difficulty, predecessor)?;
        self.scan_parallel(template, 0)
    }

    fn scan_parallel(&self, template: Template, start: u64) -> Result<Block, MiningError> {
        let batch = self
            .check_interval
            .saturating_mul(rayon::current_num_threads() as u64);
        let difficulty = template.difficulty;

        let mut first = start;
        loop {
            if first != start {
                self.checkpoint(first)?;
            }
            // inclusive so the last batch reaches u64::MAX
            let last = first.saturating_add(batch - 1);
            let found = (first..=last).into_par_iter().find_first(|nonce| {
                hash_matches_difficulty(&template.digest.finish(*nonce), difficulty)
            });

            if let Some(nonce) = found {
                let hash = template.digest.finish(nonce);
                return Ok(template.seal(nonce, hash));
            }
            if last == u64::MAX {
                return Err(MiningError::NonceSpaceExhausted);
            }
            first = last + 1;
        }
    }

    fn checkpoint(&self, nonce: u64) -> Result<(), MiningError> {
        if self.cancel.is_triggered() {
            return Err(MiningError::Cancelled { nonce });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(MiningError::DeadlineExceeded { nonce });
            }
        }
        Ok(())
    }
}

/// Everything but the nonce, fixed for the whole search.
struct Template {
    index: u64,
    timestamp: u64,
    payload: Value,
    previous_hash: Hash,
    difficulty: u32,
    digest: PartialDigest,
}

impl Template {
    fn new(
        payload: Value,
        timestamp: u64,
        difficulty: u32,
        predecessor: &Block,
    ) -> Result<Self, MiningError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(MiningError::DifficultyOutOfRange { difficulty });
        }
        let index = predecessor.index + 1;
        let previous_hash = predecessor.hash;
        let digest = PartialDigest::new(index, timestamp, &payload, &previous_hash, difficulty);
        Ok(Self {
            index,
            timestamp,
            payload,
            previous_hash,
            difficulty,
            digest,
        })
    }

    fn seal(self, nonce: u64, hash: Hash) -> Block {
        info!(
            "Mined block {} with nonce {} and hash {}",
            self.index,
            nonce,
            hex::encode(hash)
        );
        Block::with_hash(
            self.index,
            self.timestamp,
            self.payload,
            self.previous_hash,
            self.difficulty,
            nonce,
            hash,
        )
    }
}
