//! Error types for the ledger.
//!
//! Nothing here is fatal: a rejected block leaves the ledger untouched and the
//! caller decides whether to log, retry on the next tick, or drop the block.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Why a block was refused admission, or why a stored block fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("invalid index: expected {expected}, got {actual}")]
    IndexMismatch { expected: u64, actual: u64 },

    #[error("previous hash does not match predecessor {expected}")]
    PreviousHashMismatch { expected: String },

    #[error("timestamp {timestamp} is too far behind predecessor timestamp {predecessor}")]
    StaleTimestamp { timestamp: u64, predecessor: u64 },

    #[error("timestamp {timestamp} is too far ahead of local clock {now}")]
    FutureTimestamp { timestamp: u64, now: u64 },

    #[error("stored hash {stored} does not match recomputed hash {computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("hash has {leading_zeros} leading zero bits, difficulty requires {difficulty}")]
    InsufficientWork { leading_zeros: u32, difficulty: u32 },

    #[error("unexpected difficulty: expected {expected}, got {actual}")]
    UnexpectedDifficulty { expected: u32, actual: u32 },
}

/// Nonce search stopped before a satisfying digest was found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiningError {
    #[error("mining cancelled after {nonce} nonces")]
    Cancelled { nonce: u64 },

    #[error("mining deadline exceeded after {nonce} nonces")]
    DeadlineExceeded { nonce: u64 },

    #[error("nonce space exhausted")]
    NonceSpaceExhausted,

    #[error("difficulty {difficulty} can never be met by a 256-bit digest")]
    DifficultyOutOfRange { difficulty: u32 },
}

/// Outcome of a failed `produce_next` / `admit` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("block rejected: {0}")]
    Rejected(#[from] Rejection),

    #[error(transparent)]
    Mining(#[from] MiningError),
}

/// First violation found while validating a whole chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainFault {
    #[error("genesis block does not match the configured genesis")]
    GenesisMismatch,

    #[error("block {index} is invalid: {reason}")]
    InvalidBlock { index: u64, reason: Rejection },
}

/// Invalid [`ChainConfig`](crate::config::ChainConfig) values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("difficulty adjustment interval must be positive")]
    ZeroAdjustmentInterval,

    #[error("cancel check interval must be positive")]
    ZeroCancelCheckInterval,

    #[error("max difficulty {max} exceeds the digest width of {limit} bits")]
    MaxDifficultyTooHigh { max: u32, limit: u32 },

    #[error("genesis difficulty {genesis} exceeds max difficulty {max}")]
    GenesisDifficultyTooHigh { genesis: u32, max: u32 },
}
