pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Highest difficulty a 256-bit digest can satisfy.
pub const MAX_DIFFICULTY: u32 = (HASH_SIZE * BYTE) as u32;

pub const BLOCK_GENERATION_INTERVAL_MS: u64 = 10 * 100;
pub const DIFFICULTY_ADJUSTMENT_INTERVAL: u64 = 10;
pub const TIMESTAMP_TOLERANCE_MS: u64 = 60 * 100;

pub const GENESIS_DIFFICULTY: u32 = 3;
pub const GENESIS_TIMESTAMP_MS: u64 = 1_600_000_000_000;
pub const GENESIS_PAYLOAD: &str = "Genesis Block";

pub const CANCEL_CHECK_INTERVAL: u64 = 4_096;
