//! Hard-fork heights and chain-wide consensus constants.

/// Height of the GPU-resistance hard fork: the proof-of-work switches to
/// more memory-intensive argon parameters and the transaction fee is capped.
pub const RESISTANCE: u64 = 10_800;

/// Difficulty forced at the first block after [`RESISTANCE`] to carry the
/// chain over the parameter switch.
pub const RESISTANCE_DIFFICULTY: u64 = 5_555_555_555;

/// Last height at which ids produced by the broken Base58 encoder (missing
/// their leading zero bytes) are still accepted.
pub const BASE58_REPAIR: u64 = 16_900;

/// Unix time of the first valid transaction. Anything older is rejected.
pub const GENESIS_DATE: i64 = 1_511_725_068;

/// Transactions dated before this and seen above [`BASE58_REPAIR`] are
/// replays from the broken-encoder window.
pub const LEGACY_DATE_CUTOFF: i64 = 1_519_327_780;

/// Block reward drops 1% per completed epoch of this many blocks.
pub const REWARD_EPOCH: u64 = 10_800;

/// Difficulty clamp. The maximum keeps the value inside a signed 64-bit
/// column with room to spare.
pub const MIN_DIFFICULTY: u64 = 1_000;
pub const MAX_DIFFICULTY: u64 = 9_223_372_036_854_775_800;

/// Mempool entries older than this many blocks are evicted.
pub const MEMPOOL_TTL_BLOCKS: u64 = 1_000;
