//! Ledger consensus constants

/// Difficulty (leading zero hex digits) new blocks are mined at by default
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Largest difficulty expressible: a SHA-256 digest has 64 hex digits
pub const MAX_DIFFICULTY: usize = 64;

/// Difficulty recorded in the genesis header, which is never mined
pub const GENESIS_DIFFICULTY: usize = 0;

/// Merkle root committed by a block without transactions
pub const EMPTY_MERKLE_ROOT: [u8; 32] = [0u8; 32];

/// Maximum locking script source length in bytes
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Maximum stack size during script execution
pub const MAX_STACK_SIZE: usize = 1000;

/// Maximum number of inputs per transaction
pub const MAX_INPUTS: usize = 1000;

/// Maximum number of outputs per transaction
pub const MAX_OUTPUTS: usize = 1000;

/// Upper bound on a single OPCheckThirdParty lookup
pub const THIRD_PARTY_TIMEOUT_SECS: u64 = 5;

/// Script flag: allow OPCheckThirdParty to reach the network
pub const SCRIPT_ENABLE_THIRD_PARTY: u32 = 1 << 0;

/// Script flags with every optional capability disabled
pub const SCRIPT_FLAGS_NONE: u32 = 0;

/// Pending transactions held before submissions are refused
pub const MAX_MEMPOOL_TRANSACTIONS: usize = 10_000;
