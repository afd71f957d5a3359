//! Proof of work predicate
//!
//! Difficulty d is met when the hex form of the block hash starts with at least
//! d `'0'` characters, i.e. the first d nibbles of the digest are zero.

use crate::block::calculate_block_hash;
use crate::constants::MAX_DIFFICULTY;
use crate::types::*;

/// Number of leading zero hex digits in `hash`
pub fn leading_zero_digits(hash: &Hash) -> usize {
    let mut zeros = 0;
    for byte in hash.as_bytes() {
        if *byte == 0 {
            zeros += 2;
            continue;
        }
        if byte >> 4 == 0 {
            zeros += 1;
        }
        break;
    }
    zeros
}

/// MeetsDifficulty: ℍ × ℕ → {true, false}
pub fn meets_difficulty(hash: &Hash, difficulty: usize) -> bool {
    difficulty <= MAX_DIFFICULTY && leading_zero_digits(hash) >= difficulty
}

/// CheckProofOfWork: ℬ → {true, false}
///
/// The block hash covers the header and the full transaction list and must meet
/// the difficulty the header declares.
pub fn check_proof_of_work(block: &Block) -> bool {
    meets_difficulty(&calculate_block_hash(block), block.header.difficulty)
}
