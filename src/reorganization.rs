//! Longest-valid-chain selection
//!
//! An alternative chain replaces the local one only when it is strictly longer
//! and every block checks out. The UTXO index is never taken from the peer:
//! it is rebuilt by replaying the alternative chain from genesis.

use crate::block::{calculate_block_hash, check_block_header, check_genesis_block, connect_block, Blockchain};
use crate::error::{ConsensusError, Result};
use crate::types::*;
use tracing::{debug, info};

/// CheckChain: ℬ* × ℕ → {valid, invalid}
///
/// 1. The first block must be a well-formed genesis block
/// 2. Every later block must meet its own proof of work and the difficulty
///    floor, sit one height above its predecessor and link to its hash
///
/// Transactions are not executed here; see [`reorganize_chain`].
pub fn check_chain(blocks: &[Block], min_difficulty: usize) -> ValidationResult {
    let Some(genesis) = blocks.first() else {
        return ValidationResult::Invalid("Empty chain".to_string());
    };

    if let ValidationResult::Invalid(reason) = check_genesis_block(genesis) {
        return ValidationResult::Invalid(format!("Genesis: {}", reason));
    }

    for (i, pair) in blocks.windows(2).enumerate() {
        if let ValidationResult::Invalid(reason) = check_block_header(&pair[1], &pair[0], min_difficulty) {
            return ValidationResult::Invalid(format!("Block {}: {}", i + 1, reason));
        }
    }

    ValidationResult::Valid
}

/// IsValidChain: ℬ* → {true, false}
pub fn is_valid_chain(blocks: &[Block], min_difficulty: usize) -> bool {
    check_chain(blocks, min_difficulty).is_valid()
}

/// Replace only with a strictly longer chain
pub fn should_reorganize(new_chain: &[Block], current_chain: &[Block]) -> bool {
    new_chain.len() > current_chain.len()
}

/// Reorganization: ℬ* × 𝒞 → 𝒞
///
/// For new chain [b0, b1, ..., bn] and current chain [c0, c1, ..., cm]:
/// 1. Require n > m and b0 = c0 (same genesis)
/// 2. Check headers of the whole new chain
/// 3. Replay every block from an empty index through ConnectBlock, so each
///    transaction is validated against the state its predecessors produced
/// 4. Report the common ancestor and the blocks that left the active chain
pub fn reorganize_chain(
    new_chain: &[Block],
    current: &Blockchain,
    ctx: &ScriptContext,
) -> Result<ReorganizationResult> {
    if !should_reorganize(new_chain, current.blocks()) {
        return Err(ConsensusError::ConsensusRuleViolation(format!(
            "Alternative chain of {} blocks is not longer than local chain of {}",
            new_chain.len(),
            current.len()
        )));
    }

    let genesis = &new_chain[0];
    if calculate_block_hash(genesis) != calculate_block_hash(current.genesis()) {
        return Err(ConsensusError::ConsensusRuleViolation(
            "Alternative chain has a different genesis block".to_string(),
        ));
    }

    let min_difficulty = current.min_difficulty();
    if let ValidationResult::Invalid(reason) = check_chain(new_chain, min_difficulty) {
        return Err(ConsensusError::BlockValidation(reason));
    }

    let replayed = Blockchain::new(genesis.clone(), min_difficulty)?;
    let mut utxo_set = replayed.utxo_set().clone();
    for (i, pair) in new_chain.windows(2).enumerate() {
        if let ValidationResult::Invalid(reason) =
            connect_block(&pair[1], &pair[0], &mut utxo_set, min_difficulty, ctx)?
        {
            return Err(ConsensusError::BlockValidation(format!(
                "Replay failed at block {}: {}",
                i + 1,
                reason
            )));
        }
    }

    let common = find_common_ancestor(new_chain, current.blocks());
    let disconnected_blocks = current.blocks()[common..].to_vec();
    let connected_blocks = new_chain.len() - common;
    debug!(
        common_ancestor = common - 1,
        disconnected = disconnected_blocks.len(),
        connected = connected_blocks,
        "replayed alternative chain"
    );

    let chain = Blockchain::from_replayed(new_chain.to_vec(), utxo_set, min_difficulty);
    info!(height = chain.height(), tip = %chain.tip().hash(), "chain replaced");

    Ok(ReorganizationResult {
        common_ancestor: (common - 1) as Height,
        reorganization_depth: disconnected_blocks.len(),
        disconnected_blocks,
        connected_blocks,
        chain,
    })
}

/// Number of leading blocks both chains share
fn find_common_ancestor(new_chain: &[Block], current_chain: &[Block]) -> usize {
    new_chain
        .iter()
        .zip(current_chain)
        .take_while(|(a, b)| calculate_block_hash(a) == calculate_block_hash(b))
        .count()
}

/// Result of chain reorganization
#[derive(Debug, Clone)]
pub struct ReorganizationResult {
    /// The replacement chain with its recomputed UTXO index
    pub chain: Blockchain,
    /// Height of the last block both chains share
    pub common_ancestor: Height,
    pub disconnected_blocks: Vec<Block>,
    pub connected_blocks: usize,
    pub reorganization_depth: usize,
}
