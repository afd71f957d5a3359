//! Proof-of-work search with cooperative cancellation

use crate::constants::MAX_DIFFICULTY;
use crate::pow::meets_difficulty;
use crate::serialization::{hash_header_with_body, serialize_block_body};
use crate::types::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Result of mining attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningResult {
    /// The returned block meets the difficulty
    Success,
    /// The cancel signal was observed before a solution was found
    Cancelled,
    /// The attempt budget or nonce space ran out
    Exhausted,
}

/// MineBlock: ℬ × ℕ → ℬ × {success, cancelled, exhausted}
///
/// Search nonces upward from the block's current nonce:
/// 1. Fix header.difficulty to `difficulty`
/// 2. Before each attempt, stop if `cancel` is set
/// 3. Hash header ‖ body, stop when the hash meets the difficulty
/// 4. Otherwise increment the nonce, up to `max_attempts` hashes
///
/// The body is encoded once; only the header changes between attempts. No
/// chain state is touched: the mined block still has to pass `add_block`.
pub fn mine_block(
    mut block: Block,
    difficulty: usize,
    cancel: &AtomicBool,
    max_attempts: u64,
) -> (Block, MiningResult) {
    block.header.difficulty = difficulty;
    if difficulty > MAX_DIFFICULTY {
        return (block, MiningResult::Exhausted);
    }

    let body = serialize_block_body(&block.transactions);

    for _ in 0..max_attempts {
        if cancel.load(Ordering::Acquire) {
            return (block, MiningResult::Cancelled);
        }

        let hash = hash_header_with_body(&block.header, &body);
        if meets_difficulty(&hash, difficulty) {
            return (block, MiningResult::Success);
        }

        block.header.nonce = match block.header.nonce.checked_add(1) {
            Some(nonce) => nonce,
            None => return (block, MiningResult::Exhausted),
        };
    }

    (block, MiningResult::Exhausted)
}

/// Mine: search without an attempt bound; `on_success` runs only on a solution
pub fn mine<F>(block: Block, difficulty: usize, cancel: &AtomicBool, on_success: F) -> MiningResult
where
    F: FnOnce(Block),
{
    let height = block.header.height;
    let (block, result) = mine_block(block, difficulty, cancel, u64::MAX);
    match result {
        MiningResult::Success => {
            info!(height, nonce = block.header.nonce, "block mined");
            on_success(block);
        }
        MiningResult::Cancelled => debug!(height, "mining cancelled"),
        MiningResult::Exhausted => debug!(height, "nonce space exhausted"),
    }
    result
}

/// Handle to a miner running on its own thread.
///
/// Dropping the handle cancels the search.
#[must_use = "dropping a MinerHandle cancels the miner"]
#[derive(Debug)]
pub struct MinerHandle {
    cancel: Arc<AtomicBool>,
    thread: Option<JoinHandle<MiningResult>>,
}

impl MinerHandle {
    /// Ask the miner to stop; it notices before its next hash
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Wait for the miner; a panicked miner counts as cancelled
    pub fn join(mut self) -> MiningResult {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or(MiningResult::Cancelled),
            None => MiningResult::Cancelled,
        }
    }
}

impl Drop for MinerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
        }
    }
}

/// Run [`mine`] on a dedicated thread so the search never blocks the caller
pub fn spawn_miner<F>(block: Block, difficulty: usize, on_success: F) -> MinerHandle
where
    F: FnOnce(Block) + Send + 'static,
{
    let cancel = Arc::new(AtomicBool::new(false));
    let signal = Arc::clone(&cancel);
    debug!(
        height = block.header.height,
        transactions = block.transactions.len(),
        difficulty,
        "starting miner"
    );
    let thread = thread::spawn(move || mine(block, difficulty, &signal, on_success));

    MinerHandle {
        cancel,
        thread: Some(thread),
    }
}
