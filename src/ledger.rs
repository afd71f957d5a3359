//! Shared ledger state
//!
//! One [`Ledger`] owns the chain, its UTXO index and the pending pool. Blocks
//! from peers, the local miner's callback and transaction submissions may all
//! arrive concurrently:
//!
//! - chain mutations (block commit, chain replacement) take the chain write
//!   lock and are therefore serialized; readers never see a half-applied block
//! - block validation and chain replay run on a snapshot outside the write
//!   lock and are re-run if the tip moved in the meantime
//! - at most one miner runs; it is cancelled as soon as its parent stops being
//!   the tip
//!
//! Locks are never nested except miner before pool before chain.

use crate::block::{calculate_block_hash, new_block, validate_block, Blockchain, ChainExport};
use crate::config::LedgerConfig;
use crate::error::{ConsensusError, Result};
use crate::mempool::{select_transactions, Mempool, MempoolResult};
use crate::mining::{spawn_miner, MinerHandle, MiningResult};
use crate::reorganization::{reorganize_chain, should_reorganize};
use crate::transaction::{check_tx_inputs, new_transaction};
use crate::types::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// A miner working on a candidate block
#[derive(Debug)]
struct InFlight {
    handle: MinerHandle,
    parent: Hash,
    transactions: Vec<Transaction>,
}

#[derive(Debug)]
pub struct Ledger {
    chain: RwLock<Blockchain>,
    mempool: Mutex<Mempool>,
    miner: Mutex<Option<InFlight>>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(genesis: Block, config: LedgerConfig) -> Result<Self> {
        config.validate()?;
        let chain = Blockchain::new(genesis, config.difficulty)?;
        info!(
            genesis = %chain.genesis().hash(),
            difficulty = config.difficulty,
            "ledger started"
        );

        Ok(Self {
            chain: RwLock::new(chain),
            mempool: Mutex::new(Mempool::new()),
            miner: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn read_chain(&self) -> RwLockReadGuard<'_, Blockchain> {
        self.chain.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_chain(&self) -> RwLockWriteGuard<'_, Blockchain> {
        self.chain.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_mempool(&self) -> MutexGuard<'_, Mempool> {
        self.mempool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_miner(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.miner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tip and UTXO index as of one instant
    fn snapshot(&self) -> (Block, UtxoSet) {
        let chain = self.read_chain();
        (chain.tip().clone(), chain.utxo_set().clone())
    }

    pub fn chain(&self) -> Blockchain {
        self.read_chain().clone()
    }

    pub fn tip(&self) -> Block {
        self.read_chain().tip().clone()
    }

    pub fn height(&self) -> Height {
        self.read_chain().height()
    }

    pub fn utxo_set(&self) -> UtxoSet {
        self.read_chain().utxo_set().clone()
    }

    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.lock_mempool().transactions().to_vec()
    }

    pub fn is_mining(&self) -> bool {
        self.lock_miner()
            .as_ref()
            .is_some_and(|in_flight| !in_flight.handle.is_finished())
    }

    /// Chain export, as served to peers
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&*self.read_chain()).map_err(|e| ConsensusError::Serialization(e.to_string()))
    }

    /// IsValidTransaction against the current UTXO index
    pub fn is_valid_transaction(&self, tx: &Transaction) -> bool {
        let utxo_set = self.utxo_set();
        check_tx_inputs(tx, &utxo_set, &self.config.script_context()).0.is_valid()
    }

    /// Build a transaction, validate it and queue it for mining.
    ///
    /// Scripts run against a UTXO snapshot without holding any lock.
    pub fn submit_transaction(
        &self,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
    ) -> Result<Transaction> {
        let tx = new_transaction(inputs, outputs);
        let utxo_set = self.utxo_set();

        if let (ValidationResult::Invalid(reason), _) =
            check_tx_inputs(&tx, &utxo_set, &self.config.script_context())
        {
            debug!(tx = %tx.id, reason = %reason, "transaction rejected");
            return Err(ConsensusError::TransactionValidation(reason));
        }

        match self.lock_mempool().insert(tx.clone()) {
            MempoolResult::Accepted => {
                debug!(tx = %tx.id, "transaction queued");
                Ok(tx)
            }
            MempoolResult::Rejected(reason) => Err(ConsensusError::TransactionValidation(reason)),
        }
    }

    /// AddBlock: validate on a snapshot, then commit under the write lock.
    ///
    /// 1. Reject blocks below the next height outright
    /// 2. Validate against the tip and UTXO index of a read snapshot
    /// 3. Take the write lock; if the tip moved, start over
    /// 4. Apply and append
    /// 5. Retire a miner whose parent is no longer the tip and revalidate the pool
    pub fn add_block(&self, block: Block) -> Result<ValidationResult> {
        let ctx = self.config.script_context();

        loop {
            let (parent, utxo_set, min_difficulty) = {
                let chain = self.read_chain();
                if block.header.height < chain.len() as Height {
                    return Ok(ValidationResult::Invalid("Block height is too low".to_string()));
                }
                (chain.tip().clone(), chain.utxo_set().clone(), chain.min_difficulty())
            };

            let result = validate_block(&block, &parent, &utxo_set, min_difficulty, &ctx)?;
            if let ValidationResult::Invalid(reason) = &result {
                debug!(height = block.header.height, reason = %reason, "block rejected");
                return Ok(result);
            }

            let parent_hash = calculate_block_hash(&parent);
            let mut chain = self.write_chain();
            if calculate_block_hash(chain.tip()) != parent_hash {
                debug!(height = block.header.height, "tip moved during validation, retrying");
                continue;
            }
            chain.commit_validated(block)?;
            drop(chain);

            self.reconcile(Vec::new());
            return Ok(ValidationResult::Valid);
        }
    }

    /// Replace the chain with a strictly longer valid one.
    ///
    /// The replay runs on a copy of the local chain without holding any lock;
    /// the swap happens under the write lock only if the local tip is still the
    /// one the replay was checked against, otherwise the selection starts over.
    ///
    /// Returns `Ok(false)` when `blocks` is not longer than the local chain and
    /// an error when it is longer but fails validation or replay.
    pub fn sync_chain(&self, blocks: Vec<Block>) -> Result<bool> {
        let ctx = self.config.script_context();

        loop {
            let local = self.chain();
            if !should_reorganize(&blocks, local.blocks()) {
                debug!(offered = blocks.len(), local = local.len(), "ignoring shorter chain");
                return Ok(false);
            }

            let result = match reorganize_chain(&blocks, &local, &ctx) {
                Ok(result) => result,
                Err(e) => {
                    warn!(offered = blocks.len(), error = %e, "alternative chain rejected");
                    return Err(e);
                }
            };

            let mut chain = self.write_chain();
            if calculate_block_hash(chain.tip()) != calculate_block_hash(local.tip()) {
                debug!(offered = blocks.len(), "local chain moved during replay, retrying");
                continue;
            }
            *chain = result.chain;
            drop(chain);

            let returned = result
                .disconnected_blocks
                .into_iter()
                .flat_map(|block| block.transactions)
                .filter(|tx| !tx.inputs.is_empty())
                .collect();
            self.reconcile(returned);
            return Ok(true);
        }
    }

    /// Chain selection over a peer's JSON chain export
    pub fn sync_from_json(&self, text: &str) -> Result<bool> {
        let peer: ChainExport =
            serde_json::from_str(text).map_err(|e| ConsensusError::Serialization(e.to_string()))?;
        self.sync_chain(peer.blocks)
    }

    /// Start mining the pending pool on top of the current tip.
    ///
    /// Returns false when a miner is already running or nothing valid is
    /// pending. The miner hands its block to [`Ledger::add_block`].
    pub fn mine_candidate(self: &Arc<Self>) -> bool {
        let mut miner = self.lock_miner();
        if miner.as_ref().is_some_and(|in_flight| !in_flight.handle.is_finished()) {
            return false;
        }

        let pending = self.lock_mempool().drain();
        if pending.is_empty() {
            return false;
        }

        let (parent, utxo_set) = self.snapshot();
        let transactions = select_transactions(pending, &utxo_set, &self.config.script_context());
        if transactions.is_empty() {
            return false;
        }

        info!(
            height = parent.header.height + 1,
            transactions = transactions.len(),
            "mining candidate block"
        );
        let candidate = new_block(&parent, transactions.clone());
        let ledger = Arc::downgrade(self);
        let handle = spawn_miner(candidate, self.config.difficulty, move |block| {
            let Some(ledger) = ledger.upgrade() else {
                return;
            };
            match ledger.add_block(block) {
                Ok(ValidationResult::Valid) => {}
                Ok(ValidationResult::Invalid(reason)) => warn!(reason = %reason, "mined block rejected"),
                Err(e) => warn!(error = %e, "mined block failed to commit"),
            }
        });

        *miner = Some(InFlight {
            handle,
            parent: calculate_block_hash(&parent),
            transactions,
        });
        true
    }

    /// Stop the running miner, if any, and return its transactions to the pool
    pub fn cancel_mining(&self) {
        let in_flight = self.lock_miner().take();
        if let Some(in_flight) = in_flight {
            in_flight.handle.cancel();
            self.reconcile(in_flight.transactions);
        }
    }

    /// Wait for the running miner to finish, including its commit
    pub fn join_miner(&self) -> Option<MiningResult> {
        let in_flight = self.lock_miner().take()?;
        let result = in_flight.handle.join();
        self.reconcile(in_flight.transactions);
        Some(result)
    }

    /// Bring the miner and the pool in line with a new tip.
    ///
    /// A miner built on anything but the current tip is cancelled. Its
    /// transactions, `returned` and the drained pool are then revalidated in
    /// that order against a UTXO index read after the drain, so nothing queued
    /// against a newer tip is checked against an older one; whatever still
    /// validates is queued again.
    fn reconcile(&self, mut returned: Vec<Transaction>) {
        let stale = {
            let mut miner = self.lock_miner();
            let tip = self.read_chain().tip().clone();
            match miner.take() {
                Some(in_flight) if in_flight.parent != calculate_block_hash(&tip) => {
                    Some((in_flight, tip.header.height))
                }
                current => {
                    *miner = current;
                    None
                }
            }
        };
        if let Some((in_flight, height)) = stale {
            debug!(height, "retiring miner built on an old tip");
            in_flight.handle.cancel();
            returned.extend(in_flight.transactions);
        }

        returned.extend(self.lock_mempool().drain());
        if returned.is_empty() {
            return;
        }
        let offered = returned.len();
        let utxo_set = self.utxo_set();
        let kept = select_transactions(returned, &utxo_set, &self.config.script_context());

        let mut mempool = self.lock_mempool();
        for tx in kept {
            mempool.insert(tx);
        }
        if mempool.len() != offered {
            debug!(offered, pending = mempool.len(), "pool revalidated");
        }
    }
}
