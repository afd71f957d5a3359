//! Pending transaction pool

use crate::constants::*;
use crate::transaction::{apply_transaction, check_tx_inputs};
use crate::types::*;
use std::collections::HashSet;
use tracing::debug;

/// SelectTransactions: 𝒯𝒳* × 𝒰𝒮 → 𝒯𝒳*
///
/// Keep, in order, the candidates that validate against a scratch copy of us
/// updated with every candidate kept before them. The result is a transaction
/// list a block can carry without any of its transactions conflicting.
pub fn select_transactions(
    candidates: Vec<Transaction>,
    utxo_set: &UtxoSet,
    ctx: &ScriptContext,
) -> Vec<Transaction> {
    let mut scratch = utxo_set.clone();
    let mut selected = Vec::with_capacity(candidates.len());

    for tx in candidates {
        let (result, _) = check_tx_inputs(&tx, &scratch, ctx);
        if let ValidationResult::Invalid(reason) = result {
            debug!(tx = %tx.id, reason = %reason, "dropping pending transaction");
            continue;
        }
        if apply_transaction(&tx, &mut scratch).is_err() {
            continue;
        }
        selected.push(tx);
    }

    selected
}

/// Transactions waiting to be mined, in submission order
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    transactions: Vec<Transaction>,
    ids: HashSet<Hash>,
    spent: HashSet<(Hash, u64)>,
}

/// Result of mempool acceptance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolResult {
    Accepted,
    Rejected(String),
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, txid: &Hash) -> bool {
        self.ids.contains(txid)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// True if any input of `tx` is already claimed by a pending transaction
    pub fn has_conflicts(&self, tx: &Transaction) -> bool {
        tx.inputs
            .iter()
            .any(|input| self.spent.contains(&(input.prev_tx_id, input.output_index)))
    }

    /// AdmitToPool: 𝒯𝒳 × 𝒫 → {accepted, rejected}
    ///
    /// Pool-level checks only; the caller has already validated `tx` against
    /// the UTXO index:
    /// 1. tx is not already pending
    /// 2. the pool has room
    /// 3. no input is claimed by a pending transaction
    pub fn check_admission(&self, tx: &Transaction) -> MempoolResult {
        if self.contains(&tx.id) {
            return MempoolResult::Rejected("Transaction already in mempool".to_string());
        }
        if self.len() >= MAX_MEMPOOL_TRANSACTIONS {
            return MempoolResult::Rejected("Mempool is full".to_string());
        }
        if self.has_conflicts(tx) {
            return MempoolResult::Rejected("Transaction conflicts with mempool".to_string());
        }
        MempoolResult::Accepted
    }

    /// Queue `tx` if it passes [`Mempool::check_admission`]
    pub fn insert(&mut self, tx: Transaction) -> MempoolResult {
        let result = self.check_admission(&tx);
        if result != MempoolResult::Accepted {
            return result;
        }
        for input in &tx.inputs {
            self.spent.insert((input.prev_tx_id, input.output_index));
        }
        self.ids.insert(tx.id);
        self.transactions.push(tx);
        MempoolResult::Accepted
    }

    /// Take every pending transaction, leaving the pool empty
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.ids.clear();
        self.spent.clear();
        std::mem::take(&mut self.transactions)
    }
}
