//! Block construction and two-phase block connection

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::merkle::merkle_root;
use crate::pow::check_proof_of_work;
use crate::serialization::{hash_header_with_body, serialize_block_body};
use crate::transaction::{apply_transaction, check_tx_id, check_tx_inputs};
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// BlockHash: ℬ → ℍ, SHA256(serialize(header) ‖ serialize(transactions))
pub fn calculate_block_hash(block: &Block) -> Hash {
    hash_header_with_body(&block.header, &serialize_block_body(&block.transactions))
}

impl Block {
    pub fn hash(&self) -> Hash {
        calculate_block_hash(self)
    }

    pub fn height(&self) -> Height {
        self.header.height
    }
}

/// Merkle root over the ids of `transactions`, in order
pub fn calculate_merkle_root(transactions: &[Transaction]) -> Hash {
    let ids: Vec<Hash> = transactions.iter().map(|tx| tx.id).collect();
    merkle_root(&ids)
}

/// Seconds since the Unix epoch
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// NewBlock: ℬ × 𝒯𝒳* → ℬ
///
/// Unmined candidate on top of `prev_block`: nonce 0, default difficulty,
/// height one above the parent.
pub fn new_block(prev_block: &Block, transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            prev_block_hash: calculate_block_hash(prev_block),
            merkle_root: calculate_merkle_root(&transactions),
            timestamp: current_timestamp(),
            difficulty: DEFAULT_DIFFICULTY,
            nonce: 0,
            height: prev_block.header.height + 1,
        },
        transactions,
    }
}

/// Genesis block carrying zero-input issuance transactions.
///
/// Fixed timestamp and nonce so every node derives the same genesis hash.
pub fn genesis_block(transactions: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            prev_block_hash: Hash::zero(),
            merkle_root: calculate_merkle_root(&transactions),
            timestamp: 0,
            difficulty: GENESIS_DIFFICULTY,
            nonce: 0,
            height: 0,
        },
        transactions,
    }
}

/// Check a genesis block in isolation
pub fn check_genesis_block(block: &Block) -> ValidationResult {
    if block.header.height != 0 {
        return ValidationResult::Invalid(format!("Genesis height is {}", block.header.height));
    }
    if !block.header.prev_block_hash.is_zero() {
        return ValidationResult::Invalid("Genesis has a parent hash".to_string());
    }
    if let Some(i) = block.transactions.iter().position(|tx| !tx.inputs.is_empty()) {
        return ValidationResult::Invalid(format!("Genesis transaction {} has inputs", i));
    }
    if !check_proof_of_work(block) {
        return ValidationResult::Invalid("Genesis proof of work".to_string());
    }
    check_block_structure(block)
}

/// Transaction ids and the merkle root must match the block's content
pub fn check_block_structure(block: &Block) -> ValidationResult {
    for (i, tx) in block.transactions.iter().enumerate() {
        if let ValidationResult::Invalid(reason) = check_tx_id(tx) {
            return ValidationResult::Invalid(format!("Transaction {}: {}", i, reason));
        }
    }

    let expected = calculate_merkle_root(&block.transactions);
    if block.header.merkle_root != expected {
        return ValidationResult::Invalid(format!(
            "Merkle root {} does not match transactions {}",
            block.header.merkle_root, expected
        ));
    }

    ValidationResult::Valid
}

/// Phase 1: proof of work, difficulty floor and continuity with `parent`
pub fn check_block_header(block: &Block, parent: &Block, min_difficulty: usize) -> ValidationResult {
    let header = &block.header;

    if header.difficulty < min_difficulty {
        return ValidationResult::Invalid(format!(
            "Difficulty {} below required {}",
            header.difficulty, min_difficulty
        ));
    }

    if !check_proof_of_work(block) {
        return ValidationResult::Invalid(format!(
            "Block hash {} does not meet difficulty {}",
            calculate_block_hash(block),
            header.difficulty
        ));
    }

    if header.height != parent.header.height + 1 {
        return ValidationResult::Invalid(format!(
            "Height {} does not follow parent height {}",
            header.height, parent.header.height
        ));
    }

    let parent_hash = calculate_block_hash(parent);
    if header.prev_block_hash != parent_hash {
        return ValidationResult::Invalid(format!(
            "Previous hash {} does not match tip {}",
            header.prev_block_hash, parent_hash
        ));
    }

    check_block_structure(block)
}

/// ValidateBlock: ℬ × ℬ × 𝒰𝒮 → {valid, invalid}
///
/// Phases 1 and 2 of block connection. Nothing in `utxo_set` changes:
/// 1. Check header against `parent` (proof of work, height, linkage)
/// 2. Copy us to a scratch view; for each tx in order, validate it against the
///    scratch view and then apply it there, so later transactions may spend
///    outputs created earlier in the same block
pub fn validate_block(
    block: &Block,
    parent: &Block,
    utxo_set: &UtxoSet,
    min_difficulty: usize,
    ctx: &ScriptContext,
) -> Result<ValidationResult> {
    let header_result = check_block_header(block, parent, min_difficulty);
    if !header_result.is_valid() {
        return Ok(header_result);
    }

    let mut scratch = utxo_set.clone();
    for (i, tx) in block.transactions.iter().enumerate() {
        let (result, burned) = check_tx_inputs(tx, &scratch, ctx);
        if let ValidationResult::Invalid(reason) = result {
            return Ok(ValidationResult::Invalid(format!(
                "Invalid transaction at index {}: {}",
                i, reason
            )));
        }
        if burned > 0 {
            debug!(tx = %tx.id, burned, "transaction burns unspent input value");
        }
        apply_transaction(tx, &mut scratch)?;
    }

    Ok(ValidationResult::Valid)
}

/// ApplyBlock: ℬ × 𝒰𝒮 → 𝒰𝒮
///
/// Phase 3. Applies every transaction to a working copy and swaps it in only
/// when all of them applied, so `utxo_set` is either fully updated or untouched.
pub fn apply_block(block: &Block, utxo_set: &mut UtxoSet) -> Result<()> {
    let mut working = utxo_set.clone();
    for tx in &block.transactions {
        apply_transaction(tx, &mut working)?;
    }
    *utxo_set = working;
    Ok(())
}

/// ConnectBlock: ℬ × ℬ × 𝒰𝒮 → {valid, invalid} × 𝒰𝒮
///
/// Validate then apply. On `Invalid` the index is unchanged.
pub fn connect_block(
    block: &Block,
    parent: &Block,
    utxo_set: &mut UtxoSet,
    min_difficulty: usize,
    ctx: &ScriptContext,
) -> Result<ValidationResult> {
    let result = validate_block(block, parent, utxo_set, min_difficulty, ctx)?;
    if result.is_valid() {
        apply_block(block, utxo_set)?;
    }
    Ok(result)
}

/// A chain as received from a peer: only the blocks are read, any exported
/// UTXO index is ignored and rebuilt by replay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChainExport {
    pub blocks: Vec<Block>,
}

/// The chain of accepted blocks and the UTXO index they produce.
///
/// Serializes for export; it is only ever built through [`Blockchain::new`] or
/// a replay, so it always holds at least the genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blockchain {
    blocks: Vec<Block>,
    utxo_set: UtxoSet,
    min_difficulty: usize,
}

impl Blockchain {
    /// Start a chain at `genesis`, issuing its outputs without validation
    pub fn new(genesis: Block, min_difficulty: usize) -> Result<Self> {
        if let ValidationResult::Invalid(reason) = check_genesis_block(&genesis) {
            return Err(ConsensusError::BlockValidation(format!("genesis: {}", reason)));
        }

        let mut utxo_set = UtxoSet::new();
        for tx in &genesis.transactions {
            utxo_set.insert_outputs(tx.id, &tx.outputs);
        }

        Ok(Self {
            blocks: vec![genesis],
            utxo_set,
            min_difficulty,
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn genesis(&self) -> &Block {
        &self.blocks[0]
    }

    pub fn tip(&self) -> &Block {
        // never empty: constructed with a genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> Height {
        self.tip().header.height
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn min_difficulty(&self) -> usize {
        self.min_difficulty
    }

    /// AddBlock: validate against the tip and current index, then commit
    pub fn add_block(&mut self, block: Block, ctx: &ScriptContext) -> Result<ValidationResult> {
        let parent = &self.blocks[self.blocks.len() - 1];
        let result = connect_block(&block, parent, &mut self.utxo_set, self.min_difficulty, ctx)?;
        match &result {
            ValidationResult::Valid => {
                info!(height = block.header.height, hash = %block.hash(), "block connected");
                self.blocks.push(block);
            }
            ValidationResult::Invalid(reason) => {
                debug!(height = block.header.height, reason = %reason, "block rejected");
            }
        }
        Ok(result)
    }

    /// Append a block whose validate phase already passed against this tip.
    ///
    /// Only the apply phase runs here; the caller guarantees the tip and index
    /// have not changed since validation.
    pub(crate) fn commit_validated(&mut self, block: Block) -> Result<()> {
        apply_block(&block, &mut self.utxo_set)?;
        info!(height = block.header.height, hash = %block.hash(), "block connected");
        self.blocks.push(block);
        Ok(())
    }

    /// Assemble a chain from parts that were already replayed and checked
    pub(crate) fn from_replayed(blocks: Vec<Block>, utxo_set: UtxoSet, min_difficulty: usize) -> Self {
        Self {
            blocks,
            utxo_set,
            min_difficulty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::mine_block;
    use crate::transaction::new_transaction;
    use std::sync::atomic::AtomicBool;

    const LOCK: &str = "test --- test OPDup test1 OPEqualVerify";

    fn output(value: Value) -> TransactionOutput {
        TransactionOutput { value, script: LOCK.to_string() }
    }

    fn input(txid: Hash, index: u64, arg: &str) -> TransactionInput {
        let mut script_args = ScriptArgs::new();
        script_args.insert("test".to_string(), arg.to_string());
        TransactionInput { prev_tx_id: txid, output_index: index, script_args }
    }

    fn chain() -> (Blockchain, Transaction) {
        let issuance = new_transaction(vec![], vec![output(200)]);
        let chain = Blockchain::new(genesis_block(vec![issuance.clone()]), 1).unwrap();
        (chain, issuance)
    }

    fn mined(parent: &Block, txs: Vec<Transaction>) -> Block {
        let cancel = AtomicBool::new(false);
        let (block, result) = mine_block(new_block(parent, txs), 1, &cancel, 1_000_000);
        assert_eq!(result, crate::mining::MiningResult::Success);
        block
    }

    #[test]
    fn test_genesis_issues_outputs() {
        let (chain, issuance) = chain();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.utxo_set().get(&issuance.id, 0).map(|o| o.value), Some(200));
    }

    #[test]
    fn test_genesis_rejects_inputs() {
        let tx = new_transaction(vec![input(Hash([1; 32]), 0, "test1")], vec![output(1)]);
        assert!(Blockchain::new(genesis_block(vec![tx]), 1).is_err());
    }

    #[test]
    fn test_new_block_links_to_parent() {
        let (chain, _) = chain();
        let block = new_block(chain.tip(), vec![]);
        assert_eq!(block.header.prev_block_hash, chain.tip().hash());
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.nonce, 0);
        assert_eq!(block.header.merkle_root, Hash::zero());
    }

    #[test]
    fn test_block_hash_covers_body() {
        let (chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let mut block = new_block(chain.tip(), vec![spend]);
        let before = block.hash();
        block.transactions[0].lock_time = 7;
        assert_ne!(before, block.hash());
    }

    #[test]
    fn test_add_block_success() {
        let (mut chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let block = mined(chain.tip(), vec![spend]);

        let result = chain.add_block(block, &ScriptContext::default()).unwrap();
        assert_eq!(result, ValidationResult::Valid);
        assert_eq!(chain.len(), 2);
        assert!(chain.utxo_set().is_empty());
    }

    #[test]
    fn test_add_block_bad_script_is_atomic() {
        let (mut chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test")], vec![]);
        let block = mined(chain.tip(), vec![spend]);
        let before = chain.utxo_set().clone();

        let result = chain.add_block(block, &ScriptContext::default()).unwrap();
        assert!(!result.is_valid());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.utxo_set(), &before);
    }

    #[test]
    fn test_add_block_second_tx_invalid_rolls_back_first() {
        let (mut chain, issuance) = chain();
        let good = new_transaction(vec![input(issuance.id, 0, "test1")], vec![output(100)]);
        let over = new_transaction(vec![input(good.id, 0, "test1")], vec![output(101)]);
        let block = mined(chain.tip(), vec![good, over]);
        let before = chain.utxo_set().clone();

        assert!(!chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.utxo_set(), &before);
    }

    #[test]
    fn test_add_block_intra_block_chain_of_spends() {
        let (mut chain, issuance) = chain();
        let first = new_transaction(vec![input(issuance.id, 0, "test1")], vec![output(150)]);
        let second = new_transaction(vec![input(first.id, 0, "test1")], vec![output(150)]);
        let block = mined(chain.tip(), vec![first.clone(), second.clone()]);

        assert!(chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
        assert!(!chain.utxo_set().contains(&issuance.id, 0));
        assert!(!chain.utxo_set().contains(&first.id, 0));
        assert!(chain.utxo_set().contains(&second.id, 0));
    }

    #[test]
    fn test_add_block_double_spend_within_block() {
        let (mut chain, issuance) = chain();
        let a = new_transaction(vec![input(issuance.id, 0, "test1")], vec![output(10)]);
        let b = new_transaction(vec![input(issuance.id, 0, "test1")], vec![output(20)]);
        let block = mined(chain.tip(), vec![a, b]);

        assert!(!chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_block_unmined_rejected() {
        let (mut chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let mut block = new_block(chain.tip(), vec![spend]);
        block.header.difficulty = 64;

        assert!(!chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
    }

    #[test]
    fn test_add_block_difficulty_floor() {
        let (mut chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let mut block = new_block(chain.tip(), vec![spend]);
        block.header.difficulty = 0;

        let result = chain.add_block(block, &ScriptContext::default()).unwrap();
        assert!(matches!(result, ValidationResult::Invalid(reason) if reason.contains("Difficulty")));
    }

    #[test]
    fn test_add_block_wrong_height_or_parent() {
        let (mut chain, _) = chain();

        let mut tall = new_block(chain.tip(), vec![]);
        tall.header.height = 5;
        let cancel = AtomicBool::new(false);
        let (tall, _) = mine_block(tall, 1, &cancel, 1_000_000);
        assert!(!chain.add_block(tall, &ScriptContext::default()).unwrap().is_valid());

        let mut orphan = new_block(chain.tip(), vec![]);
        orphan.header.prev_block_hash = Hash([7; 32]);
        let (orphan, _) = mine_block(orphan, 1, &cancel, 1_000_000);
        assert!(!chain.add_block(orphan, &ScriptContext::default()).unwrap().is_valid());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_add_block_tampered_merkle_root() {
        let (mut chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let mut block = new_block(chain.tip(), vec![spend]);
        block.header.merkle_root = Hash([5; 32]);
        let cancel = AtomicBool::new(false);
        let (block, _) = mine_block(block, 1, &cancel, 1_000_000);

        assert!(!chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
    }

    #[test]
    fn test_empty_block_accepted() {
        let (mut chain, _) = chain();
        let block = mined(chain.tip(), vec![]);
        assert!(chain.add_block(block, &ScriptContext::default()).unwrap().is_valid());
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_validate_block_does_not_mutate() {
        let (chain, issuance) = chain();
        let spend = new_transaction(vec![input(issuance.id, 0, "test1")], vec![]);
        let block = mined(chain.tip(), vec![spend]);
        let utxo_set = chain.utxo_set().clone();

        let result = validate_block(&block, chain.tip(), &utxo_set, 1, &ScriptContext::default()).unwrap();
        assert!(result.is_valid());
        assert_eq!(&utxo_set, chain.utxo_set());
    }
}
