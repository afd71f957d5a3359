//! # scriptchain
//!
//! A single-chain UTXO ledger whose outputs are guarded by a small text
//! script language, committed into proof-of-work blocks.
//!
//! ## Architecture
//!
//! - `types`, `serialization`, `merkle`: data model and the byte encodings the
//!   ids, block hashes and merkle roots are computed over
//! - `script`, `oracle`: the locking script VM and its optional HTTP lookup
//! - `transaction`, `block`, `pow`: validation and the two-phase block commit
//! - `mining`, `reorganization`, `mempool`: nonce search, longest-valid-chain
//!   selection and the pending pool
//! - `ledger`: the shared, lock-guarded ledger the three meet in
//!
//! ## Design Principles
//!
//! 1. **Validation is a value**: rule violations come back as
//!    [`ValidationResult::Invalid`]; [`ConsensusError`] is kept for malformed
//!    input, configuration and broken invariants
//! 2. **All or nothing**: a block either applies completely or leaves the UTXO
//!    index untouched
//! 3. **Exact Version Pinning**: hashing and signature crates are pinned
//!
//! ## Usage
//!
//! ```rust
//! use scriptchain::ChainConsensus;
//! use scriptchain::block::{genesis_block, Blockchain};
//! use scriptchain::types::*;
//!
//! let consensus = ChainConsensus::new();
//! let lock = "secret --- secret OPDup OPHash 2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b OPEqualVerify";
//! let issuance = consensus.new_transaction(
//!     vec![],
//!     vec![TransactionOutput { value: 50, script: lock.to_string() }],
//! );
//! let chain = Blockchain::new(genesis_block(vec![issuance.clone()]), 2).unwrap();
//!
//! let mut script_args = ScriptArgs::new();
//! script_args.insert("secret".to_string(), "secret".to_string());
//! let spend = consensus.new_transaction(
//!     vec![TransactionInput { prev_tx_id: issuance.id, output_index: 0, script_args }],
//!     vec![],
//! );
//! assert!(consensus.is_valid_transaction(&chain, &spend));
//! ```

pub mod types;
pub mod constants;
pub mod serialization;
pub mod merkle;
pub mod oracle;
pub mod script;
pub mod transaction;
pub mod pow;
pub mod block;
pub mod mining;
pub mod reorganization;
pub mod mempool;
pub mod config;
pub mod ledger;
pub mod error;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use block::Blockchain;
pub use config::LedgerConfig;
pub use error::{ConsensusError, Result};
pub use ledger::Ledger;
pub use mining::MiningResult;

use std::sync::atomic::AtomicBool;

/// Stateless entry point to the ledger rules
///
/// # Examples
///
/// ```
/// use scriptchain::ChainConsensus;
/// use scriptchain::block::{genesis_block, Blockchain};
/// use scriptchain::types::*;
/// use std::sync::atomic::AtomicBool;
///
/// let consensus = ChainConsensus::new();
/// let mut chain = Blockchain::new(genesis_block(vec![]), consensus.difficulty()).unwrap();
///
/// let candidate = consensus.new_block(chain.tip(), vec![]);
/// let mut mined = None;
/// consensus.mine(candidate, &AtomicBool::new(false), |block| mined = Some(block));
///
/// assert!(consensus.add_block(&mut chain, mined.unwrap()).unwrap());
/// assert_eq!(chain.height(), 1);
/// assert!(consensus.is_valid_chain(chain.blocks()));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainConsensus {
    ctx: ScriptContext,
    difficulty: usize,
}

impl Default for ChainConsensus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainConsensus {
    /// Default difficulty, third-party lookups disabled
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptchain::ChainConsensus;
    ///
    /// let consensus = ChainConsensus::new();
    /// assert_eq!(consensus.difficulty(), scriptchain::DEFAULT_DIFFICULTY);
    /// ```
    pub fn new() -> Self {
        Self::with_config(&LedgerConfig::default())
    }

    pub fn with_config(config: &LedgerConfig) -> Self {
        Self {
            ctx: config.script_context(),
            difficulty: config.difficulty,
        }
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn script_context(&self) -> &ScriptContext {
        &self.ctx
    }

    /// Build a transaction with its content-derived id
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptchain::ChainConsensus;
    /// use scriptchain::types::*;
    ///
    /// let consensus = ChainConsensus::new();
    /// let output = TransactionOutput { value: 10, script: "--- OPDup".to_string() };
    /// let a = consensus.new_transaction(vec![], vec![output.clone()]);
    /// let b = consensus.new_transaction(vec![], vec![output]);
    /// assert_eq!(a.id, b.id);
    /// ```
    pub fn new_transaction(&self, inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Transaction {
        transaction::new_transaction(inputs, outputs)
    }

    /// Unmined candidate on top of `prev_block`
    pub fn new_block(&self, prev_block: &Block, transactions: Vec<Transaction>) -> Block {
        block::new_block(prev_block, transactions)
    }

    /// Search for a nonce at this difficulty; `on_success` only runs on a solution
    pub fn mine<F>(&self, block: Block, cancel: &AtomicBool, on_success: F) -> MiningResult
    where
        F: FnOnce(Block),
    {
        mining::mine(block, self.difficulty, cancel, on_success)
    }

    /// AddBlock: true iff `block` was validated and committed to `chain`
    pub fn add_block(&self, chain: &mut Blockchain, block: Block) -> Result<bool> {
        Ok(chain.add_block(block, &self.ctx)?.is_valid())
    }

    /// Validate `tx` against the chain's current UTXO index
    pub fn is_valid_transaction(&self, chain: &Blockchain, tx: &Transaction) -> bool {
        transaction::is_valid_transaction(tx, chain.utxo_set(), &self.ctx)
    }

    /// Headers, proof of work and linkage of a whole chain
    pub fn is_valid_chain(&self, blocks: &[Block]) -> bool {
        reorganization::is_valid_chain(blocks, self.difficulty)
    }

    /// Evaluate a locking script against named arguments
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptchain::ChainConsensus;
    /// use scriptchain::types::ScriptArgs;
    ///
    /// let consensus = ChainConsensus::new();
    /// let mut args = ScriptArgs::new();
    /// args.insert("test".to_string(), "test1".to_string());
    /// assert!(consensus.verify_script("test --- test OPDup test1 OPEqualVerify", &args));
    /// ```
    pub fn verify_script(&self, script: &str, args: &ScriptArgs) -> bool {
        script::verify_script(script, args, &self.ctx)
    }

    /// Merkle root of an ordered list of hashes
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptchain::ChainConsensus;
    /// use scriptchain::types::Hash;
    ///
    /// let consensus = ChainConsensus::new();
    /// assert_eq!(consensus.merkle_root(&[]), Hash::zero());
    /// let (a, b) = (Hash([1; 32]), Hash([2; 32]));
    /// assert_eq!(consensus.merkle_root(&[a]), a);
    /// assert_ne!(consensus.merkle_root(&[a, b]), consensus.merkle_root(&[b, a]));
    /// ```
    pub fn merkle_root(&self, hashes: &[Hash]) -> Hash {
        merkle::merkle_root(hashes)
    }
}
