//! Core ledger types

use crate::constants::*;
use crate::error::ConsensusError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Amount carried by an output
pub type Value = u64;

/// Block height, genesis is 0
pub type Height = u64;

/// Named arguments an input supplies to the locking script it unlocks
pub type ScriptArgs = BTreeMap<String, String>;

/// A SHA-256 digest.
///
/// Transaction ids, block hashes and merkle nodes are all `Hash`es. Textually
/// (Display, serde) it is always 64 lowercase hex characters.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, used as genesis parent and empty merkle root
    pub const fn zero() -> Self {
        Hash([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| ConsensusError::MalformedInput(format!("hash {:?}: {}", s, e)))?;
        Ok(Hash(bytes))
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction Output: a spendable claim guarded by a locking script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub value: Value,
    pub script: String,
}

/// Transaction Input: reference to one prior output plus its unlocking arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prev_tx_id: Hash,
    pub output_index: u64,
    #[serde(default)]
    pub script_args: ScriptArgs,
}

/// Transaction: id is derived from inputs and outputs, see
/// [`crate::transaction::calculate_tx_id`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    #[serde(default)]
    pub lock_time: u64,
}

/// Block Header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub prev_block_hash: Hash,
    pub merkle_root: Hash,
    pub timestamp: u64,
    pub difficulty: usize,
    pub nonce: u64,
    pub height: Height,
}

/// Block: header plus ordered transactions; the proof of work covers both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

/// UTXO index: txid → outputs by original position, `None` once spent.
///
/// Spending never shifts the position of the remaining outputs, so an input's
/// `output_index` stays meaningful for the lifetime of the entry. The entry for a
/// txid is dropped as soon as its last live output is spent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtxoSet {
    entries: HashMap<Hash, Vec<Option<TransactionOutput>>>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The live output at `(txid, index)`, if any
    pub fn get(&self, txid: &Hash, index: u64) -> Option<&TransactionOutput> {
        let slot = usize::try_from(index).ok()?;
        self.entries.get(txid)?.get(slot)?.as_ref()
    }

    pub fn contains(&self, txid: &Hash, index: u64) -> bool {
        self.get(txid, index).is_some()
    }

    /// Record all outputs of `txid` as unspent
    pub fn insert_outputs(&mut self, txid: Hash, outputs: &[TransactionOutput]) {
        if outputs.is_empty() {
            return;
        }
        self.entries
            .insert(txid, outputs.iter().cloned().map(Some).collect());
    }

    /// Mark `(txid, index)` spent and hand back the output it held
    pub fn remove(&mut self, txid: &Hash, index: u64) -> Option<TransactionOutput> {
        let slot = usize::try_from(index).ok()?;
        let outputs = self.entries.get_mut(txid)?;
        let spent = outputs.get_mut(slot)?.take()?;
        if outputs.iter().all(Option::is_none) {
            self.entries.remove(txid);
        }
        Some(spent)
    }

    /// Live outputs of `txid` with their original positions
    pub fn outputs_of(&self, txid: &Hash) -> Vec<(u64, &TransactionOutput)> {
        self.entries
            .get(txid)
            .map(|outputs| {
                outputs
                    .iter()
                    .enumerate()
                    .filter_map(|(i, o)| o.as_ref().map(|o| (i as u64, o)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of transactions with at least one live output
    pub fn transaction_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of live outputs
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .map(|outputs| outputs.iter().filter(|o| o.is_some()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all live output values
    pub fn total_value(&self) -> u128 {
        self.iter().map(|(_, _, o)| o.value as u128).sum()
    }

    /// Every live output as `(txid, index, output)`
    pub fn iter(&self) -> impl Iterator<Item = (&Hash, u64, &TransactionOutput)> {
        self.entries.iter().flat_map(|(txid, outputs)| {
            outputs
                .iter()
                .enumerate()
                .filter_map(move |(i, o)| o.as_ref().map(|o| (txid, i as u64, o)))
        })
    }
}

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// Script execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptContext {
    pub flags: u32,
    pub third_party_timeout_secs: u64,
}

impl ScriptContext {
    pub fn new(flags: u32) -> Self {
        Self {
            flags,
            third_party_timeout_secs: THIRD_PARTY_TIMEOUT_SECS,
        }
    }

    pub fn third_party_enabled(&self) -> bool {
        self.flags & SCRIPT_ENABLE_THIRD_PARTY != 0
    }
}

impl Default for ScriptContext {
    fn default() -> Self {
        Self::new(SCRIPT_FLAGS_NONE)
    }
}
