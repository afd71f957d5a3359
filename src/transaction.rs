//! Transaction construction and validation against the UTXO index

use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::script::{parse_script, verify_script};
use crate::serialization::{sha256_hash, write_inputs, write_outputs};
use crate::types::*;
use std::collections::HashSet;

/// TxId: ℐ* × 𝒯* → ℍ
///
/// id = SHA256(serialize(inputs) ‖ serialize(outputs)). Lock time is not part
/// of the preimage, so identical inputs and outputs always give identical ids.
pub fn calculate_tx_id(inputs: &[TransactionInput], outputs: &[TransactionOutput]) -> Hash {
    let mut data = Vec::new();
    write_inputs(&mut data, inputs);
    write_outputs(&mut data, outputs);
    sha256_hash(&data)
}

/// NewTransaction: build a transaction and derive its id. Touches no chain state.
pub fn new_transaction(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Transaction {
    let id = calculate_tx_id(&inputs, &outputs);
    Transaction {
        id,
        inputs,
        outputs,
        lock_time: 0,
    }
}

/// CheckTransaction: 𝒯𝒳 → {valid, invalid}
///
/// Context-free checks for a spending transaction:
/// 1. |ins| > 0 (only genesis issues value from nothing)
/// 2. |ins| ≤ M_max_inputs ∧ |outs| ≤ M_max_outputs
/// 3. No two inputs reference the same output
/// 4. Every output script parses and Σ outs does not overflow
/// 5. tx.id matches the id recomputed from content
pub fn check_transaction(tx: &Transaction) -> ValidationResult {
    if tx.inputs.is_empty() {
        return ValidationResult::Invalid("Transaction has no inputs".to_string());
    }

    if tx.inputs.len() > MAX_INPUTS {
        return ValidationResult::Invalid(format!("Too many inputs: {}", tx.inputs.len()));
    }

    if tx.outputs.len() > MAX_OUTPUTS {
        return ValidationResult::Invalid(format!("Too many outputs: {}", tx.outputs.len()));
    }

    let mut seen = HashSet::new();
    for (i, input) in tx.inputs.iter().enumerate() {
        if !seen.insert((input.prev_tx_id, input.output_index)) {
            return ValidationResult::Invalid(format!(
                "Input {} spends {}:{} twice",
                i, input.prev_tx_id, input.output_index
            ));
        }
    }

    for (i, output) in tx.outputs.iter().enumerate() {
        if let Err(e) = parse_script(&output.script) {
            return ValidationResult::Invalid(format!("Output {} script: {}", i, e));
        }
    }

    if total_output_value(tx).is_none() {
        return ValidationResult::Invalid("Output value overflow".to_string());
    }

    check_tx_id(tx)
}

/// The stored id must be the id of the content
pub fn check_tx_id(tx: &Transaction) -> ValidationResult {
    let expected = calculate_tx_id(&tx.inputs, &tx.outputs);
    if tx.id != expected {
        return ValidationResult::Invalid(format!("Transaction id {} does not match content {}", tx.id, expected));
    }
    ValidationResult::Valid
}

/// Σ outputs, `None` on overflow
pub fn total_output_value(tx: &Transaction) -> Option<Value> {
    tx.outputs
        .iter()
        .try_fold(0 as Value, |acc, o| acc.checked_add(o.value))
}

/// IsUnspent: true iff the index holds a live output at `(txid, index)`
pub fn is_unspent(utxo_set: &UtxoSet, txid: &Hash, index: u64) -> bool {
    utxo_set.contains(txid, index)
}

/// Unlock: resolve the output an input references and run its locking script
/// against the input's arguments.
///
/// Returns the output's value and whether the script authorized the spend. An
/// unresolvable reference is `(0, false)`.
pub fn unlock(input: &TransactionInput, utxo_set: &UtxoSet, ctx: &ScriptContext) -> (Value, bool) {
    match utxo_set.get(&input.prev_tx_id, input.output_index) {
        Some(output) => (output.value, verify_script(&output.script, &input.script_args, ctx)),
        None => (0, false),
    }
}

/// Spend: unlock again and, if authorized, remove the output from the index
pub fn spend(input: &TransactionInput, utxo_set: &mut UtxoSet, ctx: &ScriptContext) -> bool {
    let (_, authorized) = unlock(input, utxo_set, ctx);
    if !authorized {
        return false;
    }
    utxo_set
        .remove(&input.prev_tx_id, input.output_index)
        .is_some()
}

/// CheckTxInputs: 𝒯𝒳 × 𝒰𝒮 → {valid, invalid} × ℕ
///
/// For transaction tx with UTXO set us:
/// 1. Every input must unlock; let total_in = Σ unlocked values
/// 2. Let total_out = Σ o.value
/// 3. If total_in < total_out: invalid
/// 4. Return (valid, total_in - total_out), the amount burned
pub fn check_tx_inputs(tx: &Transaction, utxo_set: &UtxoSet, ctx: &ScriptContext) -> (ValidationResult, Value) {
    let structure = check_transaction(tx);
    if !structure.is_valid() {
        return (structure, 0);
    }

    let mut total_in: Value = 0;
    for (i, input) in tx.inputs.iter().enumerate() {
        let (value, authorized) = unlock(input, utxo_set, ctx);
        if !authorized {
            return (
                ValidationResult::Invalid(format!(
                    "Input {} ({}:{}) does not unlock",
                    i, input.prev_tx_id, input.output_index
                )),
                0,
            );
        }
        total_in = match total_in.checked_add(value) {
            Some(sum) => sum,
            None => return (ValidationResult::Invalid("Input value overflow".to_string()), 0),
        };
    }

    // check_transaction already ruled out overflow
    let total_out = total_output_value(tx).unwrap_or(Value::MAX);
    if total_in < total_out {
        return (
            ValidationResult::Invalid(format!(
                "Outputs {} exceed unlocked inputs {}",
                total_out, total_in
            )),
            0,
        );
    }

    (ValidationResult::Valid, total_in - total_out)
}

/// IsValidTransaction: 𝒯𝒳 × 𝒰𝒮 → {true, false}
pub fn is_valid_transaction(tx: &Transaction, utxo_set: &UtxoSet, ctx: &ScriptContext) -> bool {
    check_tx_inputs(tx, utxo_set, ctx).0.is_valid()
}

/// ApplyTransaction: 𝒯𝒳 × 𝒰𝒮 → 𝒰𝒮
///
/// us' = (us \ {i.ref : i ∈ tx.inputs}) ∪ {(tx.id, k) ↦ tx.outputs[k]}.
/// Scripts are not re-run; callers apply only transactions that validated.
pub fn apply_transaction(tx: &Transaction, utxo_set: &mut UtxoSet) -> Result<()> {
    for input in &tx.inputs {
        if utxo_set.remove(&input.prev_tx_id, input.output_index).is_none() {
            return Err(ConsensusError::UtxoNotFound(format!(
                "{}:{} spent by {}",
                input.prev_tx_id, input.output_index, tx.id
            )));
        }
    }

    utxo_set.insert_outputs(tx.id, &tx.outputs);
    Ok(())
}
