//! Deterministic byte encoding for ids and block hashes
//!
//! Integers are 8-byte little-endian, counts and string lengths are varints,
//! hashes are their raw 32 bytes and maps are written in key order. The same
//! content therefore always encodes to the same bytes.

use crate::types::*;
use sha2::{Digest, Sha256};

/// Single SHA-256 of `data`
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    Hash(hash)
}

/// Hex-encoded SHA-256 of a text value, as pushed by OPHash
pub fn sha256_hex(text: &str) -> String {
    sha256_hash(text.as_bytes()).to_hex()
}

/// Encode a number as a 1, 3, 5 or 9 byte CompactSize varint
pub fn encode_varint(value: u64) -> Vec<u8> {
    if value < 0xfd {
        vec![value as u8]
    } else if value <= 0xffff {
        let mut result = vec![0xfd];
        result.extend_from_slice(&(value as u16).to_le_bytes());
        result
    } else if value <= 0xffffffff {
        let mut result = vec![0xfe];
        result.extend_from_slice(&(value as u32).to_le_bytes());
        result
    } else {
        let mut result = vec![0xff];
        result.extend_from_slice(&value.to_le_bytes());
        result
    }
}

fn write_u64(data: &mut Vec<u8>, value: u64) {
    data.extend_from_slice(&value.to_le_bytes());
}

fn write_str(data: &mut Vec<u8>, text: &str) {
    data.extend_from_slice(&encode_varint(text.len() as u64));
    data.extend_from_slice(text.as_bytes());
}

pub fn write_inputs(data: &mut Vec<u8>, inputs: &[TransactionInput]) {
    data.extend_from_slice(&encode_varint(inputs.len() as u64));
    for input in inputs {
        data.extend_from_slice(input.prev_tx_id.as_bytes());
        write_u64(data, input.output_index);
        // BTreeMap iterates in key order
        data.extend_from_slice(&encode_varint(input.script_args.len() as u64));
        for (name, value) in &input.script_args {
            write_str(data, name);
            write_str(data, value);
        }
    }
}

pub fn write_outputs(data: &mut Vec<u8>, outputs: &[TransactionOutput]) {
    data.extend_from_slice(&encode_varint(outputs.len() as u64));
    for output in outputs {
        write_u64(data, output.value);
        write_str(data, &output.script);
    }
}

pub fn write_transaction(data: &mut Vec<u8>, tx: &Transaction) {
    data.extend_from_slice(tx.id.as_bytes());
    write_inputs(data, &tx.inputs);
    write_outputs(data, &tx.outputs);
    write_u64(data, tx.lock_time);
}

/// Header encoding: prev_block_hash, merkle_root, timestamp, difficulty, nonce, height
pub fn write_header(data: &mut Vec<u8>, header: &BlockHeader) {
    data.extend_from_slice(header.prev_block_hash.as_bytes());
    data.extend_from_slice(header.merkle_root.as_bytes());
    write_u64(data, header.timestamp);
    write_u64(data, header.difficulty as u64);
    write_u64(data, header.nonce);
    write_u64(data, header.height);
}

/// Encoding of the transaction list that follows the header in a block
pub fn serialize_block_body(transactions: &[Transaction]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&encode_varint(transactions.len() as u64));
    for tx in transactions {
        write_transaction(&mut data, tx);
    }
    data
}

/// Hash of a header followed by an already encoded body.
///
/// The miner encodes the body once and calls this for every nonce.
pub fn hash_header_with_body(header: &BlockHeader, body: &[u8]) -> Hash {
    let mut data = Vec::with_capacity(128 + body.len());
    write_header(&mut data, header);
    data.extend_from_slice(body);
    sha256_hash(&data)
}
