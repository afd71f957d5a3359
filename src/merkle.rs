//! Merkle commitment over ordered transaction ids

use crate::constants::EMPTY_MERKLE_ROOT;
use crate::serialization::sha256_hash;
use crate::types::Hash;

/// MerkleRoot: ℍ* → ℍ
///
/// Reduce an ordered list of hashes to one root:
/// 1. Empty input commits to the all-zero sentinel
/// 2. While more than one hash remains, pad an odd level by repeating its last
///    element, then replace each pair (a, b) with SHA256(a ‖ b)
///
/// The result is order sensitive: swapping two leaves changes the root.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash(EMPTY_MERKLE_ROOT);
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        if level.len() % 2 != 0 {
            let last = level[level.len() - 1];
            level.push(last);
        }

        level = level
            .chunks(2)
            .map(|pair| {
                let mut combined = [0u8; 64];
                combined[..32].copy_from_slice(pair[0].as_bytes());
                combined[32..].copy_from_slice(pair[1].as_bytes());
                sha256_hash(&combined)
            })
            .collect();
    }

    level[0]
}
