//! Merkle root over transaction hashes

use crate::Hash;
use sha3::{Digest, Keccak256};

/// Compute the merkle root of `hashes`.
///
/// Pairs are combined as `Keccak256(left || right)`; an odd node at any
/// level is paired with itself. An empty list yields the zero hash.
pub fn compute_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::zero();
    }
    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(left);
                let mut hasher = Keccak256::new();
                hasher.update(left.as_bytes());
                hasher.update(right.as_bytes());
                Hash::from_slice(hasher.finalize().as_slice())
            })
            .collect();
    }
    level[0]
}
