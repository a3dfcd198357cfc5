//! Merkle accumulator for combining transaction and entry ids into one root.
//!
//! Behavior:
//! - An empty list yields the SHA3-256 hash of the empty string.
//! - A single id yields `H(0x00 || id)`.
//! - Longer lists split at the largest power of two strictly below their
//!   length; interior nodes hash as `H(0x01 || left || right)`.

use crate::types::hash::Hash;

const LEAF_PREFIX: u8 = 0x00;
const INTERIOR_PREFIX: u8 = 0x01;

/// Utility functions to build Merkle roots from ids.
pub struct MerkleTree;

impl MerkleTree {
    /// Root of the empty list: SHA3-256 of no input.
    pub fn empty_root() -> Hash {
        Hash::sha3().finalize()
    }

    /// Hashes a single id as a leaf node.
    pub fn hash_leaf(id: &Hash) -> Hash {
        Hash::sha3().chain([LEAF_PREFIX]).chain(id).finalize()
    }

    fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        Hash::sha3()
            .chain([INTERIOR_PREFIX])
            .chain(left)
            .chain(right)
            .finalize()
    }

    /// Computes the Merkle root of `ids`. Order matters.
    pub fn root(ids: &[Hash]) -> Hash {
        match ids {
            [] => Self::empty_root(),
            [only] => Self::hash_leaf(only),
            _ => {
                let k = split_point(ids.len());
                let left = Self::root(&ids[..k]);
                let right = Self::root(&ids[k..]);
                Self::hash_pair(&left, &right)
            }
        }
    }
}

/// Largest power of two strictly less than `n` (requires `n >= 2`).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k << 1 < n {
        k <<= 1;
    }
    k
}
