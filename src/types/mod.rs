//! Core type definitions shared by the virtual machine.
//!
//! - `Bytes`: reference-counted immutable byte strings
//! - `Hash`: fixed-size 32-byte SHA3-256 digests and the id domain tag
//! - `encoding`: byte sinks and the strict varint codec used by programs
//! - `MerkleTree`: the id accumulator used for block-level aggregation

pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod merkle_tree;
