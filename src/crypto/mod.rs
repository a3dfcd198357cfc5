//! Cryptographic primitives used by the signature-checking opcodes.

pub mod signature;
