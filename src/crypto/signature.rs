//! Ed25519 signature verification over 32-byte message digests.
//!
//! Length checks on keys and messages are the caller's job: the
//! interpreter reports those as operand errors. Everything past the length
//! check fails closed, so a malformed signature or a key that is not a valid
//! curve point simply verifies as `false`.

use ed25519_dalek::{Signature, VerifyingKey};

/// Public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Signed message (digest) length in bytes.
pub const MESSAGE_LEN: usize = 32;
/// Signature length in bytes.
pub const SIGNATURE_LEN: usize = 64;

/// Verifies `sig` over `msg` under `pubkey`.
///
/// Uses strict verification, rejecting small-order keys and non-canonical
/// signature scalars so that every node reaches the same verdict.
pub fn verify(pubkey: &[u8; PUBLIC_KEY_LEN], msg: &[u8; MESSAGE_LEN], sig: &[u8]) -> bool {
    let Ok(sig) = Signature::from_slice(sig) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(pubkey) else {
        return false;
    };
    key.verify_strict(msg, &sig).is_ok()
}
