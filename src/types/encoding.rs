//! Byte sinks and unsigned varint helpers.
//!
//! Programs carry lengths and large integers as unsigned LEB128 varints:
//! seven payload bits per byte, least-significant group first, high bit set
//! on every byte except the last. Decoding is strict: a varint must be the
//! shortest encoding of its value and must fit in 64 bits.

use crate::virtual_machine::errors::VMError;

/// Longest valid encoding of a `u64` (ceil(64 / 7)).
pub const MAX_VARINT_LEN: usize = 10;

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers to allow encoding directly into
/// the target without intermediate allocations.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating memory.
#[derive(Debug, Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    /// Creates a new counter initialized to zero.
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing was counted.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Writes `value` as an unsigned LEB128 varint.
pub fn write_uvarint<S: EncodeSink>(out: &mut S, mut value: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    while value >= 0x80 {
        buf[n] = (value as u8) | 0x80;
        value >>= 7;
        n += 1;
    }
    buf[n] = value as u8;
    out.write(&buf[..=n]);
}

/// Returns the number of bytes [`write_uvarint`] emits for `value`.
pub fn uvarint_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Reads one canonical unsigned varint from the front of `input`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
///
/// - [`VMError::TruncatedInput`] if the input ends mid-varint
/// - [`VMError::BadVarint`] if the encoding overflows 64 bits or is not minimal
pub fn read_uvarint(input: &[u8]) -> Result<(u64, usize), VMError> {
    let mut value: u64 = 0;
    for (i, &b) in input.iter().enumerate() {
        if i == MAX_VARINT_LEN - 1 && b > 1 {
            return Err(VMError::BadVarint {
                reason: "varint overflows 64 bits",
            });
        }
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            // A trailing zero group means a shorter encoding existed.
            if b == 0 && i > 0 {
                return Err(VMError::BadVarint {
                    reason: "non-minimal varint encoding",
                });
            }
            return Ok((value, i + 1));
        }
    }
    Err(VMError::TruncatedInput {
        needed: input.len() + 1,
        available: input.len(),
    })
}

/// Reads a varint length prefix followed by that many bytes.
///
/// Returns the payload and the total number of bytes consumed (prefix
/// included).
pub fn read_prefixed(input: &[u8]) -> Result<(&[u8], usize), VMError> {
    let (len, prefix) = read_uvarint(input)?;
    let rest = &input[prefix..];
    let len = usize::try_from(len).map_err(|_| VMError::TruncatedInput {
        needed: usize::MAX,
        available: rest.len(),
    })?;
    if rest.len() < len {
        return Err(VMError::TruncatedInput {
            needed: len,
            available: rest.len(),
        });
    }
    Ok((&rest[..len], prefix + len))
}
