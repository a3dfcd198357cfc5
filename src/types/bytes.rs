//! Reference-counted immutable byte string.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte string.
///
/// Byte strings pushed by a program are shared between the data stack, entry
/// fields and nested program frames. Cloning copies the reference, never the
/// payload, which keeps `dup`/`peek` and `exec` cheap.
#[derive(Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Bytes(Arc<[u8]>);

impl Bytes {
    /// Creates a new byte string from anything convertible to `Vec<u8>`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(data.into()))
    }

    /// Creates an empty byte string.
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    /// Returns the number of bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the byte string is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the contents as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Copies the contents into a new `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"x", hex::encode(self.as_slice()))
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(Arc::from(v))
    }
}

impl From<&[u8]> for Bytes {
    fn from(s: &[u8]) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&str> for Bytes {
    fn from(s: &str) -> Self {
        Self::from(s.as_bytes())
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(arr: [u8; N]) -> Self {
        Self::from(arr.as_slice())
    }
}

impl<const N: usize> From<&[u8; N]> for Bytes {
    fn from(arr: &[u8; N]) -> Self {
        Self::from(arr.as_slice())
    }
}
