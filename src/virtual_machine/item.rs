//! Dynamic values manipulated by the machine and their canonical encoding.
//!
//! The canonical encoding of an item is itself a program: executing it pushes
//! exactly that item. It is used for push-data, for the `encode` instruction
//! and, prefixed with the domain tag, for every content id.

use crate::types::bytes::Bytes;
use crate::types::encoding::{EncodeSink, SizeCounter, uvarint_len, write_uvarint};
use crate::types::hash::Hash;
use crate::virtual_machine::isa::{Instruction, PUSHDATA, SMALL_INT_BASE, SMALL_INT_MAX};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Deepest tuple nesting a program may build. A tuple of scalars has depth 1.
pub const MAX_TUPLE_DEPTH: usize = 256;

/// Immutable, shared list of items.
///
/// Caches its nesting depth and encoded length, so neither requires a walk
/// of the nested fields.
#[derive(Clone)]
pub struct Tuple {
    fields: Arc<[Item]>,
    depth: usize,
    encoded_len: usize,
}

impl Tuple {
    /// One more than the deepest nested field.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Length of the canonical encoding.
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }
}

impl From<Vec<Item>> for Tuple {
    fn from(fields: Vec<Item>) -> Self {
        let depth = 1 + fields.iter().map(Item::depth).max().unwrap_or(0);
        let encoded_len = fields
            .iter()
            .fold(int_len(fields.len() as i64) + 1, |acc, f| {
                acc.saturating_add(f.encoded_len())
            });
        Self {
            fields: fields.into(),
            depth,
            encoded_len,
        }
    }
}

impl FromIterator<Item> for Tuple {
    fn from_iter<I: IntoIterator<Item = Item>>(iter: I) -> Self {
        iter.into_iter().collect::<Vec<_>>().into()
    }
}

impl Deref for Tuple {
    type Target = [Item];

    fn deref(&self) -> &[Item] {
        &self.fields
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{field:?}")?;
        }
        write!(f, "}}")
    }
}

/// A value on the data or alt stack.
#[derive(Clone, PartialEq, Eq)]
pub enum Item {
    /// Signed 64-bit integer.
    Int(i64),
    /// Byte string.
    Bytes(Bytes),
    /// Ordered, fixed-arity list of items.
    Tuple(Tuple),
}

impl Item {
    /// Returns the type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Item::Int(_) => "int",
            Item::Bytes(_) => "bytes",
            Item::Tuple(_) => "tuple",
        }
    }

    /// Type code pushed by the `type` instruction.
    pub const fn type_code(&self) -> i64 {
        match self {
            Item::Int(_) => 0,
            Item::Bytes(_) => 1,
            Item::Tuple(_) => 2,
        }
    }

    /// Builds a tuple item from its fields.
    pub fn tuple(fields: impl IntoIterator<Item = Item>) -> Item {
        Item::Tuple(fields.into_iter().collect())
    }

    /// Permissive equality used by the `equal` instruction.
    ///
    /// Like-typed ints and byte strings compare by value; tuples and mixed
    /// types are never equal.
    pub fn script_eq(&self, other: &Item) -> bool {
        match (self, other) {
            (Item::Int(a), Item::Int(b)) => a == b,
            (Item::Bytes(a), Item::Bytes(b)) => a == b,
            _ => false,
        }
    }

    /// Tuple nesting depth; 0 for scalars.
    pub fn depth(&self) -> usize {
        match self {
            Item::Tuple(t) => t.depth(),
            _ => 0,
        }
    }

    /// Length of the canonical encoding, without encoding.
    pub fn encoded_len(&self) -> usize {
        match self {
            Item::Int(v) => int_len(*v),
            Item::Bytes(b) => 1 + uvarint_len(b.len() as u64) + b.len(),
            Item::Tuple(t) => t.encoded_len(),
        }
    }

    /// Writes the canonical encoding to `out`.
    pub fn encode_to<S: EncodeSink>(&self, out: &mut S) {
        match self {
            Item::Int(v) => encode_int(*v, out),
            Item::Bytes(b) => encode_bytes(b, out),
            Item::Tuple(fields) => {
                for field in fields.iter() {
                    field.encode_to(out);
                }
                encode_int(fields.len() as i64, out);
                out.write(&[Instruction::Tuple as u8]);
            }
        }
    }

    /// Returns the canonical encoding.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_to(&mut out);
        out
    }

    /// Content id: `SHA3-256("txvm" || encode(self))`.
    pub fn id(&self) -> Hash {
        let mut h = Hash::id_builder();
        self.encode_to(&mut h);
        h.finalize()
    }
}

/// Writes the shortest program that pushes `v`.
fn encode_int<S: EncodeSink>(v: i64, out: &mut S) {
    match v {
        0..=SMALL_INT_MAX => out.write(&[SMALL_INT_BASE + v as u8]),
        -1 => out.write(&[Instruction::MinusOne as u8]),
        i64::MIN => encode_uvarint_push(i64::MIN as u64, out),
        v if v > 0 => encode_uvarint_push(v as u64, out),
        v => {
            encode_int(-v, out);
            out.write(&[Instruction::Negate as u8]);
        }
    }
}

fn int_len(v: i64) -> usize {
    let mut counter = SizeCounter::new();
    encode_int(v, &mut counter);
    counter.len()
}

/// `PUSHDATA uvarint(v)` followed by `varint`.
fn encode_uvarint_push<S: EncodeSink>(v: u64, out: &mut S) {
    out.write(&[PUSHDATA]);
    write_uvarint(out, uvarint_len(v) as u64);
    write_uvarint(out, v);
    out.write(&[Instruction::Varint as u8]);
}

fn encode_bytes<S: EncodeSink>(b: &[u8], out: &mut S) {
    out.write(&[PUSHDATA]);
    write_uvarint(out, b.len() as u64);
    out.write(b);
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Int(v) => write!(f, "{v}"),
            Item::Bytes(b) => write!(f, "{b:?}"),
            Item::Tuple(t) => write!(f, "{t:?}"),
        }
    }
}

impl From<i64> for Item {
    fn from(v: i64) -> Self {
        Item::Int(v)
    }
}

impl From<bool> for Item {
    fn from(v: bool) -> Self {
        Item::Int(v as i64)
    }
}

impl From<Bytes> for Item {
    fn from(b: Bytes) -> Self {
        Item::Bytes(b)
    }
}

impl From<&[u8]> for Item {
    fn from(b: &[u8]) -> Self {
        Item::Bytes(Bytes::from(b))
    }
}

impl From<Hash> for Item {
    fn from(h: Hash) -> Self {
        Item::Bytes(Bytes::from(h.0))
    }
}
