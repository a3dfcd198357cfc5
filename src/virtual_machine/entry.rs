//! Named tuples representing protocol objects.
//!
//! The [`for_each_entry!`](crate::for_each_entry) macro holds the canonical
//! list of entry kinds and their fields. [`define_entries!`] turns it into
//! one struct per kind, with tuple conversion and content ids, plus the
//! closed [`Entry`] sum type.
//!
//! Every entry tuple starts with its type name as a byte string, followed by
//! the fields in declaration order. Field kinds map to items as follows:
//! - `Int`: integer
//! - `Bytes`: byte string
//! - `Hash`: 32-byte byte string
//! - `Ids`: tuple of 32-byte byte strings

use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::item::{Item, Tuple};

/// Invokes a callback macro with the complete entry definition list.
#[macro_export]
macro_rules! for_each_entry {
    ($callback:ident) => {
        $callback! {
            /// Replay protection: a predicate, a validity window and the chain it belongs to.
            Nonce, "nonce" => { program: Bytes, mintime: Int, maxtime: Int, blockchain_id: Bytes },
            /// Single-use uniqueness token.
            Anchor, "anchor" => { value: Hash },
            /// An amount of one asset.
            Value, "value" => { amount: Int, asset_id: Hash, anchor: Hash },
            /// A confidential value: commitments in place of amount and asset.
            ProvenValue, "provenvalue" => { value_commitment: Bytes, asset_commitment: Bytes, anchor: Hash },
            /// A value locked under a program.
            Contract, "contract" => { amount: Int, asset_id: Hash, program: Bytes, anchor: Hash },
            /// A contract consumed by this transaction.
            Input, "input" => { contract_id: Hash },
            /// A contract created by this transaction.
            Output, "output" => { contract_id: Hash },
            /// A contract observed but not consumed.
            Read, "read" => { contract_id: Hash },
            /// A deferred predicate that must be satisfied.
            Condition, "condition" => { program: Bytes },
            /// A value permanently removed from circulation.
            Retirement, "retirement" => { amount: Int, asset_id: Hash, anchor: Hash },
            /// Lower time bound.
            MinTime, "mintime" => { time: Int },
            /// Upper time bound.
            MaxTime, "maxtime" => { time: Int },
            /// Opaque caller-supplied data.
            Annotation, "annotation" => { data: Bytes },
            /// Issuance program whose id is the asset id.
            AssetDefinition, "assetdefinition" => { issuance_program: Bytes },
            /// An issuance program paired with the asset it defines.
            IssuanceCandidate, "issuancecandidate" => { asset_id: Hash, issuance_program: Bytes },
            /// The terminal entry of a run; its id is the transaction id.
            Summary, "summary" => {
                inputs: Ids,
                outputs: Ids,
                nonces: Ids,
                retirements: Ids,
                time_constraints: Ids,
                annotations: Ids,
            },
        }
    };
}

#[macro_export]
macro_rules! define_entries {
    (
        $(
            $(#[$doc:meta])*
            $name:ident, $type_name:literal => { $( $field:ident : $kind:ident ),* $(,)? }
        ),* $(,)?
    ) => {
        $(
            $(#[$doc])*
            #[derive(Clone, Debug, PartialEq, Eq)]
            pub struct $name {
                $( pub $field: define_entries!(@ty $kind), )*
            }

            impl $name {
                /// Type name stored in the first tuple field.
                pub const TYPE_NAME: &'static str = $type_name;
                /// Tuple arity, type name included.
                pub const ARITY: usize = 1 + <[&str]>::len(&[ $( stringify!($field) ),* ]);

                /// Converts to the canonical tuple form.
                pub fn to_tuple(&self) -> Tuple {
                    let fields: Vec<Item> = vec![
                        Item::Bytes(Bytes::from(Self::TYPE_NAME)),
                        $( define_entries!(@to $kind, &self.$field), )*
                    ];
                    fields.into()
                }

                /// Reads the entry back from a tuple.
                ///
                /// Fails with [`VMError::MalformedEntry`] on a wrong arity, a
                /// wrong type name, or a field of the wrong shape.
                pub fn from_tuple(tuple: &[Item]) -> Result<Self, VMError> {
                    if tuple.len() != Self::ARITY {
                        return Err(VMError::MalformedEntry {
                            entry: Self::TYPE_NAME,
                            reason: "wrong arity",
                        });
                    }
                    if !has_type_name(tuple, Self::TYPE_NAME) {
                        return Err(VMError::MalformedEntry {
                            entry: Self::TYPE_NAME,
                            reason: "wrong type name",
                        });
                    }
                    let mut fields = tuple[1..].iter();
                    Ok(Self {
                        $(
                            $field: define_entries!(
                                @from $kind, fields.next(), Self::TYPE_NAME, $field
                            )?,
                        )*
                    })
                }

                /// Content id of the entry.
                pub fn id(&self) -> Hash {
                    Item::Tuple(self.to_tuple()).id()
                }
            }

            impl From<$name> for Entry {
                fn from(e: $name) -> Self {
                    Entry::$name(e)
                }
            }
        )*

        /// Any protocol entry.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Entry {
            $( $name($name), )*
        }

        impl Entry {
            /// Type name of the entry kind.
            pub const fn type_name(&self) -> &'static str {
                match self {
                    $( Entry::$name(_) => $name::TYPE_NAME, )*
                }
            }

            /// Converts to the canonical tuple form.
            pub fn to_tuple(&self) -> Tuple {
                match self {
                    $( Entry::$name(e) => e.to_tuple(), )*
                }
            }

            /// Reads any entry kind, dispatching on the leading type name.
            pub fn from_tuple(tuple: &[Item]) -> Result<Self, VMError> {
                let name = match tuple.first() {
                    Some(Item::Bytes(name)) => name.as_slice(),
                    _ => {
                        return Err(VMError::MalformedEntry {
                            entry: "unknown",
                            reason: "missing type name",
                        });
                    }
                };
                $(
                    if name == $type_name.as_bytes() {
                        return $name::from_tuple(tuple).map(Entry::$name);
                    }
                )*
                Err(VMError::MalformedEntry {
                    entry: "unknown",
                    reason: "unknown type name",
                })
            }

            /// Content id of the entry.
            pub fn id(&self) -> Hash {
                match self {
                    $( Entry::$name(e) => e.id(), )*
                }
            }

            /// Length of the canonical encoding of the tuple form.
            pub fn encoded_len(&self) -> usize {
                Item::Tuple(self.to_tuple()).encoded_len()
            }
        }
    };

    // ---------- field types ----------
    (@ty Int)   => { i64 };
    (@ty Bytes) => { Bytes };
    (@ty Hash)  => { Hash };
    (@ty Ids)   => { Vec<Hash> };

    // ---------- to item ----------
    (@to Int, $v:expr)   => { Item::Int(*$v) };
    (@to Bytes, $v:expr) => { Item::Bytes($v.clone()) };
    (@to Hash, $v:expr)  => { Item::from(*$v) };
    (@to Ids, $v:expr)   => { Item::tuple($v.iter().map(|h| Item::from(*h))) };

    // ---------- from item ----------
    (@from Int, $item:expr, $entry:expr, $field:ident) => {
        match $item {
            Some(Item::Int(v)) => Ok(*v),
            _ => Err(VMError::MalformedEntry { entry: $entry, reason: concat!(stringify!($field), " must be an int") }),
        }
    };
    (@from Bytes, $item:expr, $entry:expr, $field:ident) => {
        match $item {
            Some(Item::Bytes(b)) => Ok(b.clone()),
            _ => Err(VMError::MalformedEntry { entry: $entry, reason: concat!(stringify!($field), " must be bytes") }),
        }
    };
    (@from Hash, $item:expr, $entry:expr, $field:ident) => {
        match $item {
            Some(Item::Bytes(b)) => Hash::from_slice(b).ok_or(VMError::MalformedEntry {
                entry: $entry,
                reason: concat!(stringify!($field), " must be a 32-byte hash"),
            }),
            _ => Err(VMError::MalformedEntry { entry: $entry, reason: concat!(stringify!($field), " must be a 32-byte hash") }),
        }
    };
    (@from Ids, $item:expr, $entry:expr, $field:ident) => {
        match $item {
            Some(Item::Tuple(ids)) => ids
                .iter()
                .map(|id| match id {
                    Item::Bytes(b) => Hash::from_slice(b),
                    _ => None,
                })
                .collect::<Option<Vec<Hash>>>()
                .ok_or(VMError::MalformedEntry {
                    entry: $entry,
                    reason: concat!(stringify!($field), " must be a tuple of 32-byte ids"),
                }),
            _ => Err(VMError::MalformedEntry { entry: $entry, reason: concat!(stringify!($field), " must be a tuple") }),
        }
    };
}

for_each_entry!(define_entries);

fn has_type_name(tuple: &[Item], name: &str) -> bool {
    matches!(tuple.first(), Some(Item::Bytes(b)) if b.as_slice() == name.as_bytes())
}

impl AssetDefinition {
    /// Asset id defined by an issuance program.
    pub fn asset_id(issuance_program: &Bytes) -> Hash {
        AssetDefinition {
            issuance_program: issuance_program.clone(),
        }
        .id()
    }
}

impl Contract {
    /// Builds the contract a value becomes when locked under `program`.
    pub fn lock(value: &Value, program: Bytes) -> Self {
        Contract {
            amount: value.amount,
            asset_id: value.asset_id,
            program,
            anchor: value.anchor,
        }
    }
}

/// Anchor derived for a value produced from `parts` by `op`.
///
/// Split children use `("split", parent, i)`, merges use `("merge", a, b)`.
pub fn derived_anchor(op: &str, parts: &[Item]) -> Hash {
    let mut fields = Vec::with_capacity(parts.len() + 1);
    fields.push(Item::Bytes(Bytes::from(op)));
    fields.extend_from_slice(parts);
    Item::tuple(fields).id()
}
