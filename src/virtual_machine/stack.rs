//! Stack bank: the data and alt stacks of items, and the typed entry stacks.
//!
//! Entry stacks keep their entries in one vector and the precomputed ids in a
//! parallel vector, so structural operations are index permutations applied
//! to both in lockstep and no id is ever recomputed.

use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::virtual_machine::entry::Entry;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::item::{Item, Tuple};

/// Number of entry stacks in the bank.
pub const ENTRY_STACK_COUNT: usize = 10;

/// Stack selector, as passed to the generic stack instructions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum StackId {
    Data = 0,
    Alt = 1,
    Input = 2,
    Value = 3,
    Output = 4,
    Condition = 5,
    Nonce = 6,
    Anchor = 7,
    Retirement = 8,
    TimeConstraint = 9,
    Annotation = 10,
    Summary = 11,
}

impl StackId {
    /// All stacks in selector order.
    pub const ALL: [StackId; 2 + ENTRY_STACK_COUNT] = [
        StackId::Data,
        StackId::Alt,
        StackId::Input,
        StackId::Value,
        StackId::Output,
        StackId::Condition,
        StackId::Nonce,
        StackId::Anchor,
        StackId::Retirement,
        StackId::TimeConstraint,
        StackId::Annotation,
        StackId::Summary,
    ];

    /// Resolves a runtime selector.
    pub fn from_selector(selector: i64) -> Option<StackId> {
        usize::try_from(selector)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            StackId::Data => "data",
            StackId::Alt => "alt",
            StackId::Input => "input",
            StackId::Value => "value",
            StackId::Output => "output",
            StackId::Condition => "condition",
            StackId::Nonce => "nonce",
            StackId::Anchor => "anchor",
            StackId::Retirement => "retirement",
            StackId::TimeConstraint => "timeconstraint",
            StackId::Annotation => "annotation",
            StackId::Summary => "summary",
        }
    }

    /// Effect stacks record irreversible effects in creation order and refuse
    /// `roll`, `bury` and `reverse`.
    pub const fn is_effect(&self) -> bool {
        matches!(
            self,
            StackId::Input
                | StackId::Output
                | StackId::Nonce
                | StackId::Retirement
                | StackId::TimeConstraint
                | StackId::Annotation
                | StackId::Summary
        )
    }

    const fn entry_index(&self) -> Option<usize> {
        match self {
            StackId::Data | StackId::Alt => None,
            other => Some(*other as usize - 2),
        }
    }
}

/// Structural operations shared by every stack.
///
/// Depth `n` counts from the top: `0` is the top item.
pub trait StackOps {
    fn id(&self) -> StackId;
    fn len(&self) -> usize;
    fn roll(&mut self, n: usize, instr: &'static str) -> Result<(), VMError>;
    fn bury(&mut self, n: usize, instr: &'static str) -> Result<(), VMError>;
    fn reverse(&mut self, n: usize, instr: &'static str) -> Result<(), VMError>;
    /// Copy of the item `n` from the top; entries are copied as their tuple.
    fn peek_item(&self, n: usize, instr: &'static str) -> Result<Item, VMError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn underflow(&self, instr: &'static str, needed: usize) -> VMError {
        VMError::StackUnderflow {
            instruction: instr,
            stack: self.id().as_str(),
            needed,
            available: self.len(),
        }
    }
}

/// Index of the item `n` from the top, if present.
fn from_top(len: usize, n: usize) -> Option<usize> {
    len.checked_sub(n)?.checked_sub(1)
}

fn roll_vec<T>(v: &mut Vec<T>, n: usize) {
    let idx = v.len() - 1 - n;
    let item = v.remove(idx);
    v.push(item);
}

fn bury_vec<T>(v: &mut Vec<T>, n: usize) {
    if let Some(item) = v.pop() {
        let idx = v.len() - n;
        v.insert(idx, item);
    }
}

fn reverse_vec<T>(v: &mut [T], n: usize) {
    let start = v.len() - n;
    v[start..].reverse();
}

/// Stack of raw items (data and alt).
#[derive(Clone, Debug)]
pub struct ItemStack {
    id: StackId,
    items: Vec<Item>,
}

impl ItemStack {
    pub fn new(id: StackId) -> Self {
        Self {
            id,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, item: impl Into<Item>) {
        self.items.push(item.into());
    }

    pub fn pop(&mut self, instr: &'static str) -> Result<Item, VMError> {
        self.items.pop().ok_or_else(|| self.underflow(instr, 1))
    }

    /// Pops an integer operand.
    pub fn pop_int(&mut self, instr: &'static str) -> Result<i64, VMError> {
        match self.pop(instr)? {
            Item::Int(v) => Ok(v),
            other => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "int",
                actual: other.type_name(),
            }),
        }
    }

    /// Pops a byte string operand.
    pub fn pop_bytes(&mut self, instr: &'static str) -> Result<Bytes, VMError> {
        match self.pop(instr)? {
            Item::Bytes(b) => Ok(b),
            other => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "bytes",
                actual: other.type_name(),
            }),
        }
    }

    /// Pops a tuple operand.
    pub fn pop_tuple(&mut self, instr: &'static str) -> Result<Tuple, VMError> {
        match self.pop(instr)? {
            Item::Tuple(t) => Ok(t),
            other => Err(VMError::TypeMismatch {
                instruction: instr,
                expected: "tuple",
                actual: other.type_name(),
            }),
        }
    }

    /// Pops `n` items, returned in stack order (deepest first).
    pub fn pop_many(&mut self, n: usize, instr: &'static str) -> Result<Vec<Item>, VMError> {
        if n > self.items.len() {
            return Err(self.underflow(instr, n));
        }
        let start = self.items.len() - n;
        Ok(self.items.split_off(start))
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }
}

impl StackOps for ItemStack {
    fn id(&self) -> StackId {
        self.id
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn roll(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if from_top(self.len(), n).is_none() {
            return Err(self.underflow(instr, n.saturating_add(1)));
        }
        roll_vec(&mut self.items, n);
        Ok(())
    }

    fn bury(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if from_top(self.len(), n).is_none() {
            return Err(self.underflow(instr, n.saturating_add(1)));
        }
        bury_vec(&mut self.items, n);
        Ok(())
    }

    fn reverse(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if n > self.len() {
            return Err(self.underflow(instr, n));
        }
        reverse_vec(&mut self.items, n);
        Ok(())
    }

    fn peek_item(&self, n: usize, instr: &'static str) -> Result<Item, VMError> {
        from_top(self.len(), n)
            .map(|i| self.items[i].clone())
            .ok_or_else(|| self.underflow(instr, n.saturating_add(1)))
    }
}

/// Stack of entries with their precomputed ids.
#[derive(Clone, Debug)]
pub struct EntryStack {
    id: StackId,
    entries: Vec<Entry>,
    ids: Vec<Hash>,
}

impl EntryStack {
    pub fn new(id: StackId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            ids: Vec::new(),
        }
    }

    /// Pushes an entry, computing its id once. Returns the id.
    pub fn push(&mut self, entry: impl Into<Entry>) -> Hash {
        let entry = entry.into();
        let id = entry.id();
        self.entries.push(entry);
        self.ids.push(id);
        id
    }

    /// Pops the top entry and its id.
    pub fn pop(&mut self, instr: &'static str) -> Result<(Entry, Hash), VMError> {
        match (self.entries.pop(), self.ids.pop()) {
            (Some(entry), Some(id)) => Ok((entry, id)),
            _ => Err(self.underflow(instr, 1)),
        }
    }

    /// Top entry and id without removing them.
    pub fn top(&self) -> Option<(&Entry, &Hash)> {
        self.entries.last().zip(self.ids.last())
    }

    /// Removes every entry, oldest first.
    pub fn drain(&mut self) -> Vec<(Entry, Hash)> {
        let ids = std::mem::take(&mut self.ids);
        std::mem::take(&mut self.entries)
            .into_iter()
            .zip(ids)
            .collect()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn ids(&self) -> &[Hash] {
        &self.ids
    }
}

impl StackOps for EntryStack {
    fn id(&self) -> StackId {
        self.id
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn roll(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if from_top(self.len(), n).is_none() {
            return Err(self.underflow(instr, n.saturating_add(1)));
        }
        roll_vec(&mut self.entries, n);
        roll_vec(&mut self.ids, n);
        Ok(())
    }

    fn bury(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if from_top(self.len(), n).is_none() {
            return Err(self.underflow(instr, n.saturating_add(1)));
        }
        bury_vec(&mut self.entries, n);
        bury_vec(&mut self.ids, n);
        Ok(())
    }

    fn reverse(&mut self, n: usize, instr: &'static str) -> Result<(), VMError> {
        if n > self.len() {
            return Err(self.underflow(instr, n));
        }
        reverse_vec(&mut self.entries, n);
        reverse_vec(&mut self.ids, n);
        Ok(())
    }

    fn peek_item(&self, n: usize, instr: &'static str) -> Result<Item, VMError> {
        from_top(self.len(), n)
            .map(|i| Item::Tuple(self.entries[i].to_tuple()))
            .ok_or_else(|| self.underflow(instr, n.saturating_add(1)))
    }
}

/// The full stack bank of one machine.
#[derive(Clone, Debug)]
pub struct Stacks {
    pub data: ItemStack,
    pub alt: ItemStack,
    entries: [EntryStack; ENTRY_STACK_COUNT],
}

impl Default for Stacks {
    fn default() -> Self {
        Self::new()
    }
}

impl Stacks {
    pub fn new() -> Self {
        Self {
            data: ItemStack::new(StackId::Data),
            alt: ItemStack::new(StackId::Alt),
            entries: std::array::from_fn(|i| EntryStack::new(StackId::ALL[i + 2])),
        }
    }

    /// Entry stack by id. Selecting `Data` or `Alt` yields `None`.
    pub fn entry(&self, id: StackId) -> Option<&EntryStack> {
        id.entry_index().map(|i| &self.entries[i])
    }

    fn at(&mut self, id: StackId) -> &mut EntryStack {
        &mut self.entries[id as usize - 2]
    }

    pub fn input(&mut self) -> &mut EntryStack {
        self.at(StackId::Input)
    }

    pub fn value(&mut self) -> &mut EntryStack {
        self.at(StackId::Value)
    }

    pub fn output(&mut self) -> &mut EntryStack {
        self.at(StackId::Output)
    }

    pub fn condition(&mut self) -> &mut EntryStack {
        self.at(StackId::Condition)
    }

    pub fn nonce(&mut self) -> &mut EntryStack {
        self.at(StackId::Nonce)
    }

    pub fn anchor(&mut self) -> &mut EntryStack {
        self.at(StackId::Anchor)
    }

    pub fn retirement(&mut self) -> &mut EntryStack {
        self.at(StackId::Retirement)
    }

    pub fn time_constraint(&mut self) -> &mut EntryStack {
        self.at(StackId::TimeConstraint)
    }

    pub fn annotation(&mut self) -> &mut EntryStack {
        self.at(StackId::Annotation)
    }

    pub fn summary(&mut self) -> &mut EntryStack {
        self.at(StackId::Summary)
    }

    /// Generic view used by `roll`, `bury`, `reverse`, `depth` and `peek`.
    pub fn ops(&self, id: StackId) -> &dyn StackOps {
        match id.entry_index() {
            None if id == StackId::Data => &self.data,
            None => &self.alt,
            Some(i) => &self.entries[i],
        }
    }

    /// Mutable generic view.
    pub fn ops_mut(&mut self, id: StackId) -> &mut dyn StackOps {
        match id.entry_index() {
            None if id == StackId::Data => &mut self.data,
            None => &mut self.alt,
            Some(i) => &mut self.entries[i],
        }
    }

    /// Number of items on stack `id`.
    pub fn len(&self, id: StackId) -> usize {
        self.ops(id).len()
    }
}
